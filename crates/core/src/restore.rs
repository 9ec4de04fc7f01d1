use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::classify::SizeClass;
use crate::credential::{DEFAULT_BLOCK_SIZE_MB, DEFAULT_THREAD_COUNT};
use crate::drive::{ConflictPolicy, DriveApi, DriveAuth, DriveFuture, HttpReply, remote_path};
use crate::progress::{ProgressEvent, ProgressSender};
use crate::upload::{
    FileToRestore, JsonMap, ResumableUploader, RetryPolicy, Sent, SingleShotUploader,
    UploadOutcome, UploadTask, decode_object, retry_transient,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub auth: DriveAuth,
    /// Remote folder the source tree is recreated under; empty is the
    /// drive root.
    pub target_folder: String,
    pub conflict_policy: ConflictPolicy,
    pub concurrency_limit: u32,
    pub block_size_mb: u32,
    pub skip_existing: bool,
    pub retry: RetryPolicy,
}

impl RestoreConfig {
    pub fn new(auth: DriveAuth) -> Self {
        Self {
            auth,
            target_folder: String::new(),
            conflict_policy: ConflictPolicy::default(),
            concurrency_limit: DEFAULT_THREAD_COUNT,
            block_size_mb: DEFAULT_BLOCK_SIZE_MB,
            skip_existing: false,
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit < 1 {
            return Err(Error::InvalidConfig {
                message: "thread count must be >= 1".to_string(),
            });
        }
        if self.block_size_mb < 1 {
            return Err(Error::InvalidConfig {
                message: "block size must be >= 1 MiB".to_string(),
            });
        }
        if self.auth.account_id.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "account id must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub files_total: u64,
    pub files_uploaded: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub bytes_uploaded: u64,
}

#[derive(Default)]
pub struct RestoreOptions {
    pub progress: Option<ProgressSender>,
}

pub async fn restore_files(
    drive: Arc<dyn DriveApi>,
    config: RestoreConfig,
    files: Vec<FileToRestore>,
) -> Result<RestoreResult> {
    restore_files_with(drive, config, files, RestoreOptions::default()).await
}

/// Uploads every file with at most `concurrency_limit` uploads in flight
/// and returns once each file has been attempted. A fatal error from any
/// task aborts the rest and is returned.
pub async fn restore_files_with(
    drive: Arc<dyn DriveApi>,
    config: RestoreConfig,
    files: Vec<FileToRestore>,
    options: RestoreOptions,
) -> Result<RestoreResult> {
    config.validate()?;
    let started = Instant::now();
    let progress = options.progress.unwrap_or_else(ProgressSender::disabled);
    let target_folder: Arc<str> = Arc::from(config.target_folder.trim_matches('/'));
    let auth = Arc::new(config.auth);

    info!(
        event = "restore.start",
        account_id = %auth.account_id,
        target_folder = %target_folder,
        files = files.len(),
        concurrency = config.concurrency_limit,
        conflict = %config.conflict_policy,
        "restore.start"
    );

    let existing = if config.skip_existing {
        list_existing_names(drive.as_ref(), &auth, &target_folder, &files, config.retry).await?
    } else {
        HashMap::new()
    };

    let single = Arc::new(SingleShotUploader::new(drive.clone(), config.retry));
    let resumable = Arc::new(ResumableUploader::new(
        drive.clone(),
        config.block_size_mb,
        config.retry,
    ));

    let mut result = RestoreResult {
        files_total: files.len() as u64,
        ..RestoreResult::default()
    };
    let semaphore = Arc::new(Semaphore::new(config.concurrency_limit as usize));
    let mut tasks = JoinSet::new();

    for file in files {
        while let Some(joined) = tasks.try_join_next() {
            absorb(&mut result, joined)?;
        }

        if already_exists(&existing, &file.relative_path) {
            debug!(event = "restore.skip", path = %file.relative_path, "restore.skip");
            progress.emit(ProgressEvent::Skipped {
                path: file.relative_path,
            });
            result.files_skipped += 1;
            continue;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::TaskJoin {
                message: format!("semaphore closed: {e}"),
            })?;
        let task = UploadTask {
            auth: auth.clone(),
            conflict_policy: config.conflict_policy,
            target_folder: target_folder.clone(),
            file,
            progress: progress.clone(),
        };
        let single = single.clone();
        let resumable = resumable.clone();
        tasks.spawn(async move {
            let _permit = permit;
            run_task(&single, &resumable, task).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        absorb(&mut result, joined)?;
    }

    info!(
        event = "restore.finish",
        files_total = result.files_total,
        files_uploaded = result.files_uploaded,
        files_failed = result.files_failed,
        files_skipped = result.files_skipped,
        bytes_uploaded = result.bytes_uploaded,
        duration_ms = started.elapsed().as_millis() as u64,
        "restore.finish"
    );
    Ok(result)
}

enum FileReport {
    Uploaded { bytes: u64 },
    Failed,
}

fn absorb(
    result: &mut RestoreResult,
    joined: std::result::Result<Result<FileReport>, JoinError>,
) -> Result<()> {
    let report = joined.map_err(|e| Error::TaskJoin {
        message: e.to_string(),
    })??;
    match report {
        FileReport::Uploaded { bytes } => {
            result.files_uploaded += 1;
            result.bytes_uploaded += bytes;
        }
        FileReport::Failed => result.files_failed += 1,
    }
    Ok(())
}

async fn run_task(
    single: &SingleShotUploader,
    resumable: &ResumableUploader,
    task: UploadTask,
) -> Result<FileReport> {
    let path = task.file.relative_path.clone();
    task.progress.emit(ProgressEvent::Started {
        path: path.clone(),
        size: task.file.size_bytes,
        class: task.file.size_class,
    });

    let outcome = match task.file.size_class {
        SizeClass::Small => single.upload(&task).await,
        SizeClass::Large => resumable.upload(&task).await,
    };

    let failure = match outcome {
        Ok(UploadOutcome::Completed(reply)) => match graph_error(&reply) {
            None => {
                task.progress.emit(ProgressEvent::Succeeded { path });
                return Ok(FileReport::Uploaded {
                    bytes: task.file.size_bytes,
                });
            }
            Some(message) => message,
        },
        Ok(UploadOutcome::Abandoned {
            attempts,
            last_error,
        }) => format!("gave up after {attempts} attempts: {last_error}"),
        // A local file that vanished or became unreadable only loses itself.
        Err(Error::Io(e)) => format!("read failed: {e}"),
        Err(e) => {
            error!(event = "upload.fatal", path = %path, error = %e, "upload.fatal");
            return Err(e);
        }
    };

    task.progress.emit(ProgressEvent::Failed {
        path,
        reason: failure,
    });
    Ok(FileReport::Failed)
}

/// Message of a Graph error object (`{"error":{"code":..,"message":..}}`).
pub fn graph_error(reply: &JsonMap) -> Option<String> {
    let err = reply.get("error")?;
    let code = err.get("code").and_then(|v| v.as_str());
    let message = err.get("message").and_then(|v| v.as_str());
    Some(match (code, message) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(s), None) | (None, Some(s)) => s.to_string(),
        (None, None) => err.to_string(),
    })
}

fn split_parent(relative_path: &str) -> (&str, &str) {
    match relative_path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", relative_path),
    }
}

fn already_exists(existing: &HashMap<String, HashSet<String>>, relative_path: &str) -> bool {
    let (parent, name) = split_parent(relative_path);
    existing
        .get(parent)
        .is_some_and(|names| names.contains(name))
}

/// Lists each distinct remote parent folder once. Keys are parent paths
/// relative to the target folder.
async fn list_existing_names(
    drive: &dyn DriveApi,
    auth: &DriveAuth,
    target_folder: &str,
    files: &[FileToRestore],
    retry: RetryPolicy,
) -> Result<HashMap<String, HashSet<String>>> {
    let parents: HashSet<&str> = files
        .iter()
        .map(|f| split_parent(&f.relative_path).0)
        .collect();

    let mut out = HashMap::new();
    for parent in parents {
        let folder = remote_path(target_folder, parent);
        let names = list_folder_names(drive, auth, folder.trim_end_matches('/'), retry).await?;
        out.insert(parent.to_string(), names);
    }
    Ok(out)
}

/// Names directly under `folder`; a missing folder has none. Transport
/// errors are retried per `retry` before they abort the listing.
pub async fn list_folder_names(
    drive: &dyn DriveApi,
    auth: &DriveAuth,
    folder: &str,
    retry: RetryPolicy,
) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut reply = fetch_listing(retry, folder, || drive.list_children(auth, folder)).await?;
    loop {
        if reply.status == 404 {
            return Ok(names);
        }
        if !reply.is_success() {
            return Err(Error::Remote {
                status: reply.status,
                body: String::from_utf8_lossy(&reply.body).into_owned(),
            });
        }

        let page = decode_object(&reply.body)?;
        if let Some(items) = page.get("value").and_then(|v| v.as_array()) {
            names.extend(
                items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string),
            );
        }

        match page.get("@odata.nextLink").and_then(|v| v.as_str()) {
            Some(next) => {
                reply = fetch_listing(retry, folder, || drive.get_page(auth, next)).await?;
            }
            None => return Ok(names),
        }
    }
}

async fn fetch_listing<'a, F>(retry: RetryPolicy, folder: &str, send: F) -> Result<HttpReply>
where
    F: FnMut() -> DriveFuture<'a>,
{
    let on_retry = |attempt: u32, reason: &str| {
        warn!(
            event = "restore.list_retry",
            folder = %folder,
            attempt,
            reason = %reason,
            "restore.list_retry"
        );
    };
    match retry_transient(retry, on_retry, send).await? {
        Sent::Reply(reply) => Ok(reply),
        Sent::Exhausted {
            attempts,
            last_error,
        } => Err(Error::Transport {
            message: format!("listing {folder:?} gave up after {attempts} attempts: {last_error}"),
        }),
    }
}
