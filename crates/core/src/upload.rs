use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::classify::{SizeClass, classify};
use crate::drive::{
    ByteRange, ConflictPolicy, DriveApi, DriveAuth, DriveFuture, HttpReply, remote_path,
};
use crate::progress::{ProgressEvent, ProgressSender};
use crate::{Error, Result};

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Graph requires session chunks to be multiples of 320 KiB.
pub const CHUNK_ALIGN_BYTES: u64 = 320 * 1024;

#[derive(Debug, Clone)]
pub struct FileToRestore {
    /// `/`-separated, relative to the restore source root.
    pub relative_path: String,
    pub size_bytes: u64,
    pub size_class: SizeClass,
    pub data: PathBuf,
}

impl FileToRestore {
    pub fn new(relative_path: impl Into<String>, size_bytes: u64, data: PathBuf) -> Self {
        Self {
            relative_path: relative_path.into(),
            size_bytes,
            size_class: classify(size_bytes),
            data,
        }
    }
}

/// Everything one upload attempt sequence needs. Built per file by the
/// dispatcher and dropped when the file is done.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub auth: Arc<DriveAuth>,
    pub conflict_policy: ConflictPolicy,
    pub target_folder: Arc<str>,
    pub file: FileToRestore,
    pub progress: ProgressSender,
}

impl UploadTask {
    pub fn remote_path(&self) -> String {
        remote_path(&self.target_folder, &self.file.relative_path)
    }

    fn retrying(&self, attempt: u32, reason: &str) {
        warn!(
            event = "upload.retry",
            path = %self.file.relative_path,
            attempt,
            reason = %reason,
            "upload.retry"
        );
        self.progress.emit(ProgressEvent::Retrying {
            path: self.file.relative_path.clone(),
            attempt,
            reason: reason.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between attempts; zero retries immediately.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// The server answered; the map is its decoded JSON reply, which may be
    /// a Graph error object.
    Completed(JsonMap),
    /// Retries ran out, or the outcome could not be confirmed.
    Abandoned { attempts: u32, last_error: String },
}

impl UploadOutcome {
    pub fn into_response(self) -> Option<JsonMap> {
        match self {
            UploadOutcome::Completed(map) => Some(map),
            UploadOutcome::Abandoned { .. } => None,
        }
    }
}

pub(crate) enum Sent {
    Reply(HttpReply),
    Exhausted { attempts: u32, last_error: String },
}

/// Repeats `send` until a reply arrives, retrying transport errors up to
/// `retry.max_attempts` in total. `on_retry` sees each failed attempt that
/// will be followed by another.
pub(crate) async fn retry_transient<'a, F, R>(
    retry: RetryPolicy,
    mut on_retry: R,
    mut send: F,
) -> Result<Sent>
where
    F: FnMut() -> DriveFuture<'a>,
    R: FnMut(u32, &str),
{
    let max = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match send().await {
            Ok(reply) => return Ok(Sent::Reply(reply)),
            Err(e) if e.is_transient() => {
                let reason = e.to_string();
                if attempt >= max {
                    return Ok(Sent::Exhausted {
                        attempts: attempt,
                        last_error: reason,
                    });
                }
                on_retry(attempt, &reason);
                retry.pause().await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn send_with_retry<'a, F>(retry: RetryPolicy, task: &UploadTask, send: F) -> Result<Sent>
where
    F: FnMut() -> DriveFuture<'a>,
{
    retry_transient(retry, |attempt, reason| task.retrying(attempt, reason), send).await
}

pub(crate) fn decode_object(body: &[u8]) -> Result<JsonMap> {
    serde_json::from_slice(body).map_err(|e| Error::decode(e, body))
}

/// One PUT to `:/content` for files the classifier marks small.
pub struct SingleShotUploader {
    drive: Arc<dyn DriveApi>,
    retry: RetryPolicy,
}

impl SingleShotUploader {
    pub fn new(drive: Arc<dyn DriveApi>, retry: RetryPolicy) -> Self {
        Self { drive, retry }
    }

    pub async fn upload(&self, task: &UploadTask) -> Result<UploadOutcome> {
        let bytes = tokio::fs::read(&task.file.data).await?;
        let remote = task.remote_path();
        debug!(
            event = "upload.single",
            path = %task.file.relative_path,
            remote = %remote,
            conflict = %task.conflict_policy,
            "upload.single"
        );

        let sent = send_with_retry(self.retry, task, || {
            self.drive
                .put_content(&task.auth, &remote, task.conflict_policy, bytes.clone())
        })
        .await?;

        match sent {
            Sent::Reply(reply) => Ok(UploadOutcome::Completed(decode_object(&reply.body)?)),
            Sent::Exhausted {
                attempts,
                last_error,
            } => Ok(UploadOutcome::Abandoned {
                attempts,
                last_error,
            }),
        }
    }
}

/// Upload-session transfer for files above the single-shot limit.
pub struct ResumableUploader {
    drive: Arc<dyn DriveApi>,
    retry: RetryPolicy,
    chunk_size: u64,
}

impl ResumableUploader {
    pub fn new(drive: Arc<dyn DriveApi>, block_size_mb: u32, retry: RetryPolicy) -> Self {
        Self {
            drive,
            retry,
            chunk_size: chunk_size_for(block_size_mb),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub async fn upload(&self, task: &UploadTask) -> Result<UploadOutcome> {
        let remote = task.remote_path();
        let sent = send_with_retry(self.retry, task, || {
            self.drive
                .create_upload_session(&task.auth, &remote, task.conflict_policy)
        })
        .await?;
        let session = match sent {
            Sent::Reply(reply) => decode_object(&reply.body)?,
            Sent::Exhausted {
                attempts,
                last_error,
            } => {
                return Ok(UploadOutcome::Abandoned {
                    attempts,
                    last_error,
                });
            }
        };
        let upload_url = match session.get("uploadUrl").and_then(|v| v.as_str()) {
            Some(url) => url.to_string(),
            // Graph error object, e.g. nameAlreadyExists under `fail`.
            None => return Ok(UploadOutcome::Completed(session)),
        };
        debug!(
            event = "upload.session",
            path = %task.file.relative_path,
            remote = %remote,
            chunk_size = self.chunk_size,
            "upload.session"
        );

        self.transfer(task, &upload_url).await
    }

    async fn transfer(&self, task: &UploadTask, upload_url: &str) -> Result<UploadOutcome> {
        let total = task.file.size_bytes;
        let mut file = tokio::fs::File::open(&task.file.data).await?;
        let max = self.retry.max_attempts.max(1);
        let mut offset = 0u64;
        let mut failures = 0u32;

        while offset < total {
            let end = (offset + self.chunk_size).min(total);
            let bytes = read_chunk(&mut file, offset, end - offset).await?;
            let range = ByteRange {
                start: offset,
                end: end - 1,
                total,
            };

            let reason = match self.drive.put_range(upload_url, range, bytes).await {
                Ok(reply) if reply.status == 202 => {
                    let ack = decode_object(&reply.body)?;
                    let next = next_expected_offset(&ack).unwrap_or(end);
                    if next > offset {
                        offset = next;
                        failures = 0;
                        task.progress.emit(ProgressEvent::ChunkUploaded {
                            path: task.file.relative_path.clone(),
                            uploaded: offset.min(total),
                            total,
                        });
                        continue;
                    }
                    // An acknowledgement that does not move forward is a failed attempt.
                    format!("session did not advance past offset {offset}")
                }
                Ok(reply) if reply.status >= 500 => {
                    format!("http {} at offset {offset}", reply.status)
                }
                Ok(reply) => {
                    let map = decode_object(&reply.body)?;
                    if reply.is_success() {
                        task.progress.emit(ProgressEvent::ChunkUploaded {
                            path: task.file.relative_path.clone(),
                            uploaded: total,
                            total,
                        });
                    }
                    return Ok(UploadOutcome::Completed(map));
                }
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => return Err(e),
            };

            failures += 1;
            if failures >= max {
                return Ok(UploadOutcome::Abandoned {
                    attempts: failures,
                    last_error: reason,
                });
            }
            task.retrying(failures, &reason);
            self.retry.pause().await;

            match self.session_state(upload_url).await? {
                SessionState::Expecting(next) => offset = next,
                // The final range may have been committed with its reply lost.
                SessionState::Closed if end == total => {
                    return self.confirm_committed(task, failures, reason).await;
                }
                SessionState::Closed | SessionState::Unknown => {}
            }
        }

        Ok(UploadOutcome::Abandoned {
            attempts: failures,
            last_error: "session accepted every byte but returned no item".to_string(),
        })
    }

    async fn session_state(&self, upload_url: &str) -> Result<SessionState> {
        match self.drive.session_status(upload_url).await {
            Ok(reply) if reply.is_success() => {
                match next_expected_offset(&decode_object(&reply.body)?) {
                    Some(next) => Ok(SessionState::Expecting(next)),
                    None => Ok(SessionState::Unknown),
                }
            }
            Ok(reply) if reply.status == 404 => Ok(SessionState::Closed),
            Ok(_) => Ok(SessionState::Unknown),
            Err(e) if e.is_transient() => Ok(SessionState::Unknown),
            Err(e) => Err(e),
        }
    }

    /// Looks up the item after its session vanished following the final
    /// range. Under `rename` the item at the requested path may be the one
    /// the upload was renamed away from, so nothing is confirmed there.
    async fn confirm_committed(
        &self,
        task: &UploadTask,
        attempts: u32,
        last_error: String,
    ) -> Result<UploadOutcome> {
        let abandoned = |detail: String| UploadOutcome::Abandoned {
            attempts,
            last_error: format!("{last_error}; {detail}"),
        };
        if task.conflict_policy == ConflictPolicy::Rename {
            return Ok(abandoned(
                "session closed after the final range and a renamed item cannot be confirmed"
                    .to_string(),
            ));
        }

        let remote = task.remote_path();
        let reply = match self.drive.get_item(&task.auth, &remote).await {
            Ok(reply) => reply,
            Err(e) if e.is_transient() => {
                return Ok(abandoned(format!("item lookup failed: {e}")));
            }
            Err(e) => return Err(e),
        };
        if !reply.is_success() {
            return Ok(abandoned(format!(
                "session closed after the final range but item lookup returned http {}",
                reply.status
            )));
        }

        let item = decode_object(&reply.body)?;
        let size = item.get("size").and_then(|v| v.as_u64());
        if size != Some(task.file.size_bytes) {
            return Ok(abandoned(format!(
                "session closed after the final range but the item has size {size:?}"
            )));
        }
        debug!(
            event = "upload.confirmed",
            path = %task.file.relative_path,
            remote = %remote,
            "upload.confirmed"
        );
        task.progress.emit(ProgressEvent::ChunkUploaded {
            path: task.file.relative_path.clone(),
            uploaded: task.file.size_bytes,
            total: task.file.size_bytes,
        });
        Ok(UploadOutcome::Completed(item))
    }
}

enum SessionState {
    /// Next range start from `nextExpectedRanges`.
    Expecting(u64),
    /// 404: the session has finished or expired.
    Closed,
    Unknown,
}

pub fn chunk_size_for(block_size_mb: u32) -> u64 {
    let requested = u64::from(block_size_mb) * 1024 * 1024;
    (requested / CHUNK_ALIGN_BYTES).max(1) * CHUNK_ALIGN_BYTES
}

/// First `start` of `nextExpectedRanges` ("start-end" or "start-").
fn next_expected_offset(session: &JsonMap) -> Option<u64> {
    session
        .get("nextExpectedRanges")?
        .as_array()?
        .first()?
        .as_str()?
        .split('-')
        .next()?
        .parse()
        .ok()
}

async fn read_chunk(file: &mut tokio::fs::File, offset: u64, len: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(len).map_err(|_| Error::InvalidConfig {
        message: format!("chunk too large: {len}"),
    })?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}
