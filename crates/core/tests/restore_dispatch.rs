use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use drive_restore_core::{
    AccessToken, ByteRange, ConflictPolicy, DriveApi, DriveAuth, DriveFuture, Error,
    FileToRestore, HttpReply, ProgressEvent, ProgressReceiver, ProgressSender, RestoreConfig,
    RestoreOptions, RestoreResult, restore_files, restore_files_with, scan_source,
};
use tempfile::TempDir;

const UPLOAD_URL: &str = "https://upload.example/session/1";

enum Step {
    Transport,
    /// The server acts on the request but the reply never arrives.
    Lost,
    Reply(u16, &'static str),
}

#[derive(Default)]
struct FakeDrive {
    delay: Duration,
    put_script: Mutex<VecDeque<Step>>,
    /// Per range PUT; `None` lets the call through.
    range_script: Mutex<VecDeque<Option<Step>>>,
    session_reply: Mutex<Option<Step>>,
    list_failures: AtomicUsize,
    listings: Mutex<HashMap<String, HttpReply>>,
    pages: Mutex<HashMap<String, HttpReply>>,

    put_calls: AtomicUsize,
    conflicts: Mutex<Vec<String>>,
    listed: Mutex<Vec<String>>,
    range_starts: Mutex<Vec<u64>>,
    committed: AtomicU64,
    closed: AtomicBool,
    item_lookups: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl FakeDrive {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn script_puts(&self, steps: impl IntoIterator<Item = Step>) {
        self.put_script.lock().unwrap().extend(steps);
    }

    fn script_ranges(&self, steps: impl IntoIterator<Item = Option<Step>>) {
        self.range_script.lock().unwrap().extend(steps);
    }

    fn commit(&self, range: ByteRange) -> HttpReply {
        let next = range.end + 1;
        self.committed.store(next, Ordering::SeqCst);
        if next == range.total {
            self.closed.store(true, Ordering::SeqCst);
            reply(201, format!(r#"{{"id":"big","size":{next}}}"#))
        } else {
            reply(202, format!(r#"{{"nextExpectedRanges":["{next}-"]}}"#))
        }
    }

    fn list_reply(&self, folder: &str, status: u16, body: &str) {
        self.listings.lock().unwrap().insert(
            folder.to_string(),
            HttpReply {
                status,
                body: body.as_bytes().to_vec(),
            },
        );
    }

    fn page_reply(&self, url: &str, body: &str) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            HttpReply {
                status: 200,
                body: body.as_bytes().to_vec(),
            },
        );
    }

    fn enter(&self) {
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reply(status: u16, body: impl Into<Vec<u8>>) -> HttpReply {
    HttpReply {
        status,
        body: body.into(),
    }
}

fn play(step: Step) -> drive_restore_core::Result<HttpReply> {
    match step {
        Step::Transport | Step::Lost => Err(Error::Transport {
            message: "connection reset by peer".to_string(),
        }),
        Step::Reply(status, body) => Ok(reply(status, body)),
    }
}

impl DriveApi for FakeDrive {
    fn put_content<'a>(
        &'a self,
        _auth: &'a DriveAuth,
        _remote_path: &'a str,
        conflict: ConflictPolicy,
        _bytes: Vec<u8>,
    ) -> DriveFuture<'a> {
        Box::pin(async move {
            self.enter();
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            self.conflicts
                .lock()
                .unwrap()
                .push(conflict.as_str().to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let step = self.put_script.lock().unwrap().pop_front();
            self.leave();
            match step {
                Some(step) => play(step),
                None => Ok(reply(201, r#"{"id":"x"}"#)),
            }
        })
    }

    fn list_children<'a>(&'a self, _auth: &'a DriveAuth, folder: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            self.listed.lock().unwrap().push(folder.to_string());
            let failing = self
                .list_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return play(Step::Transport);
            }
            let found = self.listings.lock().unwrap().get(folder).cloned();
            Ok(found.unwrap_or_else(|| reply(404, r#"{"error":{"code":"itemNotFound"}}"#)))
        })
    }

    fn get_page<'a>(&'a self, _auth: &'a DriveAuth, url: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            let found = self.pages.lock().unwrap().get(url).cloned();
            Ok(found.unwrap_or_else(|| reply(404, "{}")))
        })
    }

    fn create_upload_session<'a>(
        &'a self,
        _auth: &'a DriveAuth,
        _remote_path: &'a str,
        conflict: ConflictPolicy,
    ) -> DriveFuture<'a> {
        Box::pin(async move {
            self.conflicts
                .lock()
                .unwrap()
                .push(conflict.as_str().to_string());
            if let Some(step) = self.session_reply.lock().unwrap().take() {
                return play(step);
            }
            Ok(reply(
                200,
                format!(r#"{{"uploadUrl":"{UPLOAD_URL}","nextExpectedRanges":["0-"]}}"#),
            ))
        })
    }

    fn put_range<'a>(
        &'a self,
        upload_url: &'a str,
        range: ByteRange,
        _bytes: Vec<u8>,
    ) -> DriveFuture<'a> {
        Box::pin(async move {
            assert_eq!(upload_url, UPLOAD_URL);
            self.range_starts.lock().unwrap().push(range.start);
            let scripted = self.range_script.lock().unwrap().pop_front().flatten();
            match scripted {
                Some(Step::Lost) => {
                    self.commit(range);
                    play(Step::Lost)
                }
                Some(step) => play(step),
                None => Ok(self.commit(range)),
            }
        })
    }

    fn session_status<'a>(&'a self, _upload_url: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(reply(404, r#"{"error":{"code":"itemNotFound"}}"#));
            }
            let next = self.committed.load(Ordering::SeqCst);
            Ok(reply(200, format!(r#"{{"nextExpectedRanges":["{next}-"]}}"#)))
        })
    }

    fn get_item<'a>(&'a self, _auth: &'a DriveAuth, _remote_path: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            self.item_lookups.fetch_add(1, Ordering::SeqCst);
            if !self.closed.load(Ordering::SeqCst) {
                return Ok(reply(404, r#"{"error":{"code":"itemNotFound"}}"#));
            }
            let size = self.committed.load(Ordering::SeqCst);
            Ok(reply(200, format!(r#"{{"id":"big","size":{size}}}"#)))
        })
    }
}

fn write_file(path: PathBuf, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn config(threads: u32) -> RestoreConfig {
    let mut config = RestoreConfig::new(DriveAuth {
        account_id: "someone@example.com".to_string(),
        access_token: AccessToken::new("access"),
    });
    config.concurrency_limit = threads;
    config
}

const BIG_SIZE: usize = 4 * 1024 * 1024 + 1;

/// One file just over the single-shot limit, sent in 1 MiB-class chunks.
fn big_file(root: &Path) -> (Vec<FileToRestore>, RestoreConfig, u64) {
    write_file(root.join("big.bin"), &vec![7u8; BIG_SIZE]);
    let mut cfg = config(1);
    cfg.block_size_mb = 1;
    (
        scan_source(root).unwrap(),
        cfg,
        drive_restore_core::chunk_size_for(1),
    )
}

fn failure_reason(events: &[ProgressEvent], file: &str) -> String {
    events
        .iter()
        .find_map(|e| match e {
            ProgressEvent::Failed { path, reason } if path == file => Some(reason.clone()),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no failed event for {file}"))
}

fn small_files(root: &Path, n: u8) -> Vec<FileToRestore> {
    for i in 0..n {
        write_file(root.join(format!("f{i}.txt")), &[i; 128]);
    }
    scan_source(root).unwrap()
}

async fn run_with_events(
    drive: Arc<dyn DriveApi>,
    config: RestoreConfig,
    files: Vec<FileToRestore>,
) -> (drive_restore_core::Result<RestoreResult>, Vec<ProgressEvent>) {
    let (tx, rx) = ProgressSender::channel();
    let result = restore_files_with(
        drive,
        config,
        files,
        RestoreOptions { progress: Some(tx) },
    )
    .await;
    (result, drain(rx).await)
}

async fn drain(mut rx: ProgressReceiver) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn five_small_files_on_two_threads_all_succeed() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 5);
    let drive = Arc::new(FakeDrive::with_delay(Duration::from_millis(50)));

    let (result, events) = run_with_events(drive.clone(), config(2), files).await;
    let result = result.unwrap();

    assert_eq!(result.files_total, 5);
    assert_eq!(result.files_uploaded, 5);
    assert_eq!(result.files_failed, 0);
    assert_eq!(result.bytes_uploaded, 5 * 128);
    assert_eq!(drive.put_calls.load(Ordering::SeqCst), 5);
    assert_eq!(drive.max_concurrent.load(Ordering::SeqCst), 2);

    let succeeded = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Succeeded { .. }))
        .count();
    assert_eq!(succeeded, 5);
}

#[tokio::test]
async fn concurrency_never_exceeds_thread_count() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 12);
    let drive = Arc::new(FakeDrive::with_delay(Duration::from_millis(20)));

    let result = restore_files(drive.clone(), config(3), files).await.unwrap();

    assert_eq!(result.files_uploaded, 12);
    let max = drive.max_concurrent.load(Ordering::SeqCst);
    assert!((1..=3).contains(&max), "max concurrent was {max}");
}

#[tokio::test]
async fn nine_transport_failures_then_success_uses_ten_attempts() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 1);
    let drive = Arc::new(FakeDrive::default());
    drive.script_puts((0..9).map(|_| Step::Transport));

    let (result, events) = run_with_events(drive.clone(), config(1), files).await;
    let result = result.unwrap();

    assert_eq!(result.files_uploaded, 1);
    assert_eq!(drive.put_calls.load(Ordering::SeqCst), 10);
    let retries = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 9);
    assert!(matches!(events.last(), Some(ProgressEvent::Succeeded { .. })));
}

#[tokio::test]
async fn ten_transport_failures_abandon_the_file_only() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 2);
    let drive = Arc::new(FakeDrive::default());
    drive.script_puts((0..10).map(|_| Step::Transport));

    // One thread so the scripted failures all land on the first file.
    let (result, events) = run_with_events(drive.clone(), config(1), files).await;
    let result = result.unwrap();

    assert_eq!(result.files_failed, 1);
    assert_eq!(result.files_uploaded, 1);
    assert_eq!(drive.put_calls.load(Ordering::SeqCst), 11);

    let reason = failure_reason(&events, "f0.txt");
    assert!(reason.contains("gave up after 10 attempts"), "{reason}");
}

#[tokio::test]
async fn malformed_reply_aborts_the_restore() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 1);
    let drive = Arc::new(FakeDrive::default());
    drive.script_puts([Step::Reply(200, "<html>gateway</html>")]);

    let err = restore_files(drive.clone(), config(1), files)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Decode { .. }), "{err}");
    assert_eq!(drive.put_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn graph_error_reply_counts_as_failed_file() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 1);
    let drive = Arc::new(FakeDrive::default());
    drive.script_puts([Step::Reply(
        409,
        r#"{"error":{"code":"nameAlreadyExists","message":"exists"}}"#,
    )]);

    let mut cfg = config(1);
    cfg.conflict_policy = ConflictPolicy::Fail;
    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_failed, 1);
    assert_eq!(result.files_uploaded, 0);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Failed { reason, .. } if reason.contains("nameAlreadyExists")
    )));
}

#[tokio::test]
async fn conflict_policy_is_sent_on_every_request() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 3);
    let drive = Arc::new(FakeDrive::default());

    let mut cfg = config(2);
    cfg.conflict_policy = ConflictPolicy::Replace;
    restore_files(drive.clone(), cfg, files).await.unwrap();

    let conflicts = drive.conflicts.lock().unwrap().clone();
    assert_eq!(conflicts, vec!["replace"; 3]);
}

#[tokio::test]
async fn unreadable_file_fails_alone() {
    let temp = TempDir::new().unwrap();
    let mut files = small_files(temp.path(), 1);
    files.push(FileToRestore::new(
        "gone.txt",
        10,
        temp.path().join("gone.txt"),
    ));
    let drive = Arc::new(FakeDrive::default());

    let result = restore_files(drive.clone(), config(2), files).await.unwrap();

    assert_eq!(result.files_uploaded, 1);
    assert_eq!(result.files_failed, 1);
}

#[tokio::test]
async fn skip_existing_lists_each_parent_once() {
    let temp = TempDir::new().unwrap();
    for name in ["a.txt", "b.txt", "c.txt", "sub/d.txt", "sub/e.txt"] {
        write_file(temp.path().join(name), b"data");
    }
    let files = scan_source(temp.path()).unwrap();

    let drive = Arc::new(FakeDrive::default());
    drive.list_reply(
        "backup",
        200,
        r#"{"value":[{"name":"a.txt"}],"@odata.nextLink":"https://graph.example/next"}"#,
    );
    drive.page_reply("https://graph.example/next", r#"{"value":[{"name":"b.txt"}]}"#);

    let mut cfg = config(2);
    cfg.target_folder = "/backup/".to_string();
    cfg.skip_existing = true;
    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_total, 5);
    assert_eq!(result.files_skipped, 2);
    assert_eq!(result.files_uploaded, 3);
    assert_eq!(drive.put_calls.load(Ordering::SeqCst), 3);

    let mut listed = drive.listed.lock().unwrap().clone();
    listed.sort();
    assert_eq!(listed, vec!["backup".to_string(), "backup/sub".to_string()]);

    let skipped: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Skipped { .. }))
        .map(|e| e.path().to_string())
        .collect();
    assert_eq!(skipped, vec!["a.txt".to_string(), "b.txt".to_string()]);
}

#[tokio::test]
async fn listing_error_other_than_not_found_is_fatal() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 1);
    let drive = Arc::new(FakeDrive::default());
    drive.list_reply("", 401, r#"{"error":{"code":"InvalidAuthenticationToken"}}"#);

    let mut cfg = config(1);
    cfg.skip_existing = true;
    let err = restore_files(drive.clone(), cfg, files).await.unwrap_err();

    assert!(matches!(err, Error::Remote { status: 401, .. }), "{err}");
    assert_eq!(drive.put_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn large_file_resumes_from_next_expected_range() {
    let temp = TempDir::new().unwrap();
    let (files, cfg, chunk) = big_file(temp.path());
    let drive = Arc::new(FakeDrive::default());
    // First chunk lands, the second is cut off once.
    drive.script_ranges([None, Some(Step::Transport)]);

    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_uploaded, 1);
    assert_eq!(result.bytes_uploaded, BIG_SIZE as u64);

    let starts = drive.range_starts.lock().unwrap().clone();
    let mut expected = vec![0, chunk, chunk];
    let mut next = 2 * chunk;
    while next < BIG_SIZE as u64 {
        expected.push(next);
        next += chunk;
    }
    assert_eq!(starts, expected);

    assert!(events.iter().any(|e| matches!(e, ProgressEvent::Retrying { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::ChunkUploaded { uploaded, total, .. } if uploaded == total
    )));
}

#[tokio::test]
async fn server_error_on_a_chunk_is_retried() {
    let temp = TempDir::new().unwrap();
    let (files, cfg, chunk) = big_file(temp.path());
    let drive = Arc::new(FakeDrive::default());
    drive.script_ranges([
        None,
        Some(Step::Reply(503, r#"{"error":{"code":"serviceNotAvailable"}}"#)),
    ]);

    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_uploaded, 1);
    assert_eq!(result.files_failed, 0);
    let starts = drive.range_starts.lock().unwrap().clone();
    assert_eq!(&starts[..3], &[0, chunk, chunk]);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Retrying { attempt: 1, reason, .. } if reason.contains("http 503")
    )));
}

#[tokio::test]
async fn ten_failures_on_one_chunk_abandon_the_file() {
    let temp = TempDir::new().unwrap();
    let (files, cfg, chunk) = big_file(temp.path());
    let drive = Arc::new(FakeDrive::default());
    drive.script_ranges(std::iter::once(None).chain((0..10).map(|_| Some(Step::Transport))));

    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_failed, 1);
    assert_eq!(result.files_uploaded, 0);
    let starts = drive.range_starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 11);
    assert!(starts[1..].iter().all(|&s| s == chunk), "{starts:?}");

    let reason = failure_reason(&events, "big.bin");
    assert!(reason.contains("gave up after 10 attempts"), "{reason}");
    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Succeeded { .. })));
}

#[tokio::test]
async fn stalled_session_abandons_file_after_ten_attempts() {
    let temp = TempDir::new().unwrap();
    let (files, cfg, _) = big_file(temp.path());
    let drive = Arc::new(FakeDrive::default());
    // Accepts every range but keeps asking for byte 0.
    drive.script_ranges(
        (0..20).map(|_| Some(Step::Reply(202, r#"{"nextExpectedRanges":["0-"]}"#))),
    );

    let (result, events) = tokio::time::timeout(
        Duration::from_secs(5),
        run_with_events(drive.clone(), cfg, files),
    )
    .await
    .expect("stalled session must not loop forever");
    let result = result.unwrap();

    assert_eq!(result.files_failed, 1);
    let starts = drive.range_starts.lock().unwrap().clone();
    assert_eq!(starts, vec![0; 10]);

    let reason = failure_reason(&events, "big.bin");
    assert!(reason.contains("gave up after 10 attempts"), "{reason}");
    assert!(reason.contains("did not advance"), "{reason}");
}

#[tokio::test]
async fn session_refused_with_graph_error_fails_the_file() {
    let temp = TempDir::new().unwrap();
    let (files, mut cfg, _) = big_file(temp.path());
    cfg.conflict_policy = ConflictPolicy::Fail;
    let drive = Arc::new(FakeDrive::default());
    *drive.session_reply.lock().unwrap() = Some(Step::Reply(
        409,
        r#"{"error":{"code":"nameAlreadyExists","message":"exists"}}"#,
    ));

    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_failed, 1);
    assert_eq!(result.files_uploaded, 0);
    assert!(drive.range_starts.lock().unwrap().is_empty());
    let reason = failure_reason(&events, "big.bin");
    assert!(reason.contains("nameAlreadyExists"), "{reason}");
}

#[tokio::test]
async fn lost_reply_to_final_range_is_confirmed_by_item_lookup() {
    let temp = TempDir::new().unwrap();
    let (files, mut cfg, _) = big_file(temp.path());
    cfg.conflict_policy = ConflictPolicy::Replace;
    let drive = Arc::new(FakeDrive::default());
    drive.script_ranges([None, None, None, None, Some(Step::Lost)]);

    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_uploaded, 1);
    assert_eq!(result.files_failed, 0);
    // The committed range is not sent again.
    assert_eq!(drive.range_starts.lock().unwrap().len(), 5);
    assert_eq!(drive.item_lookups.load(Ordering::SeqCst), 1);
    assert!(matches!(events.last(), Some(ProgressEvent::Succeeded { .. })));
}

#[tokio::test]
async fn lost_reply_to_final_range_under_rename_is_not_guessed() {
    let temp = TempDir::new().unwrap();
    let (files, cfg, _) = big_file(temp.path());
    let drive = Arc::new(FakeDrive::default());
    drive.script_ranges([None, None, None, None, Some(Step::Lost)]);

    let (result, events) = run_with_events(drive.clone(), cfg, files).await;
    let result = result.unwrap();

    assert_eq!(result.files_failed, 1);
    assert_eq!(drive.range_starts.lock().unwrap().len(), 5);
    assert_eq!(drive.item_lookups.load(Ordering::SeqCst), 0);
    let reason = failure_reason(&events, "big.bin");
    assert!(reason.contains("cannot be confirmed"), "{reason}");
}

#[tokio::test]
async fn listing_transport_errors_are_retried() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path().join("a.txt"), b"data");
    write_file(temp.path().join("b.txt"), b"data");
    let files = scan_source(temp.path()).unwrap();

    let drive = Arc::new(FakeDrive::default());
    drive.list_reply("", 200, r#"{"value":[{"name":"a.txt"}]}"#);
    drive.list_failures.store(2, Ordering::SeqCst);

    let mut cfg = config(1);
    cfg.skip_existing = true;
    let result = restore_files(drive.clone(), cfg, files).await.unwrap();

    assert_eq!(result.files_skipped, 1);
    assert_eq!(result.files_uploaded, 1);
    assert_eq!(drive.listed.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn listing_that_never_answers_aborts_after_ten_attempts() {
    let temp = TempDir::new().unwrap();
    let files = small_files(temp.path(), 1);
    let drive = Arc::new(FakeDrive::default());
    drive.list_failures.store(usize::MAX, Ordering::SeqCst);

    let mut cfg = config(1);
    cfg.skip_existing = true;
    let err = restore_files(drive.clone(), cfg, files).await.unwrap_err();

    assert!(matches!(err, Error::Transport { .. }), "{err}");
    assert!(err.to_string().contains("gave up after 10 attempts"), "{err}");
    assert_eq!(drive.listed.lock().unwrap().len(), 10);
    assert_eq!(drive.put_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_threads_is_invalid_config() {
    let drive = Arc::new(FakeDrive::default());
    let err = restore_files(drive, config(0), Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
}
