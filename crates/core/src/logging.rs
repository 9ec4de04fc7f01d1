use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Utc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "DRIVERESTORE_LOG";
pub const LOG_DIR_ENV: &str = "DRIVERESTORE_LOG_DIR";

static RUN_LOG: OnceLock<RunLog> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// NDJSON sink shared by the json layer. Writes go nowhere until a run
/// log file is opened.
#[derive(Debug, Default)]
struct RunLog {
    writer: Mutex<Option<BufWriter<std::fs::File>>>,
}

impl RunLog {
    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<std::fs::File>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, path: &Path) -> std::io::Result<()> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "run log already open",
            ));
        }
        let file = OpenOptions::new().create_new(true).write(true).open(path)?;
        *guard = Some(BufWriter::new(file));
        Ok(())
    }

    fn close(&self) -> std::io::Result<()> {
        let Some(mut writer) = self.lock().take() else {
            return Ok(());
        };
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

struct RunLogWriter<'a>(MutexGuard<'a, Option<BufWriter<std::fs::File>>>);

impl Write for RunLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.as_mut() {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RunLog {
    type Writer = RunLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter(self.lock())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for &RunLog {
    type Writer = RunLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        (**self).make_writer()
    }
}

fn build_env_filter_from(driverestore_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    let default = || EnvFilter::new("info");

    if let Some(v) = driverestore_log {
        return EnvFilter::try_new(v).unwrap_or_else(|_| default());
    }
    if let Some(v) = rust_log {
        return EnvFilter::try_new(v).unwrap_or_else(|_| default());
    }
    default()
}

fn build_env_filter() -> EnvFilter {
    build_env_filter_from(
        std::env::var(LOG_ENV).ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    )
}

/// Installs the global subscriber once: human-readable lines on stderr plus
/// the NDJSON layer that `start_run_log` points at a file.
pub fn init_logging() {
    TRACING_INIT.get_or_init(|| {
        let run_log = RUN_LOG.get_or_init(RunLog::default);

        let console = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);
        let ndjson = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_writer(run_log);

        let _ = tracing_subscriber::registry()
            .with(build_env_filter())
            .with(console)
            .with(ndjson)
            .try_init();
    });
}

/// Flushes and closes the run log file when dropped.
pub struct RunLogGuard {
    path: PathBuf,
}

impl RunLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        if let Some(run_log) = RUN_LOG.get() {
            let _ = run_log.close();
        }
    }
}

/// Opens `restore-<UTC>-<run id>.ndjson` under `log_dir`, or under
/// `$DRIVERESTORE_LOG_DIR` when no directory is given. `Ok(None)` when
/// neither is set.
pub fn start_run_log(run_id: &str, log_dir: Option<&Path>) -> std::io::Result<Option<RunLogGuard>> {
    init_logging();

    let Some(log_dir) = resolve_log_dir(log_dir) else {
        return Ok(None);
    };
    std::fs::create_dir_all(&log_dir)?;

    let file_name = format!(
        "restore-{}-{}.ndjson",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        sanitize_filename_component(run_id)
    );
    let path = log_dir.join(file_name);
    RUN_LOG.get_or_init(RunLog::default).open(&path)?;
    Ok(Some(RunLogGuard { path }))
}

fn resolve_log_dir(log_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = log_dir {
        return Some(dir.to_path_buf());
    }
    std::env::var(LOG_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn sanitize_filename_component(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}
