use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use drive_restore_core::{
    APP_NAME, ChatNotifier, ConflictPolicy, CredentialRecord, CredentialStore, DriveAuth,
    DriveKind, EndpointConfig, GraphDrive, HttpIdentityProvider, NotificationSink,
    ProgressReceiver, ProgressSender, RefreshOverrides, Region, RestoreConfig, RestoreOptions,
    TelegramBotNotifier, TelegramNotifierConfig, accounts_dir, init_logging, load_app_config,
    restore_files_with, scan_source, start_run_log,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "driverestore")]
#[command(about = "Upload a local folder tree into a OneDrive account", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    /// Print progress events as NDJSON on stdout.
    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the URL to open in a browser to start authorization.
    LoginUrl {
        #[arg(long)]
        china: bool,
    },
    /// Store a credential from the redirect URL the browser landed on.
    Auth {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "business")]
        kind: String,
        #[arg(long)]
        china: bool,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Restore(RestoreArgs),
}

#[derive(clap::Args)]
struct RestoreArgs {
    #[arg(long)]
    credential: PathBuf,
    #[arg(long)]
    source: PathBuf,
    #[arg(long, default_value = "")]
    target: String,
    #[arg(long)]
    threads: Option<u32>,
    #[arg(long)]
    block_mb: Option<u32>,
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long, default_value = "rename")]
    conflict: String,
    #[arg(long)]
    skip_existing: bool,
    #[arg(long)]
    notifier_key: Option<String>,
    #[arg(long)]
    notifier_target: Option<String>,
    #[arg(long)]
    lang: Option<String>,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(event = "cli.failed", code = e.code, message = %e.message, "cli.failed");
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| {
            std::env::var("DRIVERESTORE_CONFIG_DIR")
                .ok()
                .map(PathBuf::from)
        })
        .unwrap_or_else(default_config_dir);

    match cli.cmd {
        Command::LoginUrl { china } => login_url(&config_dir, china, cli.json),
        Command::Auth {
            url,
            kind,
            china,
            dir,
        } => auth(&config_dir, &url, &kind, china, dir, cli.json).await,
        Command::Restore(args) => {
            restore_run(
                &config_dir,
                cli.log_dir.as_deref(),
                args,
                cli.json,
                cli.events,
            )
            .await
        }
    }
}

fn endpoints_for(config_dir: &Path, region: Region) -> Result<EndpointConfig, CliError> {
    let app = load_app_config(config_dir).map_err(map_core_err)?;
    let registration = app.registration(region).map_err(map_core_err)?;
    Ok(EndpointConfig::new(region, registration))
}

fn login_url(config_dir: &Path, china: bool, json: bool) -> Result<(), CliError> {
    let endpoints = endpoints_for(config_dir, Region::from_mainland_flag(china))?;
    let url = endpoints.login_url().map_err(map_core_err)?;
    if json {
        println!("{}", serde_json::json!({ "url": url }));
    } else {
        println!("{url}");
    }
    Ok(())
}

async fn auth(
    config_dir: &Path,
    redirect_url: &str,
    kind: &str,
    china: bool,
    dir: Option<PathBuf>,
    json: bool,
) -> Result<(), CliError> {
    let drive_kind: DriveKind = kind.parse().map_err(map_core_err)?;
    let endpoints = endpoints_for(config_dir, Region::from_mainland_flag(china))?;
    let provider = HttpIdentityProvider::new(endpoints).map_err(map_core_err)?;
    let store = CredentialStore::new(Arc::new(provider));

    let dir = dir.unwrap_or_else(|| accounts_dir(config_dir));
    let path = store
        .authorize(redirect_url, drive_kind, china, &dir)
        .await
        .map_err(map_core_err)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "credential": path.display().to_string() })
        );
    } else {
        println!("credential={}", path.display());
    }
    Ok(())
}

async fn restore_run(
    config_dir: &Path,
    log_dir: Option<&Path>,
    args: RestoreArgs,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    let conflict_policy: ConflictPolicy = args.conflict.parse().map_err(map_core_err)?;
    if args.threads == Some(0) {
        return Err(CliError::new("config.invalid", "--threads must be >= 1"));
    }
    if args.block_mb == Some(0) {
        return Err(CliError::new("config.invalid", "--block-mb must be >= 1"));
    }

    let run_id = format!("run_{}", uuid::Uuid::new_v4());
    let _run_log = start_run_log(&run_id, log_dir)
        .map_err(|e| CliError::new("log.open_failed", e.to_string()))?;

    // Scan before refreshing so a bad source never consumes the token.
    let files = scan_source(&args.source).map_err(map_core_err)?;

    let stored = CredentialRecord::load(&args.credential).map_err(map_core_err)?;
    let endpoints = endpoints_for(
        config_dir,
        Region::from_mainland_flag(stored.is_mainland_endpoint),
    )?;
    let provider = HttpIdentityProvider::new(endpoints.clone()).map_err(map_core_err)?;
    let store = CredentialStore::new(Arc::new(provider));

    let overrides = RefreshOverrides {
        thread_count: args.threads,
        block_size_mb: args.block_mb,
        language: args.lang,
        timeout_seconds: args.timeout,
        notifier_key: args.notifier_key,
        notifier_target_id: args.notifier_target,
    };
    let refreshed = store
        .refresh(&args.credential, &overrides)
        .await
        .map_err(map_core_err)?;
    let account_id = CredentialStore::account_id(&args.credential).map_err(map_core_err)?;
    let record = refreshed.record;

    let drive = Arc::new(GraphDrive::new(
        &endpoints,
        Duration::from_secs(record.timeout_seconds),
    ));
    let notifier: Option<Arc<dyn ChatNotifier>> = if record.notifier_enabled() {
        Some(Arc::new(TelegramBotNotifier::new(TelegramNotifierConfig {
            bot_token: record.notifier_key.clone(),
            chat_id: record.notifier_target_id.clone(),
        })))
    } else {
        None
    };

    let mut config = RestoreConfig::new(DriveAuth {
        account_id,
        access_token: refreshed.access_token,
    });
    config.target_folder = args.target;
    config.conflict_policy = conflict_policy;
    config.concurrency_limit = record.thread_count;
    config.block_size_mb = record.block_size_mb;
    config.skip_existing = args.skip_existing;

    if events {
        println!(
            "{}",
            serde_json::json!({
                "type": "task.state",
                "taskId": run_id,
                "kind": "restore",
                "state": "running"
            })
        );
    }

    let (progress, receiver) = ProgressSender::channel();
    let restore = restore_files_with(
        drive,
        config,
        files,
        RestoreOptions {
            progress: Some(progress),
        },
    );
    let sink = forward_progress(NotificationSink::new(notifier), receiver, &run_id, events);
    let (res, ()) = tokio::try_join!(restore, sink).map_err(map_core_err)?;

    if events {
        println!(
            "{}",
            serde_json::json!({
                "type": "task.state",
                "taskId": run_id,
                "kind": "restore",
                "state": "succeeded",
                "result": res,
            })
        );
        return Ok(());
    }

    if json {
        println!(
            "{}",
            serde_json::to_string(&res).map_err(|e| CliError::new("unknown", e.to_string()))?
        );
    } else {
        println!(
            "filesTotal={} filesUploaded={} filesFailed={} filesSkipped={} bytesUploaded={}",
            res.files_total,
            res.files_uploaded,
            res.files_failed,
            res.files_skipped,
            res.bytes_uploaded
        );
    }
    Ok(())
}

async fn forward_progress(
    mut sink: NotificationSink,
    mut receiver: ProgressReceiver,
    run_id: &str,
    events: bool,
) -> drive_restore_core::Result<()> {
    while let Some(event) = receiver.recv().await {
        if events {
            println!(
                "{}",
                serde_json::json!({
                    "type": "task.progress",
                    "taskId": run_id,
                    "progress": event,
                })
            );
        }
        sink.handle(&event).await?;
    }
    Ok(())
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn map_core_err(e: drive_restore_core::Error) -> CliError {
    use drive_restore_core::Error;
    match e {
        Error::InvalidConfig { message } => CliError::new("config.invalid", message),
        Error::Transport { message } => CliError::retryable("drive.unavailable", message),
        e @ Error::Decode { .. } => CliError::new("drive.bad_response", e.to_string()),
        e @ Error::Remote { .. } => CliError::new("drive.http_error", e.to_string()),
        Error::Auth { message } => CliError::new("auth.failed", message),
        e @ Error::Identity { .. } => CliError::new("auth.identity_unresolved", e.to_string()),
        Error::Notifier { message } => CliError::retryable("notifier.unavailable", message),
        e @ (Error::Io(_) | Error::Walkdir(_) | Error::NonUtf8Path { .. }) => {
            CliError::new("io.failed", e.to_string())
        }
        other => CliError::new("unknown", other.to_string()),
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
