mod classify;
mod config;
mod credential;
mod drive;
mod endpoint;
mod error;
mod identity;
mod logging;
mod notify;
mod progress;
mod restore;
mod scan;
mod upload;

pub const APP_NAME: &str = "driverestore";

pub use classify::{SINGLE_SHOT_MAX_BYTES, SizeClass, classify};
pub use config::{
    ACCOUNTS_DIR, AppConfig, AppRegistration, accounts_dir, config_path, load_app_config,
    parse_app_config, save_app_config,
};
pub use credential::{
    AccessToken, CredentialRecord, CredentialStore, DEFAULT_BLOCK_SIZE_MB, DEFAULT_LANGUAGE,
    DEFAULT_THREAD_COUNT, DEFAULT_TIMEOUT_SECONDS, DriveKind, RefreshOverrides,
    RefreshedCredential, extract_auth_code,
};
pub use drive::{
    ByteRange, CONFLICT_QUERY_KEY, ConflictPolicy, DriveApi, DriveAuth, DriveFuture, GraphDrive,
    HttpReply, remote_path,
};
pub use endpoint::{DEFAULT_REDIRECT_URI, EndpointConfig, Region};
pub use error::{Error, Result};
pub use identity::{HttpIdentityProvider, IdentityProvider, TokenGrant, TokenResponse};
pub use logging::{LOG_DIR_ENV, LOG_ENV, RunLogGuard, init_logging, start_run_log};
pub use notify::{
    ChatNotifier, NotificationSink, NotifierHandle, TelegramBotNotifier, TelegramNotifierConfig,
};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender};
pub use restore::{
    RestoreConfig, RestoreOptions, RestoreResult, graph_error, list_folder_names, restore_files,
    restore_files_with,
};
pub use scan::scan_source;
pub use upload::{
    CHUNK_ALIGN_BYTES, DEFAULT_MAX_ATTEMPTS, FileToRestore, JsonMap, ResumableUploader,
    RetryPolicy, SingleShotUploader, UploadOutcome, UploadTask, chunk_size_for,
};
