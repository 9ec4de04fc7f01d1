use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    /// Connection-level failure; the only class the uploaders retry.
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("invalid json: {message}; body={body}")]
    Decode { message: String, body: String },

    #[error("drive api returned http {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("authorization failed: {message}")]
    Auth { message: String },

    #[error("cannot resolve account identity from profile: {body}")]
    Identity { body: String },

    #[error("chat notifier error: {message}")]
    Notifier { message: String },

    #[error("upload task failed to join: {message}")]
    TaskJoin { message: String },

    #[error("unsupported path (must be UTF-8): {path:?}")]
    NonUtf8Path { path: PathBuf },
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub(crate) fn transport(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Transport {
            message: format!("{context}: {err}"),
        }
    }

    pub(crate) fn decode(err: serde_json::Error, body: &[u8]) -> Self {
        Error::Decode {
            message: err.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}
