use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::classify::SizeClass;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    Started {
        path: String,
        size: u64,
        class: SizeClass,
    },
    Retrying {
        path: String,
        attempt: u32,
        reason: String,
    },
    ChunkUploaded {
        path: String,
        uploaded: u64,
        total: u64,
    },
    Succeeded {
        path: String,
    },
    Failed {
        path: String,
        reason: String,
    },
    Skipped {
        path: String,
    },
}

impl ProgressEvent {
    pub fn path(&self) -> &str {
        match self {
            ProgressEvent::Started { path, .. }
            | ProgressEvent::Retrying { path, .. }
            | ProgressEvent::ChunkUploaded { path, .. }
            | ProgressEvent::Succeeded { path }
            | ProgressEvent::Failed { path, .. }
            | ProgressEvent::Skipped { path } => path,
        }
    }

    /// No further events follow for this path.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Succeeded { .. }
                | ProgressEvent::Failed { .. }
                | ProgressEvent::Skipped { .. }
        )
    }

    pub fn text(&self) -> String {
        match self {
            ProgressEvent::Started { path, size, class } => {
                let class = match class {
                    SizeClass::Small => "single",
                    SizeClass::Large => "chunked",
                };
                format!("uploading {path} ({size} bytes, {class})")
            }
            ProgressEvent::Retrying {
                path,
                attempt,
                reason,
            } => format!("retry {attempt} for {path}: {reason}"),
            ProgressEvent::ChunkUploaded {
                path,
                uploaded,
                total,
            } => {
                let pct = if *total == 0 {
                    100
                } else {
                    uploaded.saturating_mul(100) / total
                };
                format!("uploading {path}: {uploaded}/{total} bytes ({pct}%)")
            }
            ProgressEvent::Succeeded { path } => format!("uploaded {path}"),
            ProgressEvent::Failed { path, reason } => format!("failed {path}: {reason}"),
            ProgressEvent::Skipped { path } => format!("skipped {path} (already exists)"),
        }
    }
}

pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Sending half handed to upload tasks. Events are dropped once the
/// receiver is gone; reporting never fails an upload.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    pub fn channel() -> (Self, ProgressReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
