//! Outbound broadcast port
//!
//! The controller reports everything the UI shows through
//! [`IBackupObserver::publish`]. Delivery is best effort and never blocks
//! the controller.

use serde::{Deserialize, Serialize};

use crate::domain::{ErrorSnapshot, ProgressReport, RemoteId};

/// Coarse usage-telemetry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub category: String,
    pub action: String,
    pub msg: String,
}

impl UsageEvent {
    pub const CATEGORY: &'static str = "backup";

    /// Error report, mirrored to the log
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            category: Self::CATEGORY.to_string(),
            action: "error".to_string(),
            msg: msg.into(),
        }
    }

    /// `"<finished files>;<completed bytes>"` for a successful turn
    pub fn count(finish_count: u64, complete_size: u64) -> Self {
        Self {
            category: Self::CATEGORY.to_string(),
            action: "count".to_string(),
            msg: format!("{finish_count};{complete_size}"),
        }
    }
}

/// Everything the controller broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum BackupEvent {
    /// Periodic progress sample
    Progress(ProgressReport),
    /// Current error/warning lists
    Report(ErrorSnapshot),
    /// A remote directory listing of the drive changed
    DriveListUpdated { drive_id: RemoteId },
    /// A reconciliation pass finished
    BackupRootUpdated,
    Usage(UsageEvent),
}

pub trait IBackupObserver: Send + Sync {
    fn publish(&self, event: BackupEvent);
}
