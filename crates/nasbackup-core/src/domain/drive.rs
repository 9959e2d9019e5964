//! Backup drive records
//!
//! A backup drive is the remote destination bound to one machine. The NAS
//! stores it with a `client` block that carries the machine binding and the
//! status the daemon last persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RemoteId;

/// Status of a backup drive, mirrored by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveStatus {
    /// No turn in progress
    #[default]
    Idle,
    /// A turn is running
    Working,
    /// The last turn failed and a retry is pending
    Failed,
}

impl std::fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriveStatus::Idle => "Idle",
            DriveStatus::Working => "Working",
            DriveStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Machine binding and status block of a backup drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveClient {
    /// Short machine identifier (last 8 characters of the machine id)
    pub id: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub status: DriveStatus,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_backup_time: Option<DateTime<Utc>>,
}

/// A remote drive as listed by `GET drives`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDrive {
    #[serde(rename = "uuid")]
    pub id: RemoteId,
    /// Drive type; backup drives use [`BackupDrive::KIND`]
    #[serde(rename = "type")]
    pub kind: String,
    /// Absent for drives that are not bound to a machine
    #[serde(default)]
    pub client: Option<DriveClient>,
}

impl BackupDrive {
    /// Drive type string of backup drives
    pub const KIND: &'static str = "backup";

    /// Builds a backup drive bound to `client_id`
    pub fn new(id: RemoteId, client_id: impl Into<String>) -> Self {
        Self {
            id,
            kind: Self::KIND.to_string(),
            client: Some(DriveClient {
                id: client_id.into(),
                disabled: false,
                status: DriveStatus::Idle,
                last_backup_time: None,
            }),
        }
    }

    pub fn is_backup(&self) -> bool {
        self.kind == Self::KIND
    }

    /// True when this is a backup drive bound to the given machine suffix
    pub fn belongs_to(&self, client_id: &str) -> bool {
        self.is_backup() && self.client.as_ref().is_some_and(|c| c.id == client_id)
    }

    /// A drive without a client block is treated as disabled
    pub fn is_disabled(&self) -> bool {
        self.client.as_ref().map_or(true, |c| c.disabled)
    }

    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.client.as_ref().and_then(|c| c.last_backup_time)
    }
}

/// Partial update of a drive's client block (`updateBackupDrive`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DriveStatus>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_backup_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl DrivePatch {
    /// Patch that only changes the status
    pub fn status(status: DriveStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_last_backup_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_backup_time = Some(at);
        self
    }

    /// Applies the patch to a local copy of the drive.
    pub fn apply(&self, drive: &mut BackupDrive) {
        let Some(client) = drive.client.as_mut() else {
            return;
        };
        if let Some(status) = self.status {
            client.status = status;
        }
        if let Some(at) = self.last_backup_time {
            client.last_backup_time = Some(at);
        }
        if let Some(disabled) = self.disabled {
            client.disabled = disabled;
        }
    }
}
