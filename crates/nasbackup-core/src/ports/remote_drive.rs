//! Remote drive port (driven/secondary port)
//!
//! Everything the daemon reads from or writes to the NAS goes through
//! [`IRemoteDrive`]. Uses `anyhow::Result` because transport errors are
//! adapter-specific.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::domain::{
    BackupDrive, DirectoryAttrs, DirectoryListing, DrivePatch, EntryUpdate, RemoteEntry,
    RemoteId,
};

/// A local file to be stored in a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub bctime: Option<DateTime<Utc>>,
    pub bmtime: Option<DateTime<Utc>>,
}

/// Port trait for the NAS backend
///
/// ## Implementation Notes
///
/// - The top-level directory of a drive has the same id as the drive, so
///   roots are listed with `list_directory(drive, drive)`.
/// - `update_backup_drive` returns the drive as stored after the update.
/// - No method carries a timeout; a call that never resolves stalls the
///   turn that issued it.
#[async_trait::async_trait]
pub trait IRemoteDrive: Send + Sync {
    /// Lists every drive visible to the logged-in user
    async fn list_drives(&self) -> anyhow::Result<Vec<BackupDrive>>;

    /// Lists the entries of one remote directory
    async fn list_directory(
        &self,
        drive: &RemoteId,
        dir: &RemoteId,
    ) -> anyhow::Result<DirectoryListing>;

    /// Creates a directory named `name` under `dir` and returns the new record
    async fn create_backup_directory(
        &self,
        drive: &RemoteId,
        dir: &RemoteId,
        name: &str,
        attrs: &DirectoryAttrs,
    ) -> anyhow::Result<RemoteEntry>;

    /// Applies a batch of attribute updates to children of `dir`
    async fn update_entries(
        &self,
        drive: &RemoteId,
        dir: &RemoteId,
        updates: &[EntryUpdate],
    ) -> anyhow::Result<()>;

    /// Persists drive-level status and timestamps
    async fn update_backup_drive(
        &self,
        drive: &RemoteId,
        patch: &DrivePatch,
    ) -> anyhow::Result<BackupDrive>;

    /// Provisions a backup drive bound to `client_id`
    async fn create_backup_drive(&self, client_id: &str) -> anyhow::Result<BackupDrive>;

    /// Uploads (or overwrites) one file in `dir`
    async fn upload_file(
        &self,
        drive: &RemoteId,
        dir: &RemoteId,
        file: &FileUpload,
    ) -> anyhow::Result<RemoteEntry>;
}
