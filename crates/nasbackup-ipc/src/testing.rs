//! Test doubles for the gateway and D-Bus tests

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::anyhow;
use nasbackup_core::{
    domain::{
        BackupDrive, DirectoryAttrs, DirectoryListing, DirectoryStatus, DrivePatch, EntryKind,
        EntryMetadata, EntryUpdate, RemoteEntry, RemoteId,
    },
    ports::{ChangeSink, FileUpload, IPowerSaveBlocker, IRemoteDrive, IWatchProvider, WatchHandle},
};
use nasbackup_sync::{task::UploadTaskFactory, BackupDeps, EventHub};

pub fn id(s: &str) -> RemoteId {
    RemoteId::new(s).unwrap()
}

pub fn drive(drive_id: &str, client_id: &str, disabled: bool) -> BackupDrive {
    let mut drive = BackupDrive::new(id(drive_id), client_id);
    if let Some(client) = drive.client.as_mut() {
        client.disabled = disabled;
    }
    drive
}

/// Top-level directory bound to `local`
pub fn dir_entry(dir_id: &str, local: &Path, disabled: bool) -> RemoteEntry {
    RemoteEntry {
        id: id(dir_id),
        name: local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        kind: EntryKind::Directory,
        size: None,
        bctime: None,
        bmtime: None,
        deleted: false,
        archived: false,
        metadata: Some(EntryMetadata {
            local_path: local.to_path_buf(),
            disabled,
            status: DirectoryStatus::Idle,
            last_backup_time: None,
        }),
    }
}

/// Remote that serves fixed listings and counts calls by method name
#[derive(Default)]
pub struct StubRemote {
    drives: Mutex<Vec<BackupDrive>>,
    listings: Mutex<HashMap<RemoteId, Vec<RemoteEntry>>>,
    calls: Mutex<Vec<&'static str>>,
    next_id: AtomicUsize,
}

impl StubRemote {
    pub fn with_drives(drives: Vec<BackupDrive>) -> Self {
        Self {
            drives: Mutex::new(drives),
            ..Self::default()
        }
    }

    pub fn set_listing(&self, dir: &str, entries: Vec<RemoteEntry>) {
        self.listings.lock().unwrap().insert(id(dir), entries);
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| **m == method)
            .count()
    }

    fn fresh_id(&self) -> RemoteId {
        id(&format!("entry-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().unwrap().push(method);
    }
}

#[async_trait::async_trait]
impl IRemoteDrive for StubRemote {
    async fn list_drives(&self) -> anyhow::Result<Vec<BackupDrive>> {
        self.record("list_drives");
        Ok(self.drives.lock().unwrap().clone())
    }

    async fn list_directory(
        &self,
        _drive: &RemoteId,
        dir: &RemoteId,
    ) -> anyhow::Result<DirectoryListing> {
        self.record("list_directory");
        let entries = self
            .listings
            .lock()
            .unwrap()
            .get(dir)
            .cloned()
            .unwrap_or_default();
        Ok(DirectoryListing { entries })
    }

    async fn create_backup_directory(
        &self,
        _drive: &RemoteId,
        _dir: &RemoteId,
        name: &str,
        attrs: &DirectoryAttrs,
    ) -> anyhow::Result<RemoteEntry> {
        self.record("create_backup_directory");
        Ok(RemoteEntry {
            id: self.fresh_id(),
            name: name.to_string(),
            kind: EntryKind::Directory,
            size: None,
            bctime: attrs.bctime,
            bmtime: attrs.bmtime,
            deleted: false,
            archived: false,
            metadata: attrs.metadata.clone(),
        })
    }

    async fn update_entries(
        &self,
        _drive: &RemoteId,
        _dir: &RemoteId,
        _updates: &[EntryUpdate],
    ) -> anyhow::Result<()> {
        self.record("update_entries");
        Ok(())
    }

    async fn update_backup_drive(
        &self,
        drive: &RemoteId,
        patch: &DrivePatch,
    ) -> anyhow::Result<BackupDrive> {
        self.record("update_backup_drive");
        let mut drives = self.drives.lock().unwrap();
        let stored = drives
            .iter_mut()
            .find(|d| &d.id == drive)
            .ok_or_else(|| anyhow!("unknown drive {drive}"))?;
        patch.apply(stored);
        Ok(stored.clone())
    }

    async fn create_backup_drive(&self, client_id: &str) -> anyhow::Result<BackupDrive> {
        self.record("create_backup_drive");
        let drive = BackupDrive::new(id("drive-new"), client_id);
        self.drives.lock().unwrap().push(drive.clone());
        Ok(drive)
    }

    async fn upload_file(
        &self,
        _drive: &RemoteId,
        _dir: &RemoteId,
        file: &FileUpload,
    ) -> anyhow::Result<RemoteEntry> {
        self.record("upload_file");
        Ok(RemoteEntry {
            id: self.fresh_id(),
            name: file.name.clone(),
            kind: EntryKind::File,
            size: Some(file.size),
            bctime: file.bctime,
            bmtime: file.bmtime,
            deleted: false,
            archived: false,
            metadata: None,
        })
    }
}

pub struct NoopWatcher;

impl IWatchProvider for NoopWatcher {
    fn watch(&self, _root: &Path, _sink: ChangeSink) -> anyhow::Result<WatchHandle> {
        Ok(WatchHandle::noop())
    }
}

pub struct NoopPower;

impl IPowerSaveBlocker for NoopPower {
    fn acquire(&self, _tag: &str) {}
    fn release(&self, _tag: &str) {}
}

/// Real upload tasks over `remote`, reporting into `hub`
pub fn backup_deps(remote: Arc<StubRemote>, hub: Arc<EventHub>) -> BackupDeps {
    BackupDeps {
        remote: remote.clone(),
        tasks: Arc::new(UploadTaskFactory::new(remote)),
        watcher: Arc::new(NoopWatcher),
        power: Arc::new(NoopPower),
        observer: hub,
    }
}
