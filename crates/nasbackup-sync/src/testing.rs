//! In-memory port implementations shared by the unit tests

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::anyhow;
use nasbackup_core::{
    domain::{
        BackupDrive, DirectoryAttrs, DirectoryListing, DrivePatch, EntryKind, EntryUpdate,
        RemoteEntry, RemoteId, TaskCounters,
    },
    ports::{
        BackupEvent, BackupRoot, ChangeSink, FileUpload, IBackupObserver, IBackupTask,
        IPowerSaveBlocker, IRemoteDrive, ITaskFactory, IWatchProvider, TaskReport, WatchHandle,
    },
};
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum RemoteCall {
    ListDrives,
    ListDirectory { dir: RemoteId },
    CreateDirectory { dir: RemoteId, name: String },
    UpdateEntries { dir: RemoteId, updates: Vec<EntryUpdate> },
    UpdateDrive { patch: DrivePatch, at: Instant },
    CreateDrive,
    Upload { dir: RemoteId, name: String },
}

#[derive(Default)]
pub struct MockRemote {
    calls: Mutex<Vec<RemoteCall>>,
    listings: Mutex<HashMap<RemoteId, DirectoryListing>>,
    drives: Mutex<Vec<BackupDrive>>,
    fail_listing: AtomicBool,
    fail_drive_updates: AtomicUsize,
    fail_uploads: AtomicBool,
    next_id: AtomicUsize,
}

impl MockRemote {
    pub fn set_listing(&self, dir: &RemoteId, entries: Vec<RemoteEntry>) {
        self.listings
            .lock()
            .unwrap()
            .insert(dir.clone(), DirectoryListing { entries });
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Fails the next `n` drive updates
    pub fn fail_drive_updates(&self, n: usize) {
        self.fail_drive_updates.store(n, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, pred: impl Fn(&RemoteCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn entry_updates(&self) -> Vec<EntryUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::UpdateEntries { updates, .. } => Some(updates),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn drive_patches(&self) -> Vec<(DrivePatch, Instant)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::UpdateDrive { patch, at } => Some((patch, at)),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Upload { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn fresh_id(&self) -> RemoteId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        RemoteId::new(format!("new-{n}")).unwrap()
    }

    fn store(&self, dir: &RemoteId, entry: RemoteEntry) {
        let mut listings = self.listings.lock().unwrap();
        let listing = listings.entry(dir.clone()).or_default();
        listing.entries.retain(|e| e.name != entry.name);
        listing.entries.push(entry);
    }
}

#[async_trait::async_trait]
impl IRemoteDrive for MockRemote {
    async fn list_drives(&self) -> anyhow::Result<Vec<BackupDrive>> {
        self.record(RemoteCall::ListDrives);
        Ok(self.drives.lock().unwrap().clone())
    }

    async fn list_directory(
        &self,
        _drive: &RemoteId,
        dir: &RemoteId,
    ) -> anyhow::Result<DirectoryListing> {
        self.record(RemoteCall::ListDirectory { dir: dir.clone() });
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(anyhow!("listing unavailable"));
        }
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(dir)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_backup_directory(
        &self,
        _drive: &RemoteId,
        dir: &RemoteId,
        name: &str,
        attrs: &DirectoryAttrs,
    ) -> anyhow::Result<RemoteEntry> {
        self.record(RemoteCall::CreateDirectory {
            dir: dir.clone(),
            name: name.to_string(),
        });
        let entry = RemoteEntry {
            id: self.fresh_id(),
            name: name.to_string(),
            kind: EntryKind::Directory,
            size: None,
            bctime: attrs.bctime,
            bmtime: attrs.bmtime,
            deleted: false,
            archived: false,
            metadata: attrs.metadata.clone(),
        };
        self.store(dir, entry.clone());
        Ok(entry)
    }

    async fn update_entries(
        &self,
        _drive: &RemoteId,
        dir: &RemoteId,
        updates: &[EntryUpdate],
    ) -> anyhow::Result<()> {
        self.record(RemoteCall::UpdateEntries {
            dir: dir.clone(),
            updates: updates.to_vec(),
        });
        Ok(())
    }

    async fn update_backup_drive(
        &self,
        drive: &RemoteId,
        patch: &DrivePatch,
    ) -> anyhow::Result<BackupDrive> {
        self.record(RemoteCall::UpdateDrive {
            patch: patch.clone(),
            at: Instant::now(),
        });
        let pending = self.fail_drive_updates.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_drive_updates.store(pending - 1, Ordering::SeqCst);
            return Err(anyhow!("drive update rejected"));
        }
        let mut drives = self.drives.lock().unwrap();
        let stored = match drives.iter_mut().find(|d| &d.id == drive) {
            Some(d) => d,
            None => {
                drives.push(BackupDrive::new(drive.clone(), "a1b2c3d4"));
                drives.last_mut().unwrap()
            }
        };
        patch.apply(stored);
        Ok(stored.clone())
    }

    async fn create_backup_drive(&self, client_id: &str) -> anyhow::Result<BackupDrive> {
        self.record(RemoteCall::CreateDrive);
        let drive = BackupDrive::new(self.fresh_id(), client_id);
        self.drives.lock().unwrap().push(drive.clone());
        Ok(drive)
    }

    async fn upload_file(
        &self,
        _drive: &RemoteId,
        dir: &RemoteId,
        file: &FileUpload,
    ) -> anyhow::Result<RemoteEntry> {
        self.record(RemoteCall::Upload {
            dir: dir.clone(),
            name: file.name.clone(),
        });
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow!("upload refused"));
        }
        let entry = RemoteEntry {
            id: self.fresh_id(),
            name: file.name.clone(),
            kind: EntryKind::File,
            size: Some(file.size),
            bctime: file.bctime,
            bmtime: file.bmtime,
            deleted: false,
            archived: false,
            metadata: None,
        };
        self.store(dir, entry.clone());
        Ok(entry)
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<BackupEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<BackupEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&BackupEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl IBackupObserver for RecordingObserver {
    fn publish(&self, event: BackupEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Power blocker that tracks the balance of acquire/release calls
#[derive(Default)]
pub struct CountingPower {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl CountingPower {
    pub fn held(&self) -> bool {
        self.acquired.load(Ordering::SeqCst) > self.released.load(Ordering::SeqCst)
    }
}

impl IPowerSaveBlocker for CountingPower {
    fn acquire(&self, _tag: &str) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, _tag: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Watch provider that hands out sinks so tests can inject events
#[derive(Default)]
pub struct ManualWatcher {
    sinks: Mutex<Vec<(std::path::PathBuf, ChangeSink)>>,
    pub stopped: Arc<AtomicUsize>,
}

impl ManualWatcher {
    /// Pushes an event into the most recent sink registered for `root`
    pub fn emit(&self, root: &Path, event: nasbackup_core::domain::FileChangeEvent) {
        let sink = self
            .sinks
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(r, _)| r == root)
            .map(|(_, s)| Arc::clone(s))
            .expect("root is watched");
        sink(event);
    }

    pub fn watch_count(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }
}

impl IWatchProvider for ManualWatcher {
    fn watch(&self, root: &Path, sink: ChangeSink) -> anyhow::Result<WatchHandle> {
        self.sinks.lock().unwrap().push((root.to_path_buf(), sink));
        let stopped = Arc::clone(&self.stopped);
        Ok(WatchHandle::new(move || {
            stopped.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Task factory whose tasks block until the gate opens
pub struct GatedTasks {
    gate: watch::Sender<bool>,
    report: Mutex<TaskReport>,
    counters: Mutex<TaskCounters>,
    pub created: AtomicUsize,
    pub finished: Arc<AtomicUsize>,
    pub roots: Mutex<Vec<BackupRoot>>,
}

impl GatedTasks {
    /// `open` decides whether tasks complete right away
    pub fn new(open: bool) -> Self {
        let (gate, _) = watch::channel(open);
        Self {
            gate,
            report: Mutex::new(TaskReport::default()),
            counters: Mutex::new(TaskCounters::default()),
            created: AtomicUsize::new(0),
            finished: Arc::new(AtomicUsize::new(0)),
            roots: Mutex::new(Vec::new()),
        }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn set_report(&self, report: TaskReport) {
        *self.report.lock().unwrap() = report;
    }

    pub fn set_counters(&self, counters: TaskCounters) {
        *self.counters.lock().unwrap() = counters;
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

struct GatedTask {
    gate: watch::Receiver<bool>,
    report: TaskReport,
    counters: TaskCounters,
    cancel: CancellationToken,
    finished: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl IBackupTask for GatedTask {
    async fn run(&self) -> TaskReport {
        let mut gate = self.gate.clone();
        tokio::select! {
            _ = gate.wait_for(|open| *open) => self.report.clone(),
            _ = self.cancel.cancelled() => TaskReport::default(),
        }
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
    }

    fn counters(&self) -> TaskCounters {
        self.counters
    }
}

impl ITaskFactory for GatedTasks {
    fn create(&self, root: &BackupRoot) -> Arc<dyn IBackupTask> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.roots.lock().unwrap().push(root.clone());
        Arc::new(GatedTask {
            gate: self.gate.subscribe(),
            report: self.report.lock().unwrap().clone(),
            counters: *self.counters.lock().unwrap(),
            cancel: CancellationToken::new(),
            finished: Arc::clone(&self.finished),
        })
    }
}
