//! Default upload task: one recursive pass over a backup root
//!
//! The walk is iterative. Each directory job lists its remote counterpart
//! once, then visits its local entries in order. With a change tree, only the
//! entries present in the tree are visited; a node that carries an event of
//! its own (or has no children) is walked in full.
//!
//! Local deletions are never propagated.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use nasbackup_core::{
    domain::{
        BackupIssue, ChangeNode, DirectoryAttrs, DirectoryListing, IssueKind, RemoteEntry,
        RemoteId, TaskCounters, CODE_UNREADABLE_DIRECTORY,
    },
    ports::{BackupRoot, FileUpload, IBackupTask, IRemoteDrive, ITaskFactory, TaskReport},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Builds an [`UploadTask`] per eligible root
pub struct UploadTaskFactory {
    remote: Arc<dyn IRemoteDrive>,
}

impl UploadTaskFactory {
    pub fn new(remote: Arc<dyn IRemoteDrive>) -> Self {
        Self { remote }
    }
}

impl ITaskFactory for UploadTaskFactory {
    fn create(&self, root: &BackupRoot) -> Arc<dyn IBackupTask> {
        Arc::new(UploadTask::new(Arc::clone(&self.remote), root.clone()))
    }
}

/// One remote directory to synchronize
struct DirJob {
    local: PathBuf,
    dir_id: RemoteId,
    entries: Vec<PathBuf>,
    /// `None` walks every entry
    node: Option<ChangeNode>,
}

pub struct UploadTask {
    remote: Arc<dyn IRemoteDrive>,
    root: BackupRoot,
    counters: Mutex<TaskCounters>,
    cancel: CancellationToken,
}

impl UploadTask {
    pub fn new(remote: Arc<dyn IRemoteDrive>, root: BackupRoot) -> Self {
        Self {
            remote,
            root,
            counters: Mutex::new(TaskCounters::default()),
            cancel: CancellationToken::new(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut TaskCounters)) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counters);
    }

    fn root_job(&self) -> DirJob {
        let node = self
            .root
            .change_tree
            .as_ref()
            .map(|tree| tree.node())
            .filter(|node| node.event.is_none())
            .cloned();
        DirJob {
            local: self.root.local_path.clone(),
            dir_id: self.root.dir_id.clone(),
            entries: self.root.entries.clone(),
            node,
        }
    }

    async fn sync_directory(&self, job: DirJob, report: &mut TaskReport, queue: &mut Vec<DirJob>) {
        let drive = &self.root.drive_id;
        let listing = match self.remote.list_directory(drive, &job.dir_id).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(dir = %job.local.display(), error = %format!("{e:#}"), "Listing remote directory failed");
                report.errors.push(
                    BackupIssue::new("listDirectory", &job.local, IssueKind::Directory, "EREMOTE")
                        .with_message(format!("{e:#}")),
                );
                return;
            }
        };

        for path in &job.entries {
            if self.cancel.is_cancelled() {
                return;
            }
            let Some(name) = path.file_name().map(|n| n.to_os_string()) else {
                continue;
            };

            // Narrow the walk to the change tree.
            let child_node = match &job.node {
                None => None,
                Some(node) => match node.children.get(&name) {
                    None => continue,
                    Some(child) if child.event.is_some() || child.is_leaf() => None,
                    Some(child) => Some(child.clone()),
                },
            };

            let meta = match tokio::fs::symlink_metadata(path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Entry vanished before upload");
                    continue;
                }
                Err(e) => {
                    report.warnings.push(
                        BackupIssue::new("lstat", path, IssueKind::File, io_code(&e))
                            .with_message(e.to_string()),
                    );
                    continue;
                }
            };
            if meta.file_type().is_symlink() {
                continue;
            }

            let name = name.to_string_lossy().into_owned();
            let bctime = meta.created().ok().map(DateTime::<Utc>::from);
            let bmtime = meta.modified().ok().map(DateTime::<Utc>::from);

            if meta.is_dir() {
                let Some(dir_id) = self
                    .ensure_directory(&job, &listing, &name, path, bctime, bmtime, report)
                    .await
                else {
                    continue;
                };
                match read_children(path).await {
                    Ok(entries) => queue.push(DirJob {
                        local: path.clone(),
                        dir_id,
                        entries,
                        node: child_node,
                    }),
                    Err(e) => report.errors.push(
                        BackupIssue::new(
                            "readDir",
                            path,
                            IssueKind::Directory,
                            CODE_UNREADABLE_DIRECTORY,
                        )
                        .with_message(e.to_string()),
                    ),
                }
            } else {
                let upload = FileUpload {
                    name,
                    local_path: path.clone(),
                    size: meta.len(),
                    bctime,
                    bmtime,
                };
                self.sync_file(&job.dir_id, &listing, upload, report).await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn ensure_directory(
        &self,
        job: &DirJob,
        listing: &DirectoryListing,
        name: &str,
        path: &Path,
        bctime: Option<DateTime<Utc>>,
        bmtime: Option<DateTime<Utc>>,
        report: &mut TaskReport,
    ) -> Option<RemoteId> {
        if let Some(existing) = listing.find_by_name(name).filter(|e| e.is_directory()) {
            return Some(existing.id.clone());
        }
        let attrs = DirectoryAttrs {
            bctime,
            bmtime,
            metadata: None,
        };
        match self
            .remote
            .create_backup_directory(&self.root.drive_id, &job.dir_id, name, &attrs)
            .await
        {
            Ok(created) => {
                debug!(path = %path.display(), dir = %created.id, "Created remote directory");
                Some(created.id)
            }
            Err(e) => {
                report.errors.push(
                    BackupIssue::new("mkdir", path, IssueKind::Directory, "EREMOTE")
                        .with_message(format!("{e:#}")),
                );
                None
            }
        }
    }

    async fn sync_file(
        &self,
        dir_id: &RemoteId,
        listing: &DirectoryListing,
        file: FileUpload,
        report: &mut TaskReport,
    ) {
        let size = i64::try_from(file.size).unwrap_or(i64::MAX);
        self.update(|c| {
            c.read_dir_count += 1;
            c.read_dir_size += size;
        });

        let remote = listing.find_by_name(&file.name).filter(|e| !e.is_directory());
        if remote.is_some_and(|r| is_unchanged(r, &file)) {
            self.update(|c| {
                c.finish_count += 1;
                c.complete_size += size;
                c.skip_size += size;
            });
            return;
        }

        self.update(|c| {
            c.diff_count += 1;
            c.diff_size += size;
        });
        match self.remote.upload_file(&self.root.drive_id, dir_id, &file).await {
            Ok(_) => {
                debug!(path = %file.local_path.display(), size = file.size, "Uploaded");
                self.update(|c| {
                    c.finish_count += 1;
                    c.complete_size += size;
                    c.has_file_upload = true;
                });
            }
            Err(e) => {
                warn!(path = %file.local_path.display(), error = %format!("{e:#}"), "Upload failed");
                report.errors.push(
                    BackupIssue::new("upload", &file.local_path, IssueKind::File, "EUPLOAD")
                        .with_message(format!("{e:#}")),
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl IBackupTask for UploadTask {
    async fn run(&self) -> TaskReport {
        let mut report = TaskReport::default();
        let mut queue = vec![self.root_job()];
        while let Some(job) = queue.pop() {
            if self.cancel.is_cancelled() {
                debug!(root = %self.root.local_path.display(), "Task finished early");
                break;
            }
            self.sync_directory(job, &mut report, &mut queue).await;
        }
        report
    }

    fn finish(&self) {
        self.cancel.cancel();
    }

    fn counters(&self) -> TaskCounters {
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Same size and the same modification time to the millisecond
fn is_unchanged(remote: &RemoteEntry, file: &FileUpload) -> bool {
    remote.size == Some(file.size)
        && remote.bmtime.map(|t| t.timestamp_millis()) == file.bmtime.map(|t| t.timestamp_millis())
}

async fn read_children(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut read = tokio::fs::read_dir(dir).await?;
    let mut children = Vec::new();
    while let Some(entry) = read.next_entry().await? {
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

fn io_code(e: &std::io::Error) -> String {
    format!("{:?}", e.kind())
}
