//! Reconciliation of local roots against top-level remote directories
//!
//! ```text
//!  for each configured root:
//!    lstat + readdir ──fail──► ENOBDIR issue, skip
//!         │
//!    remote record by localPath?
//!      ├─ yes ─► updateAttr (revive, Working, fresh times), keep lastBackupTime
//!      └─ no  ─► create record, notify "drive list updated"
//!         │
//!    full check?  ─yes─► eligible (no change tree)
//!         │ no
//!    tree has changes? ─yes─► eligible (with change tree)
//!         └─ no ─► mark Idle remotely, skip
//! ```
//!
//! Remote records whose local path is no longer configured are left as they
//! are.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use nasbackup_core::{
    domain::{
        BackupIssue, ChangeTree, DirectoryAttrs, DirectoryListing, EntryArgs, EntryMetadata,
        EntryUpdate, RemoteId,
    },
    ports::{BackupEvent, BackupRoot, IBackupObserver, IRemoteDrive, UsageEvent},
};
use tracing::{debug, info, warn};

use crate::BackupError;

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Roots that need a task this turn
    pub eligible: Vec<BackupRoot>,
    /// Unreadable roots
    pub issues: Vec<BackupIssue>,
}

/// Local facts about one root
#[derive(Debug)]
struct LocalRoot {
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    children: Vec<PathBuf>,
}

async fn inspect_root(root: &Path) -> std::io::Result<LocalRoot> {
    let meta = tokio::fs::symlink_metadata(root).await?;
    let mut dir = tokio::fs::read_dir(root).await?;
    let mut children = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        children.push(entry.path());
    }
    children.sort();
    Ok(LocalRoot {
        created: meta.created().ok().map(DateTime::<Utc>::from),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        children,
    })
}

pub struct DirectoryReconciler {
    remote: Arc<dyn IRemoteDrive>,
    observer: Arc<dyn IBackupObserver>,
}

impl DirectoryReconciler {
    pub fn new(remote: Arc<dyn IRemoteDrive>, observer: Arc<dyn IBackupObserver>) -> Self {
        Self { remote, observer }
    }

    /// Reconciles `roots` under `drive` and picks the roots to back up.
    ///
    /// A full check (every readable root is eligible) happens when
    /// `force_full` is set or no changes were recorded at all.
    ///
    /// # Errors
    /// [`BackupError::Reconcile`] when listing, updating or creating a
    /// remote record fails. Unreadable roots are not errors.
    pub async fn reconcile(
        &self,
        drive: &RemoteId,
        roots: &[PathBuf],
        changes: &HashMap<PathBuf, ChangeTree>,
        force_full: bool,
    ) -> Result<Reconciliation, BackupError> {
        let result = self
            .reconcile_roots(drive, roots, changes, force_full || changes.is_empty())
            .await;
        self.observer.publish(BackupEvent::BackupRootUpdated);
        result
    }

    async fn reconcile_roots(
        &self,
        drive: &RemoteId,
        roots: &[PathBuf],
        changes: &HashMap<PathBuf, ChangeTree>,
        full_check: bool,
    ) -> Result<Reconciliation, BackupError> {
        let listing = self
            .remote
            .list_directory(drive, drive)
            .await
            .context("Failed to list top-level directories")
            .map_err(BackupError::Reconcile)?;
        log_orphans(&listing, roots);

        let mut out = Reconciliation::default();
        for root in roots {
            let local = match inspect_root(root).await {
                Ok(local) => local,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Cannot read backup root");
                    self.observer.publish(BackupEvent::Usage(UsageEvent::error(format!(
                        "read local file error, {:?}",
                        e.kind()
                    ))));
                    out.issues.push(BackupIssue::unreadable_directory(root));
                    continue;
                }
            };

            let attrs = DirectoryAttrs {
                bctime: local.created,
                bmtime: local.modified,
                metadata: Some(EntryMetadata::working(root.clone())),
            };

            let (dir_id, last_backup_time) = match listing.find_by_local_path(root) {
                Some(existing) => {
                    let update = EntryUpdate::new(existing.id.clone(), EntryArgs::revive(attrs));
                    self.remote
                        .update_entries(drive, drive, &[update])
                        .await
                        .with_context(|| format!("Failed to update root {}", root.display()))
                        .map_err(BackupError::Reconcile)?;
                    debug!(root = %root.display(), dir = %existing.id, "Marked root Working");
                    let lbt = existing.metadata.as_ref().and_then(|m| m.last_backup_time);
                    (existing.id.clone(), lbt)
                }
                None => {
                    let name = root
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| root.display().to_string());
                    let created = self
                        .remote
                        .create_backup_directory(drive, drive, &name, &attrs)
                        .await
                        .with_context(|| format!("Failed to create root {}", root.display()))
                        .map_err(BackupError::Reconcile)?;
                    info!(root = %root.display(), dir = %created.id, "Created remote root");
                    self.observer.publish(BackupEvent::DriveListUpdated {
                        drive_id: drive.clone(),
                    });
                    (created.id, None)
                }
            };

            let change_tree = if full_check {
                debug!(root = %root.display(), "Checking everything");
                None
            } else {
                match changes.get(root).filter(|t| t.has_changes()) {
                    Some(tree) => {
                        debug!(root = %root.display(), changes = tree.events().len(), "Root changed");
                        Some(tree.clone())
                    }
                    None => {
                        debug!(root = %root.display(), "Nothing changed");
                        self.mark_idle(drive, &dir_id, root, last_backup_time).await;
                        continue;
                    }
                }
            };

            out.eligible.push(BackupRoot {
                local_path: root.clone(),
                drive_id: drive.clone(),
                dir_id,
                entries: local.children,
                last_backup_time,
                change_tree,
            });
        }
        Ok(out)
    }

    /// Best-effort Idle update of a root that needs no task.
    async fn mark_idle(
        &self,
        drive: &RemoteId,
        dir_id: &RemoteId,
        root: &Path,
        last_backup_time: Option<DateTime<Utc>>,
    ) {
        let lbt = last_backup_time.unwrap_or_else(Utc::now);
        let update = EntryUpdate::new(
            dir_id.clone(),
            EntryArgs::metadata(EntryMetadata::idle(root, lbt)),
        );
        if let Err(e) = self.remote.update_entries(drive, drive, &[update]).await {
            warn!(root = %root.display(), error = %format!("{e:#}"), "Failed to mark root Idle");
        }
    }
}

fn log_orphans(listing: &DirectoryListing, roots: &[PathBuf]) {
    let configured: HashSet<&Path> = roots.iter().map(PathBuf::as_path).collect();
    for entry in listing.entries.iter().filter(|e| !e.deleted) {
        if let Some(path) = entry.local_path() {
            if !configured.contains(path) {
                debug!(dir = %entry.id, path = %path.display(), "Leaving unconfigured remote root untouched");
            }
        }
    }
}
