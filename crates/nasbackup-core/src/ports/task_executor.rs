//! Task executor port
//!
//! One task synchronizes one eligible root during one turn. The controller
//! creates tasks through an [`ITaskFactory`], awaits [`IBackupTask::run`]
//! and reads [`IBackupTask::counters`] once per progress tick.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};

use crate::domain::{BackupIssue, ChangeTree, RemoteId, TaskCounters};

/// Descriptor of a root that needs a backup pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRoot {
    pub local_path: PathBuf,
    pub drive_id: RemoteId,
    pub dir_id: RemoteId,
    /// Immediate children of the root, as absolute paths
    pub entries: Vec<PathBuf>,
    /// Carried over from the remote directory record
    pub last_backup_time: Option<DateTime<Utc>>,
    /// `None` means a full check of the root
    pub change_tree: Option<ChangeTree>,
}

/// Outcome reported by a task when it completes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub errors: Vec<BackupIssue>,
    pub warnings: Vec<BackupIssue>,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A running synchronization unit for one root
#[async_trait::async_trait]
pub trait IBackupTask: Send + Sync {
    /// Runs the task to completion (or until [`IBackupTask::finish`])
    async fn run(&self) -> TaskReport;

    /// Forcibly stops the task; `run` resolves soon after
    fn finish(&self);

    /// Live counters, readable at any time
    fn counters(&self) -> TaskCounters;
}

/// Creates one task per eligible root
pub trait ITaskFactory: Send + Sync {
    fn create(&self, root: &BackupRoot) -> Arc<dyn IBackupTask>;
}
