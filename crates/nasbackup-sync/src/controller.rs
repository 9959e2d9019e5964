//! Backup controller: the state machine that drives backup turns
//!
//! The controller is an actor. One tokio task owns all of its state and
//! handles one [`Message`] at a time; handlers never await. Remote calls,
//! filesystem reads and task runs are spawned and report back through the
//! same mailbox, tagged with the epoch they were started under. `abort` bumps
//! the epoch, which turns every in-flight completion into a no-op.
//!
//! ```text
//!            start / cool-down / retry / debounce
//!                          │
//!   Idle ──run──► Working ─┴─► prepare (drive=Working, reconcile)
//!    ▲              │                │
//!    │              │          tasks (one per eligible root)
//!    │              │                │
//!    │              └──── all done ──┤
//!    │                               ├─ errors ──► persist Failed ─► Failed ─retry─┐
//!    └── cool-down ◄── persist Idle ◄┘                                             │
//!                                                                    Working ◄─────┘
//! ```

use std::{mem, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use nasbackup_core::{
    config::BackupConfig,
    domain::{
        BackupDrive, BackupIssue, DrivePatch, DriveStatus, EntryArgs, EntryMetadata, EntryUpdate,
        ErrorSnapshot, FileChangeEvent, RemoteId, TaskCounters,
    },
    ports::{
        BackupEvent, BackupRoot, ChangeSink, IBackupObserver, IBackupTask, IPowerSaveBlocker,
        IRemoteDrive, ITaskFactory, IWatchProvider, TaskReport, UsageEvent, WatchHandle,
    },
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    aggregator::ChangeAggregator,
    progress::{summarize, ProgressTracker, SummaryContext},
    reconciler::{DirectoryReconciler, Reconciliation},
    timer::TimerSlot,
    BackupError,
};

/// Tag used for the power-save inhibition held during a turn
const POWER_TAG: &str = "backup";

/// Collaborators of a controller
#[derive(Clone)]
pub struct BackupDeps {
    pub remote: Arc<dyn IRemoteDrive>,
    pub tasks: Arc<dyn ITaskFactory>,
    pub watcher: Arc<dyn IWatchProvider>,
    pub power: Arc<dyn IPowerSaveBlocker>,
    pub observer: Arc<dyn IBackupObserver>,
}

/// Point-in-time view of the controller state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub status: DriveStatus,
    pub dirty: bool,
    pub aborted: bool,
    pub retry_count: u32,
    pub active_tasks: usize,
    pub pending_changes: usize,
    pub drive_id: Option<RemoteId>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_backup_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Debounce,
    ScheduledRun,
    Progress,
}

/// Outcome of the asynchronous part of a turn start
#[derive(Debug)]
struct PreparedTurn {
    drive: BackupDrive,
    reconciliation: Reconciliation,
}

enum Message {
    Start,
    Abort,
    UpdateDirs {
        drive: Option<BackupDrive>,
        dirs: Vec<PathBuf>,
    },
    Reconfigure {
        drive: Option<BackupDrive>,
        dirs: Vec<PathBuf>,
    },
    FileChanged {
        event: FileChangeEvent,
        epoch: u64,
    },
    Timer {
        kind: TimerKind,
        generation: u64,
    },
    Prepared {
        epoch: u64,
        result: Result<PreparedTurn, BackupError>,
    },
    TaskDone {
        epoch: u64,
        index: usize,
        report: TaskReport,
    },
    TurnPersisted {
        epoch: u64,
        succeeded: bool,
        result: Result<BackupDrive, BackupError>,
    },
    Snapshot {
        reply: oneshot::Sender<ControllerSnapshot>,
    },
    Shutdown,
}

/// Bookkeeping of the turn whose tasks are running
struct Turn {
    id: Uuid,
    roots: Vec<BackupRoot>,
    pending: usize,
    issues: Vec<BackupIssue>,
    errors: Vec<BackupIssue>,
    warnings: Vec<BackupIssue>,
    last_backup_time: Option<DateTime<Utc>>,
}

pub struct BackupController {
    tx: mpsc::UnboundedSender<Message>,
    deps: BackupDeps,
    timings: BackupConfig,

    drive: Option<BackupDrive>,
    dirs: Vec<PathBuf>,

    status: DriveStatus,
    dirty: bool,
    aborted: bool,
    retry_count: u32,
    force_full_check: bool,
    has_file_upload: bool,
    epoch: u64,

    changes: ChangeAggregator,
    watches: Vec<WatchHandle>,
    debounce: TimerSlot,
    scheduled_run: TimerSlot,
    progress: TimerSlot,
    tracker: ProgressTracker,

    tasks: Vec<Arc<dyn IBackupTask>>,
    turn: Option<Turn>,
    report: ErrorSnapshot,
    power_held: bool,
}

impl BackupController {
    /// Spawns the controller task for `drive` and `dirs`.
    ///
    /// The controller is created idle; call [`ControllerHandle::start`] to
    /// begin watching and run the first turn.
    pub fn spawn(
        drive: Option<BackupDrive>,
        dirs: Vec<PathBuf>,
        deps: BackupDeps,
        timings: BackupConfig,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            tx: tx.clone(),
            deps,
            tracker: ProgressTracker::new(timings.progress_window),
            timings,
            drive,
            dirs,
            status: DriveStatus::Idle,
            dirty: false,
            aborted: false,
            retry_count: 0,
            force_full_check: false,
            has_file_upload: false,
            epoch: 0,
            changes: ChangeAggregator::new(),
            watches: Vec::new(),
            debounce: TimerSlot::default(),
            scheduled_run: TimerSlot::default(),
            progress: TimerSlot::default(),
            tasks: Vec::new(),
            turn: None,
            report: ErrorSnapshot::default(),
            power_held: false,
        };
        tokio::spawn(controller.run_loop(rx));
        ControllerHandle {
            inner: Arc::new(HandleInner { tx }),
        }
    }

    async fn run_loop(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            if !self.handle(message) {
                break;
            }
        }
        self.abort();
        debug!("Backup controller stopped");
    }

    /// Returns `false` once the actor should stop.
    fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Start => self.start(),
            Message::Abort => self.abort(),
            Message::UpdateDirs { drive, dirs } => {
                self.abort();
                let _ = self.tx.send(Message::Reconfigure { drive, dirs });
            }
            Message::Reconfigure { drive, dirs } => {
                self.drive = drive;
                self.dirs = dirs;
                self.start();
            }
            Message::FileChanged { event, epoch } => self.on_file_changed(event, epoch),
            Message::Timer { kind, generation } => self.on_timer(kind, generation),
            Message::Prepared { epoch, result } => self.on_prepared(epoch, result),
            Message::TaskDone {
                epoch,
                index,
                report,
            } => self.on_task_done(epoch, index, report),
            Message::TurnPersisted {
                epoch,
                succeeded,
                result,
            } => self.on_turn_persisted(epoch, succeeded, result),
            Message::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Message::Shutdown => return false,
        }
        true
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.aborted || epoch != self.epoch
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            status: self.status,
            dirty: self.dirty,
            aborted: self.aborted,
            retry_count: self.retry_count,
            active_tasks: self.turn.as_ref().map_or(0, |t| t.pending),
            pending_changes: self.changes.len(),
            drive_id: self.drive.as_ref().map(|d| d.id.clone()),
            last_backup_time: self.drive.as_ref().and_then(BackupDrive::last_backup_time),
        }
    }

    fn publish_report(&self) {
        self.deps
            .observer
            .publish(BackupEvent::Report(self.report.clone()));
    }

    fn set_idle(&mut self) {
        self.status = DriveStatus::Idle;
    }

    fn release_power(&mut self) {
        if mem::take(&mut self.power_held) {
            self.deps.power.release(POWER_TAG);
        }
    }

    /// Stops every activity and invalidates in-flight completions.
    fn halt(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.watches.clear();
        self.debounce.cancel();
        self.scheduled_run.cancel();
        self.progress.cancel();
        for task in &self.tasks {
            task.finish();
        }
        self.tasks.clear();
        self.turn = None;
        self.release_power();
    }

    fn start(&mut self) {
        self.halt();

        let epoch = self.epoch;
        for dir in &self.dirs {
            let tx = self.tx.clone();
            let sink: ChangeSink = Arc::new(move |event| {
                let _ = tx.send(Message::FileChanged { event, epoch });
            });
            match self.deps.watcher.watch(dir, sink) {
                Ok(handle) => self.watches.push(handle),
                Err(e) => warn!(dir = %dir.display(), error = %format!("{e:#}"), "Cannot watch backup root"),
            }
        }

        self.tracker.reset();
        self.progress
            .arm_interval(self.timings.progress_interval(), &self.tx, |generation| {
                Message::Timer {
                    kind: TimerKind::Progress,
                    generation,
                }
            });

        info!(
            drive = ?self.drive.as_ref().map(|d| d.id.as_str()),
            roots = self.dirs.len(),
            "Backup started"
        );
        self.set_idle();
        self.dirty = true;
        self.aborted = false;
        self.run();
    }

    fn abort(&mut self) {
        if !self.aborted {
            info!("Backup aborted");
        }
        self.aborted = true;
        self.retry_count = 0;
        self.changes.clear();
        self.halt();
    }

    fn on_file_changed(&mut self, event: FileChangeEvent, epoch: u64) {
        if self.is_stale(epoch) {
            return;
        }
        debug!(path = %event.path.display(), kind = ?event.kind, "File changed");
        self.dirty = true;
        self.changes.record(event);
        self.debounce.cancel();
        if self.status == DriveStatus::Idle {
            self.debounce.arm(self.timings.debounce(), &self.tx, |generation| {
                Message::Timer {
                    kind: TimerKind::Debounce,
                    generation,
                }
            });
        }
    }

    fn on_timer(&mut self, kind: TimerKind, generation: u64) {
        let slot = match kind {
            TimerKind::Debounce => &self.debounce,
            TimerKind::ScheduledRun => &self.scheduled_run,
            TimerKind::Progress => &self.progress,
        };
        if !slot.is_current(generation) {
            return;
        }
        match kind {
            TimerKind::Debounce | TimerKind::ScheduledRun => self.run(),
            TimerKind::Progress => self.sample_progress(),
        }
    }

    fn sample_progress(&mut self) {
        let counters: Vec<TaskCounters> = self.tasks.iter().map(|t| t.counters()).collect();
        self.has_file_upload |= counters.iter().any(|c| c.has_file_upload);
        let ctx = SummaryContext {
            status: self.status,
            last_backup_time: self.drive.as_ref().and_then(BackupDrive::last_backup_time),
            drive_id: self.drive.as_ref().map(|d| d.id.clone()),
            has_file_upload: self.has_file_upload,
        };
        if let Some(report) = self.tracker.record(summarize(&counters, ctx)) {
            self.deps.observer.publish(BackupEvent::Progress(report));
        }
    }

    /// Starts a turn unless one is running or nothing is pending.
    fn run(&mut self) {
        if self.aborted || self.status == DriveStatus::Working || !self.dirty {
            return;
        }
        self.debounce.cancel();
        self.scheduled_run.cancel();
        self.tasks.clear();
        self.turn = None;

        self.status = DriveStatus::Working;
        self.dirty = false;
        self.has_file_upload = false;
        self.report = ErrorSnapshot::default();
        self.publish_report();

        let changes = self.changes.drain();

        let drive = self
            .drive
            .as_ref()
            .filter(|d| !d.is_disabled() && !self.dirs.is_empty())
            .map(|d| d.id.clone());
        let Some(drive) = drive else {
            debug!("No enabled drive or no roots, nothing to back up");
            self.set_idle();
            return;
        };

        let turn_id = Uuid::new_v4();
        let force_full = mem::take(&mut self.force_full_check);
        info!(
            turn = %turn_id,
            drive = %drive,
            changed_roots = changes.len(),
            force_full,
            "Backup turn started"
        );

        let remote = Arc::clone(&self.deps.remote);
        let observer = Arc::clone(&self.deps.observer);
        let dirs = self.dirs.clone();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        tokio::spawn(
            async move {
                let result = async {
                    let drive = remote
                        .update_backup_drive(&drive, &DrivePatch::status(DriveStatus::Working))
                        .await
                        .map_err(BackupError::DriveUpdate)?;
                    let reconciliation = DirectoryReconciler::new(remote, observer)
                        .reconcile(&drive.id, &dirs, &changes, force_full)
                        .await?;
                    Ok::<_, BackupError>(PreparedTurn {
                        drive,
                        reconciliation,
                    })
                }
                .await;
                let _ = tx.send(Message::Prepared { epoch, result });
            }
            .instrument(info_span!("turn", id = %turn_id)),
        );
        self.turn = Some(Turn {
            id: turn_id,
            roots: Vec::new(),
            pending: 0,
            issues: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            last_backup_time: None,
        });
    }

    fn on_prepared(&mut self, epoch: u64, result: Result<PreparedTurn, BackupError>) {
        if self.is_stale(epoch) {
            debug!("Discarding preparation of an aborted turn");
            return;
        }
        let prepared = match result {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Backup turn could not start");
                self.deps
                    .observer
                    .publish(BackupEvent::Usage(UsageEvent::error(e.to_string())));
                self.turn = None;
                self.retry();
                return;
            }
        };

        let Reconciliation { eligible, issues } = prepared.reconciliation;
        let last_backup_time = prepared.drive.last_backup_time();
        self.drive = Some(prepared.drive);

        if eligible.is_empty() {
            debug!(unreadable = issues.len(), "No root needs a backup pass");
            self.turn = None;
            self.report.current_errors = issues;
            self.publish_report();
            self.set_idle();
            return;
        }

        self.deps.power.acquire(POWER_TAG);
        self.power_held = true;

        self.tasks = eligible
            .iter()
            .map(|root| self.deps.tasks.create(root))
            .collect();
        let turn_id = self.turn.as_ref().map_or_else(Uuid::new_v4, |t| t.id);
        for (index, task) in self.tasks.iter().enumerate() {
            let task = Arc::clone(task);
            let tx = self.tx.clone();
            let root = eligible[index].local_path.clone();
            tokio::spawn(
                async move {
                    let report = task.run().await;
                    let _ = tx.send(Message::TaskDone {
                        epoch,
                        index,
                        report,
                    });
                }
                .instrument(info_span!("task", turn = %turn_id, root = %root.display())),
            );
        }
        info!(turn = %turn_id, tasks = eligible.len(), "Backup tasks running");

        self.turn = Some(Turn {
            id: turn_id,
            pending: eligible.len(),
            roots: eligible,
            issues,
            errors: Vec::new(),
            warnings: Vec::new(),
            last_backup_time,
        });
    }

    fn on_task_done(&mut self, epoch: u64, index: usize, report: TaskReport) {
        if self.is_stale(epoch) {
            return;
        }
        let Some(turn) = self.turn.as_mut() else {
            return;
        };

        if report.is_success() {
            let uploaded = self
                .tasks
                .get(index)
                .is_some_and(|t| t.counters().has_file_upload);
            self.has_file_upload |= uploaded;
            if let Some(root) = turn.roots.get(index) {
                spawn_mark_root_idle(
                    Arc::clone(&self.deps.remote),
                    Arc::clone(&self.deps.observer),
                    root.clone(),
                    uploaded,
                );
            }
        } else {
            warn!(turn = %turn.id, errors = report.errors.len(), "Backup task reported errors");
        }
        turn.errors.extend(report.errors);
        turn.warnings.extend(report.warnings);
        turn.pending = turn.pending.saturating_sub(1);

        if turn.pending == 0 {
            self.finish_turn();
        }
    }

    fn finish_turn(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        self.release_power();

        let failed = !turn.errors.is_empty();
        let mut current_errors = turn.issues;
        current_errors.extend(turn.errors);
        self.report = ErrorSnapshot {
            current_errors,
            current_warnings: turn.warnings,
        };
        self.publish_report();

        let Some(drive) = self.drive.as_ref().map(|d| d.id.clone()) else {
            self.set_idle();
            return;
        };
        let patch = if failed {
            info!(turn = %turn.id, errors = self.report.current_errors.len(), "Backup turn failed");
            DrivePatch::status(DriveStatus::Failed)
        } else {
            let lbt = match turn.last_backup_time {
                Some(previous) if !self.has_file_upload => previous,
                _ => Utc::now(),
            };
            if self.has_file_upload {
                let counters: Vec<TaskCounters> =
                    self.tasks.iter().map(|t| t.counters()).collect();
                let summary = summarize(&counters, SummaryContext::default());
                self.deps
                    .observer
                    .publish(BackupEvent::Usage(UsageEvent::count(
                        summary.finish_count,
                        summary.complete_size,
                    )));
            }
            info!(turn = %turn.id, uploaded = self.has_file_upload, "Backup turn succeeded");
            DrivePatch::status(DriveStatus::Idle).with_last_backup_time(lbt)
        };

        let remote = Arc::clone(&self.deps.remote);
        let tx = self.tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = remote
                .update_backup_drive(&drive, &patch)
                .await
                .map_err(BackupError::DriveUpdate);
            let _ = tx.send(Message::TurnPersisted {
                epoch,
                succeeded: !failed,
                result,
            });
        });
    }

    fn on_turn_persisted(
        &mut self,
        epoch: u64,
        succeeded: bool,
        result: Result<BackupDrive, BackupError>,
    ) {
        if self.is_stale(epoch) {
            return;
        }
        let persisted = match result {
            Ok(drive) => {
                self.drive = Some(drive);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist turn outcome");
                false
            }
        };

        if succeeded && persisted {
            self.set_idle();
            self.retry_count = 0;
            self.scheduled_run
                .arm(self.timings.cooldown(), &self.tx, |generation| Message::Timer {
                    kind: TimerKind::ScheduledRun,
                    generation,
                });
        } else {
            self.retry();
        }
    }

    /// Schedules another attempt after a quadratic back-off.
    fn retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
        let delay = self.timings.retry_delay(self.retry_count);
        warn!(
            retry = self.retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Backup will be retried"
        );
        self.status = DriveStatus::Failed;
        self.changes.clear();
        self.force_full_check = true;
        self.dirty = true;
        self.scheduled_run.arm(delay, &self.tx, |generation| Message::Timer {
            kind: TimerKind::ScheduledRun,
            generation,
        });
    }
}

/// Best-effort Idle update of a root whose task succeeded
fn spawn_mark_root_idle(
    remote: Arc<dyn IRemoteDrive>,
    observer: Arc<dyn IBackupObserver>,
    root: BackupRoot,
    uploaded: bool,
) {
    tokio::spawn(async move {
        let lbt = match root.last_backup_time {
            Some(previous) if !uploaded => previous,
            _ => Utc::now(),
        };
        let update = EntryUpdate::new(
            root.dir_id.clone(),
            EntryArgs::metadata(EntryMetadata::idle(root.local_path.clone(), lbt)),
        );
        if let Err(e) = remote
            .update_entries(&root.drive_id, &root.drive_id, &[update])
            .await
        {
            warn!(root = %root.local_path.display(), error = %format!("{e:#}"), "Failed to mark root Idle");
        }
        observer.publish(BackupEvent::DriveListUpdated {
            drive_id: root.drive_id,
        });
    });
}

struct HandleInner {
    tx: mpsc::UnboundedSender<Message>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

/// Cloneable handle to a running controller
///
/// The controller shuts down when the last handle is dropped.
#[derive(Clone)]
pub struct ControllerHandle {
    inner: Arc<HandleInner>,
}

impl ControllerHandle {
    fn send(&self, message: Message) -> Result<(), BackupError> {
        self.inner
            .tx
            .send(message)
            .map_err(|_| BackupError::ControllerGone)
    }

    /// Starts watching and triggers a turn.
    pub fn start(&self) -> Result<(), BackupError> {
        self.send(Message::Start)
    }

    /// Stops watching and discards any running turn.
    pub fn abort(&self) -> Result<(), BackupError> {
        self.send(Message::Abort)
    }

    /// Aborts, then restarts with a new drive and set of roots.
    pub fn update_dirs(
        &self,
        drive: Option<BackupDrive>,
        dirs: Vec<PathBuf>,
    ) -> Result<(), BackupError> {
        self.send(Message::UpdateDirs { drive, dirs })
    }

    /// Aborts and stops the controller task.
    pub fn shutdown(&self) -> Result<(), BackupError> {
        self.send(Message::Shutdown)
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot, BackupError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Snapshot { reply })?;
        rx.await.map_err(|_| BackupError::ControllerGone)
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("closed", &self.inner.tx.is_closed())
            .finish()
    }
}
