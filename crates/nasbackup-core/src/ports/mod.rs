//! Port definitions (hexagonal architecture interfaces)
//!
//! The backup controller depends on these traits only. Implementations
//! live in adapter crates or in the daemon binary.
//!
//! ## Ports Overview
//!
//! - [`IRemoteDrive`] - NAS drive/directory records and uploads
//! - [`ITaskFactory`] / [`IBackupTask`] - per-root synchronization tasks
//! - [`IWatchProvider`] - recursive filesystem watches
//! - [`IPowerSaveBlocker`] - system sleep inhibition during a turn
//! - [`IBackupObserver`] - outbound broadcasts to UI clients

pub mod observer;
pub mod power;
pub mod remote_drive;
pub mod task_executor;
pub mod watch;

pub use observer::{BackupEvent, IBackupObserver, UsageEvent};
pub use power::IPowerSaveBlocker;
pub use remote_drive::{FileUpload, IRemoteDrive};
pub use task_executor::{BackupRoot, IBackupTask, ITaskFactory, TaskReport};
pub use watch::{ChangeSink, IWatchProvider, WatchHandle};
