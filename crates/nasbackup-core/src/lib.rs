//! NAS Backup Core - Domain types and port definitions
//!
//! This crate holds the pieces of the backup daemon that do not depend on
//! any concrete adapter:
//! - **Domain types** - `BackupDrive`, `RemoteEntry`, `BackupDirectory`,
//!   `FileChangeEvent`, `ChangeTree`, `BackupIssue`, progress summaries
//! - **Port definitions** - `IRemoteDrive`, `ITaskFactory`/`IBackupTask`,
//!   `IWatchProvider`, `IPowerSaveBlocker`, `IBackupObserver`
//! - **Configuration** - YAML-backed daemon settings
//!
//! # Architecture
//!
//! The controller in `nasbackup-sync` only talks to the outside world through
//! the traits in [`ports`]. The HTTP client, the notify watcher, the D-Bus
//! service and the logind inhibitor are adapters plugged in by the daemon.

pub mod config;
pub mod domain;
pub mod ports;
