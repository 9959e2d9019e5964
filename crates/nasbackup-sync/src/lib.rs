//! NAS Backup Sync - the backup control loop
//!
//! Provides:
//! - Aggregation of raw filesystem events into per-root change trees
//! - Reconciliation of local roots against remote directory records
//! - The default upload task executor
//! - Progress sampling with throughput and ETA estimates
//! - The backup controller actor that drives turns, retries and timers
//!
//! ## Modules
//!
//! - [`aggregator`] - pending change map and its drain into change trees
//! - [`watcher`] - `notify`-based implementation of the watch port
//! - [`reconciler`] - top-level directory reconciliation
//! - [`task`] - default per-root upload task
//! - [`progress`] - progress summaries and the sliding sample window
//! - [`events`] - broadcast hub implementing the observer port
//! - [`controller`] - the backup state machine

pub mod aggregator;
pub mod controller;
pub mod events;
pub mod progress;
pub mod reconciler;
pub mod task;
pub mod watcher;

mod timer;

#[cfg(test)]
mod testing;

use thiserror::Error;

/// Errors surfaced by the backup control loop
#[derive(Debug, Error)]
pub enum BackupError {
    /// Persisting the drive status failed
    #[error("Failed to update backup drive: {0:#}")]
    DriveUpdate(anyhow::Error),

    /// Listing or updating the top-level remote directories failed
    #[error("Failed to reconcile backup roots: {0:#}")]
    Reconcile(anyhow::Error),

    /// The controller task has stopped
    #[error("Backup controller is not running")]
    ControllerGone,
}

pub use controller::{BackupController, BackupDeps, ControllerHandle, ControllerSnapshot};
pub use events::EventHub;
