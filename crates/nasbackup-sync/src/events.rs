//! Broadcast hub for controller events
//!
//! [`EventHub`] is the daemon's implementation of the observer port. Every
//! event fans out to all subscribers through a `tokio` broadcast channel;
//! the latest error snapshot is also cached so a client can ask for it at
//! any time.

use nasbackup_core::{
    domain::ErrorSnapshot,
    ports::{BackupEvent, IBackupObserver},
};
use tokio::sync::{broadcast, watch};
use tracing::{error, trace};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct EventHub {
    events: broadcast::Sender<BackupEvent>,
    report: watch::Sender<ErrorSnapshot>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (report, _) = watch::channel(ErrorSnapshot::default());
        Self { events, report }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.events.subscribe()
    }

    /// Error/warning lists as last published
    pub fn latest_report(&self) -> ErrorSnapshot {
        self.report.borrow().clone()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl IBackupObserver for EventHub {
    fn publish(&self, event: BackupEvent) {
        match &event {
            BackupEvent::Report(snapshot) => {
                self.report.send_replace(snapshot.clone());
            }
            BackupEvent::Usage(usage) if usage.action == "error" => {
                error!(category = %usage.category, msg = %usage.msg, "Backup error");
            }
            _ => {}
        }
        // No subscribers is not an error; clients come and go.
        if self.events.send(event).is_err() {
            trace!("Dropped backup event without subscribers");
        }
    }
}
