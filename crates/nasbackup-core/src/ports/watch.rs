//! Filesystem watch port
//!
//! - Watch setup is synchronous, so the controller can (re)install watches
//!   from inside a single message handler.
//! - Events are pushed into a [`ChangeSink`] from the watcher's own thread.
//! - [`WatchHandle`] is an RAII guard: dropping it stops watching.

use std::{path::Path, sync::Arc};

use crate::domain::FileChangeEvent;

/// Callback receiving every change under a watched root
pub type ChangeSink = Arc<dyn Fn(FileChangeEvent) + Send + Sync>;

/// RAII handle for an active recursive watch
///
/// The stop callback runs exactly once, on [`WatchHandle::stop`] or on drop.
pub struct WatchHandle {
    stop_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    pub fn new(stop_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop_fn: Some(Box::new(stop_fn)),
        }
    }

    /// Handle with nothing to release
    pub fn noop() -> Self {
        Self { stop_fn: None }
    }

    /// Stops the watch, consuming the handle
    pub fn stop(mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.stop_fn.is_some())
            .finish()
    }
}

/// Port trait for recursive directory watching
pub trait IWatchProvider: Send + Sync {
    /// Starts watching `root` recursively, delivering changes to `sink`
    fn watch(&self, root: &Path, sink: ChangeSink) -> anyhow::Result<WatchHandle>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn stop_runs_callback_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = WatchHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.stop();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_runs_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let c = Arc::clone(&calls);
            let _handle = WatchHandle::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_reports_activity() {
        let handle = WatchHandle::noop();
        assert_eq!(format!("{handle:?}"), "WatchHandle { active: false }");
    }
}
