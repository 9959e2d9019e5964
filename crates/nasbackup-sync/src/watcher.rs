//! Recursive directory watching on top of `notify`
//!
//! [`FileWatcher`] implements the watch port. Every watched root gets its own
//! `RecommendedWatcher`; the returned [`WatchHandle`] owns it, so dropping
//! the handle stops the OS watch.
//!
//! ## Architecture
//!
//! ```text
//! inotify / fanotify
//!       │
//!       ▼
//!  RecommendedWatcher ──► map_notify_event ──► ChangeSink ──► controller queue
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nasbackup_core::{
    domain::{ChangeKind, FileChangeEvent},
    ports::{ChangeSink, IWatchProvider, WatchHandle},
};
use notify::{event::ModifyKind, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info};

/// Watch provider backed by the OS-native notification mechanism
#[derive(Debug, Default, Clone, Copy)]
pub struct FileWatcher;

impl FileWatcher {
    pub fn new() -> Self {
        Self
    }
}

impl IWatchProvider for FileWatcher {
    fn watch(&self, root: &Path, sink: ChangeSink) -> Result<WatchHandle> {
        let watched = WatchedRoot::new(root)?;
        info!(root = %root.display(), absolute = %watched.absolute.display(), "Starting recursive watch");

        let absolute = watched.absolute.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for change in map_notify_event(&event, &watched) {
                        sink(change);
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(&absolute, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", absolute.display()))?;

        let stopped_root = root.to_path_buf();
        Ok(WatchHandle::new(move || {
            drop(watcher);
            info!(root = %stopped_root.display(), "Stopped watch");
        }))
    }
}

/// A root as configured, plus the absolute form notify reports paths in
#[derive(Debug, Clone)]
struct WatchedRoot {
    configured: PathBuf,
    absolute: PathBuf,
}

impl WatchedRoot {
    fn new(root: &Path) -> Result<Self> {
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to resolve the working directory")?
                .join(root)
        };
        Ok(Self {
            configured: root.to_path_buf(),
            absolute,
        })
    }

    /// Re-expresses a reported path under the configured root, `None` if
    /// it lies outside the root.
    fn localize(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.absolute).ok()?;
        if relative.as_os_str().is_empty() {
            Some(self.configured.clone())
        } else {
            Some(self.configured.join(relative))
        }
    }
}

/// Converts a `notify::Event` into change events for `root`
///
/// Events keep the configured root so they match the controller's keys.
///
/// - `Create`, `Remove` and `Modify(Name)` become [`ChangeKind::Rename`],
///   one event per reported path (both ends of a rename)
/// - `Modify(Data | Metadata | Any | Other)` and `Any` become [`ChangeKind::Change`]
/// - access events are ignored
fn map_notify_event(event: &notify::Event, root: &WatchedRoot) -> Vec<FileChangeEvent> {
    let kind = match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            ChangeKind::Rename
        }
        EventKind::Modify(_) | EventKind::Any => ChangeKind::Change,
        EventKind::Access(_) | EventKind::Other => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            return Vec::new();
        }
    };

    event
        .paths
        .iter()
        .filter_map(|p| root.localize(p))
        .map(|p| {
            debug!(path = %p.display(), ?kind, "Mapped watch event");
            FileChangeEvent::new(p, &root.configured, kind)
        })
        .collect()
}
