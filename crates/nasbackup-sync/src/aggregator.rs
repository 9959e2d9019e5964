//! Pending filesystem changes between two turns
//!
//! ```text
//!  watch callback ──► record(path → event)     (last write per path)
//!                               │
//!  turn start     ──► drain() ──┴──► { root → ChangeTree }
//! ```
//!
//! The aggregator is owned by the controller task, so records and drains
//! never interleave. A drain empties the map; events recorded afterwards
//! belong to the next turn.

use std::{collections::HashMap, path::PathBuf};

use nasbackup_core::domain::{ChangeTree, FileChangeEvent};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ChangeAggregator {
    pending: HashMap<PathBuf, FileChangeEvent>,
}

impl ChangeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change, replacing any earlier event for the same path
    pub fn record(&mut self, event: FileChangeEvent) {
        self.pending.insert(event.path.clone(), event);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending change
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Empties the map into one change tree per referenced root
    pub fn drain(&mut self) -> HashMap<PathBuf, ChangeTree> {
        let mut trees: HashMap<PathBuf, ChangeTree> = HashMap::new();
        for (_, event) in self.pending.drain() {
            let root = event.root.clone();
            let tree = trees
                .entry(root.clone())
                .or_insert_with(|| ChangeTree::new(root));
            if let Err(e) = tree.insert(event) {
                warn!(error = %e, "Dropping change outside its root");
            }
        }
        debug!(roots = trees.len(), "Drained pending changes");
        trees
    }
}
