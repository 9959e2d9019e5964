//! Filesystem change events and the per-root change tree
//!
//! ```text
//!   /home/u/docs/a/b.txt  ─┐
//!   /home/u/docs/a/c.txt  ─┼─►  ChangeTree(root=/home/u/docs)
//!   /home/u/docs/d.txt    ─┘       ├── a
//!                                  │   ├── b.txt  (Change)
//!                                  │   └── c.txt  (Rename)
//!                                  └── d.txt      (Change)
//! ```
//!
//! Only the node that matches a changed path exactly carries an event.
//! Intermediate nodes exist to steer the task walk and carry none, unless
//! the directory itself was reported as well.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Kind of change reported by the watch capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Entry appeared, disappeared or was renamed
    Rename,
    /// Entry content or attributes changed
    Change,
}

/// One raw change reported under a watched root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub root: PathBuf,
    pub kind: ChangeKind,
}

impl FileChangeEvent {
    pub fn new(path: impl Into<PathBuf>, root: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            root: root.into(),
            kind,
        }
    }
}

/// A node of the change tree, keyed by path segment in its parent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNode {
    pub event: Option<FileChangeEvent>,
    pub children: BTreeMap<OsString, ChangeNode>,
}

impl ChangeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn collect_events<'a>(&'a self, out: &mut Vec<&'a FileChangeEvent>) {
        if let Some(event) = &self.event {
            out.push(event);
        }
        for child in self.children.values() {
            child.collect_events(out);
        }
    }
}

/// Pending changes of one root, consumed by a single turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTree {
    root: PathBuf,
    node: ChangeNode,
}

impl ChangeTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            node: ChangeNode::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Top-level node of the tree (the root directory itself)
    pub fn node(&self) -> &ChangeNode {
        &self.node
    }

    /// Merges one event into the tree.
    ///
    /// # Errors
    /// Returns [`DomainError::PathOutsideRoot`] when the event path does not
    /// live under this tree's root.
    pub fn insert(&mut self, event: FileChangeEvent) -> Result<(), DomainError> {
        let relative = event
            .path
            .strip_prefix(&self.root)
            .map_err(|_| DomainError::PathOutsideRoot {
                path: event.path.display().to_string(),
                root: self.root.display().to_string(),
            })?
            .to_path_buf();

        let mut current = &mut self.node;
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    current = current.children.entry(segment.to_os_string()).or_default();
                }
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::PathOutsideRoot {
                        path: event.path.display().to_string(),
                        root: self.root.display().to_string(),
                    })
                }
            }
        }
        current.event = Some(event);
        Ok(())
    }

    /// True when at least one change was recorded under the root
    pub fn has_changes(&self) -> bool {
        self.node.event.is_some() || !self.node.children.is_empty()
    }

    /// Node for a path relative to the root
    pub fn get(&self, relative: &Path) -> Option<&ChangeNode> {
        let mut current = &self.node;
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                current = current.children.get(segment)?;
            }
        }
        Some(current)
    }

    /// All recorded events, depth-first in segment order
    pub fn events(&self) -> Vec<&FileChangeEvent> {
        let mut out = Vec::new();
        self.node.collect_events(&mut out);
        out
    }
}
