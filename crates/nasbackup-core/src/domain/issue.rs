//! Errors and warnings reported by a backup turn

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Code of a local root that could not be read
pub const CODE_UNREADABLE_DIRECTORY: &str = "ENOBDIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    File,
    Directory,
}

/// One error or warning, shown to the user as-is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupIssue {
    /// Stage that produced the issue (`checkTopDir`, `upload`, ...)
    pub pipe: String,
    pub entry: PathBuf,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BackupIssue {
    pub fn new(
        pipe: impl Into<String>,
        entry: impl Into<PathBuf>,
        kind: IssueKind,
        code: impl Into<String>,
    ) -> Self {
        let entry = entry.into();
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            pipe: pipe.into(),
            entry,
            name,
            kind,
            code: code.into(),
            message: None,
        }
    }

    /// Issue for a local root that failed `lstat`/`readdir`
    pub fn unreadable_directory(entry: &Path) -> Self {
        Self::new("checkTopDir", entry, IssueKind::Directory, CODE_UNREADABLE_DIRECTORY)
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Error and warning lists of the latest turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSnapshot {
    pub current_errors: Vec<BackupIssue>,
    pub current_warnings: Vec<BackupIssue>,
}
