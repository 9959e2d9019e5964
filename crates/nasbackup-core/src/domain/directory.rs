//! Remote directory records and the updates sent for them
//!
//! Top-level directories of a backup drive carry an [`EntryMetadata`] block
//! that binds them to a local path. Everything else in a listing is a plain
//! [`RemoteEntry`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RemoteId;

/// Backup status stored on a top-level directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectoryStatus {
    #[default]
    Idle,
    Working,
}

/// Binding between a remote top-level directory and a local root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub local_path: PathBuf,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub status: DirectoryStatus,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_backup_time: Option<DateTime<Utc>>,
}

impl EntryMetadata {
    /// Metadata written when a turn starts working on a root
    pub fn working(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            disabled: false,
            status: DirectoryStatus::Working,
            last_backup_time: None,
        }
    }

    /// Metadata written when a root is done (or had nothing to do)
    pub fn idle(local_path: impl Into<PathBuf>, last_backup_time: DateTime<Utc>) -> Self {
        Self {
            local_path: local_path.into(),
            disabled: false,
            status: DirectoryStatus::Idle,
            last_backup_time: Some(last_backup_time),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One item of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    #[serde(rename = "uuid")]
    pub id: RemoteId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
    /// Birth time of the local source
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bctime: Option<DateTime<Utc>>,
    /// Modification time of the local source
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bmtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

impl RemoteEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Local path recorded in the metadata block, if any
    pub fn local_path(&self) -> Option<&Path> {
        self.metadata.as_ref().map(|m| m.local_path.as_path())
    }

    /// Not deleted, bound to a local path and not disabled
    pub fn is_active(&self) -> bool {
        !self.deleted && self.metadata.as_ref().is_some_and(|m| !m.disabled)
    }
}

/// Response body of `GET drives/{drive}/dirs/{dir}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    #[serde(default)]
    pub entries: Vec<RemoteEntry>,
}

impl DirectoryListing {
    pub fn find_by_name(&self, name: &str) -> Option<&RemoteEntry> {
        self.entries.iter().find(|e| !e.deleted && e.name == name)
    }

    /// Top-level directory whose metadata points at `local_path`
    pub fn find_by_local_path(&self, local_path: &Path) -> Option<&RemoteEntry> {
        self.entries
            .iter()
            .find(|e| e.local_path() == Some(local_path))
    }
}

/// A configured local backup root, backed by a top-level remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDirectory {
    pub id: RemoteId,
    pub name: String,
    pub metadata: EntryMetadata,
}

impl BackupDirectory {
    /// Keeps only active, bound directories.
    pub fn from_entry(entry: &RemoteEntry) -> Option<Self> {
        if !entry.is_active() {
            return None;
        }
        let metadata = entry.metadata.clone()?;
        Some(Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            metadata,
        })
    }

    /// Filters a listing down to the roots that should be backed up.
    pub fn active(entries: &[RemoteEntry]) -> Vec<Self> {
        entries.iter().filter_map(Self::from_entry).collect()
    }

    pub fn local_path(&self) -> &Path {
        &self.metadata.local_path
    }
}

/// Attributes of a newly created remote directory or uploaded file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAttrs {
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bctime: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bmtime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

/// Arguments of one batch update operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryArgs {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bctime: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bmtime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

impl EntryArgs {
    pub const UPDATE_ATTR: &'static str = "updateAttr";

    /// Attribute update that only rewrites the metadata block
    pub fn metadata(metadata: EntryMetadata) -> Self {
        Self {
            op: Self::UPDATE_ATTR.to_string(),
            archived: None,
            bctime: None,
            bmtime: None,
            metadata: Some(metadata),
        }
    }

    /// Attribute update that revives a directory and refreshes its times
    pub fn revive(attrs: DirectoryAttrs) -> Self {
        Self {
            op: Self::UPDATE_ATTR.to_string(),
            archived: Some(false),
            bctime: attrs.bctime,
            bmtime: attrs.bmtime,
            metadata: attrs.metadata,
        }
    }
}

/// One element of `updateDirectoriesOrFiles`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryUpdate {
    #[serde(rename = "bname")]
    pub target_id: RemoteId,
    pub args: EntryArgs,
}

impl EntryUpdate {
    pub fn new(target_id: RemoteId, args: EntryArgs) -> Self {
        Self { target_id, args }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn listing() -> DirectoryListing {
        serde_json::from_value(serde_json::json!({
            "entries": [
                {
                    "uuid": "dir-1",
                    "name": "Documents",
                    "type": "directory",
                    "metadata": {
                        "localPath": "/home/u/Documents",
                        "disabled": false,
                        "status": "Idle",
                        "lastBackupTime": 1600000000000i64
                    }
                },
                {
                    "uuid": "dir-2",
                    "name": "Old",
                    "type": "directory",
                    "deleted": true,
                    "metadata": { "localPath": "/home/u/Old" }
                },
                {
                    "uuid": "dir-3",
                    "name": "Paused",
                    "type": "directory",
                    "metadata": { "localPath": "/home/u/Paused", "disabled": true }
                },
                { "uuid": "f-1", "name": "notes.txt", "type": "file", "size": 12 }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn active_directories_skip_deleted_disabled_and_unbound() {
        let dirs = BackupDirectory::active(&listing().entries);
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].id.as_str(), "dir-1");
        assert_eq!(dirs[0].local_path(), Path::new("/home/u/Documents"));
        assert_eq!(
            dirs[0].metadata.last_backup_time,
            Some(Utc.timestamp_millis_opt(1_600_000_000_000).unwrap())
        );
    }

    #[test]
    fn lookup_by_local_path_includes_deleted_records() {
        let listing = listing();
        let found = listing.find_by_local_path(Path::new("/home/u/Old")).unwrap();
        assert_eq!(found.id.as_str(), "dir-2");
        assert!(listing
            .find_by_local_path(Path::new("/home/u/Missing"))
            .is_none());
    }

    #[test]
    fn lookup_by_name_ignores_deleted() {
        let listing = listing();
        assert!(listing.find_by_name("Old").is_none());
        assert_eq!(listing.find_by_name("notes.txt").unwrap().size, Some(12));
    }

    #[test]
    fn update_serializes_with_wire_names() {
        let at = Utc.timestamp_millis_opt(42).unwrap();
        let update = EntryUpdate::new(
            RemoteId::new("dir-1").unwrap(),
            EntryArgs::metadata(EntryMetadata::idle("/home/u/Documents", at)),
        );
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "bname": "dir-1",
                "args": {
                    "op": "updateAttr",
                    "metadata": {
                        "localPath": "/home/u/Documents",
                        "disabled": false,
                        "status": "Idle",
                        "lastBackupTime": 42
                    }
                }
            })
        );
    }

    #[test]
    fn revive_clears_archived_flag() {
        let args = EntryArgs::revive(DirectoryAttrs {
            bctime: None,
            bmtime: None,
            metadata: Some(EntryMetadata::working("/data")),
        });
        assert_eq!(args.archived, Some(false));
        assert_eq!(
            args.metadata.unwrap().status,
            DirectoryStatus::Working
        );
    }
}
