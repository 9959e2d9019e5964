//! Domain types for the backup daemon
//!
//! - Newtypes for remote identifiers
//! - Drive and directory records as stored by the NAS
//! - Filesystem change events and the per-root change tree
//! - Error/warning issues reported per turn
//! - Progress counters and summaries

pub mod change;
pub mod directory;
pub mod drive;
pub mod errors;
pub mod issue;
pub mod newtypes;
pub mod progress;

pub use change::{ChangeKind, ChangeNode, ChangeTree, FileChangeEvent};
pub use directory::{
    BackupDirectory, DirectoryAttrs, DirectoryListing, DirectoryStatus, EntryArgs, EntryKind,
    EntryMetadata, EntryUpdate, RemoteEntry,
};
pub use drive::{BackupDrive, DriveClient, DrivePatch, DriveStatus};
pub use errors::DomainError;
pub use issue::{BackupIssue, ErrorSnapshot, IssueKind, CODE_UNREADABLE_DIRECTORY};
pub use newtypes::RemoteId;
pub use progress::{ProgressReport, ProgressSummary, TaskCounters};
