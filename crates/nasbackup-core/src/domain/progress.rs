//! Progress counters and the summaries built from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{drive::DriveStatus, newtypes::RemoteId};

/// Live counters of one task
///
/// Counters are signed: executors update them from several places and a
/// snapshot can briefly observe negative or inconsistent values. Readers
/// clamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounters {
    pub diff_count: i64,
    pub read_dir_count: i64,
    pub finish_count: i64,
    pub diff_size: i64,
    pub read_dir_size: i64,
    pub complete_size: i64,
    pub skip_size: i64,
    pub has_file_upload: bool,
}

/// Aggregate of all active tasks at one sampling tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub count: u64,
    pub finish_count: u64,
    pub size: u64,
    pub complete_size: u64,
    pub skip_size: u64,
    pub transfer_size: u64,
    pub status: DriveStatus,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_backup_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<RemoteId>,
    pub has_file_upload: bool,
}

/// Broadcast payload of one progress tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    /// Bytes per second over the sample window
    pub speed: f64,
    /// Seconds left, absent while nothing is moving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_time: Option<f64>,
    /// `complete_size / size`, 0 when nothing is pending
    pub progress_fraction: f64,
    pub speed_text: String,
    pub rest_time_text: String,
    /// `"finish / count"`, or `"--/--"` when there is nothing to count
    pub file_progress: String,
    #[serde(flatten)]
    pub summary: ProgressSummary,
}
