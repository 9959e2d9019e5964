//! Progress sampling
//!
//! Once per tick the controller folds the live counters of every task into
//! a [`ProgressSummary`] and hands it to the [`ProgressTracker`], which keeps
//! a newest-first window of samples and derives throughput and ETA from it.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use nasbackup_core::domain::{
    DriveStatus, ProgressReport, ProgressSummary, RemoteId, TaskCounters,
};

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Controller state that accompanies every summary
#[derive(Debug, Clone, Default)]
pub struct SummaryContext {
    pub status: DriveStatus,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub drive_id: Option<RemoteId>,
    pub has_file_upload: bool,
}

/// Aggregates per-task counters, clamping racy values.
///
/// Every per-task component is clamped at zero and each aggregate
/// "done" figure is capped by its total.
pub fn summarize(counters: &[TaskCounters], ctx: SummaryContext) -> ProgressSummary {
    let mut count = 0u64;
    let mut finish_count = 0u64;
    let mut size = 0u64;
    let mut complete_size = 0u64;
    let mut skip_size = 0u64;
    let mut has_file_upload = ctx.has_file_upload;

    for c in counters {
        count += non_negative(c.diff_count.max(c.read_dir_count).max(c.finish_count));
        finish_count += non_negative(c.finish_count);
        size += non_negative(c.diff_size.max(c.read_dir_size).max(c.complete_size));
        complete_size += non_negative(c.complete_size);
        skip_size += non_negative(c.skip_size);
        has_file_upload |= c.has_file_upload;
    }

    let finish_count = finish_count.min(count);
    let complete_size = complete_size.min(size);
    let skip_size = skip_size.min(complete_size);

    ProgressSummary {
        count,
        finish_count,
        size,
        complete_size,
        skip_size,
        transfer_size: complete_size.saturating_sub(skip_size),
        status: ctx.status,
        last_backup_time: ctx.last_backup_time,
        drive_id: ctx.drive_id,
        has_file_upload,
    }
}

/// Sliding window of summaries, newest first
#[derive(Debug)]
pub struct ProgressTracker {
    window: usize,
    samples: VecDeque<ProgressSummary>,
}

impl ProgressTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Adds a sample; returns a report once two or more samples exist
    pub fn record(&mut self, summary: ProgressSummary) -> Option<ProgressReport> {
        self.samples.push_front(summary);
        self.samples.truncate(self.window);

        let k = self.samples.len();
        if k < 2 {
            return None;
        }
        let newest = self.samples.front()?;
        let oldest = self.samples.back()?;
        let speed =
            (newest.transfer_size as f64 - oldest.transfer_size as f64) / (k - 1) as f64;

        let remaining = newest.size.saturating_sub(newest.complete_size) as f64;
        let rest_time = (speed > 0.0).then(|| remaining / speed);
        let progress_fraction = if newest.size == 0 {
            0.0
        } else {
            newest.complete_size as f64 / newest.size as f64
        };
        let file_progress = if newest.count > 0 {
            format!("{} / {}", newest.finish_count, newest.count)
        } else {
            "--/--".to_string()
        };

        // A shrinking transfer total still means uploads happened.
        let mut summary = newest.clone();
        if speed == 0.0 {
            summary.has_file_upload = false;
        }

        Some(ProgressReport {
            speed,
            rest_time,
            progress_fraction,
            speed_text: format!("{}/s", format_size(speed)),
            rest_time_text: rest_time.map(format_rest_time).unwrap_or_default(),
            file_progress,
            summary,
        })
    }
}

/// Human-readable byte count
pub fn format_size(bytes: f64) -> String {
    const KIB: f64 = 1024.0;
    if bytes.is_nan() || bytes <= 0.0 {
        return "0 Byte".to_string();
    }
    if bytes == 1.0 {
        return "1 Byte".to_string();
    }
    if bytes < 800.0 {
        format!("{bytes:.0} Bytes")
    } else if bytes < KIB * 800.0 {
        format!("{:.2} KB", bytes / KIB)
    } else if bytes < KIB * KIB * 800.0 {
        format!("{:.2} MB", bytes / KIB / KIB)
    } else {
        format!("{:.2} GB", bytes / KIB / KIB / KIB)
    }
}

/// Human-readable remaining time; empty when there is no estimate
pub fn format_rest_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return String::new();
    }
    let hours = (seconds / 3600.0).floor();
    let minutes = ((seconds - hours * 3600.0) / 60.0).ceil();
    if hours == 0.0 {
        format!("about {minutes:.0} minutes")
    } else if hours > 24.0 {
        "more than one day".to_string()
    } else {
        format!("{hours:.0} hours {minutes:.0} minutes")
    }
}
