//! Status bookkeeping for successful sessions

use crate::api::ResticStatus;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::time::Duration;

/// Fold one successful session into the status
///
/// The count grows by exactly one per call and `firstBackupTime` is only
/// ever set once.
pub fn record_success(mut status: ResticStatus, start: DateTime<Utc>, elapsed: Duration) -> ResticStatus {
    status.backup_count += 1;
    status.last_backup_time = Some(Time(start));
    if status.first_backup_time.is_none() {
        status.first_backup_time = Some(Time(start));
    }
    status.last_backup_duration = Some(format_duration(elapsed));
    status
}

/// Format a duration compactly, e.g. `850ms`, `12.5s`, `3m4s`, `1h2m0s`
pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    if seconds == 0 {
        format!("{}ms", elapsed.as_millis())
    } else if seconds < 60 {
        let secs = format!("{:.3}", elapsed.as_secs_f64());
        format!("{}s", secs.trim_end_matches('0').trim_end_matches('.'))
    } else if seconds < 3600 {
        format!("{}m{}s", seconds / 60, seconds % 60)
    } else {
        format!(
            "{}h{}m{}s",
            seconds / 3600,
            (seconds % 3600) / 60,
            seconds % 60
        )
    }
}
