use casesync_api::{RunStatistics, RunStatus, SyncRun};
use chrono::{DateTime, Duration, Utc};

/// Aggregate run statistics relative to `now`.
///
/// Success rate is a percentage over terminal runs of the last 7 days;
/// runs still in progress are counted but not rated.
pub fn compute_statistics(runs: &[SyncRun], now: DateTime<Utc>) -> RunStatistics {
    let day_ago = now - Duration::hours(24);
    let week_ago = now - Duration::days(7);

    let week: Vec<&SyncRun> = runs.iter().filter(|r| r.started_at >= week_ago).collect();
    let runs_last_24h = week.iter().filter(|r| r.started_at >= day_ago).count() as u64;

    let terminal: Vec<&&SyncRun> = week.iter().filter(|r| r.status.is_terminal()).collect();
    let success_rate = if terminal.is_empty() {
        None
    } else {
        let succeeded = terminal
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count();
        Some(succeeded as f64 * 100.0 / terminal.len() as f64)
    };

    let durations: Vec<f64> = week
        .iter()
        .filter_map(|r| r.duration())
        .map(|d| d.num_milliseconds() as f64 / 1000.0)
        .collect();
    let average_duration_secs = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    };

    RunStatistics {
        runs_last_24h,
        runs_last_7d: week.len() as u64,
        success_rate,
        average_duration_secs,
    }
}
