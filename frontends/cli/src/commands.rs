use anyhow::{Context, Result};
use casesync::core::SyncOrchestrator;
use casesync::storage::{SqliteBackend, SqliteEntityStore, SqliteSyncRunStore};
use casesync_api::{HealthReport, RunStatus, SyncRun, SyncRunKind, SyncStatusReport};
use casesync_practicepanther::{PracticePantherClient, PracticePantherSyncProvider, StaticToken};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CliConfig;

pub type Orchestrator = SyncOrchestrator<PracticePantherSyncProvider<PracticePantherClient>>;

pub async fn build_orchestrator(config: &CliConfig) -> Result<Orchestrator> {
    let token = config.api_token.clone().unwrap_or_default();
    let client = PracticePantherClient::new(
        config.client_settings(),
        Arc::new(StaticToken::new(token)),
    )?;
    let provider =
        PracticePantherSyncProvider::with_settings(Arc::new(client), config.pagination_settings());

    let backend = SqliteBackend::open(&config.database, config.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let store = Arc::new(SqliteEntityStore::new(backend.clone()));
    let runs = Arc::new(SqliteSyncRunStore::new(backend));

    Ok(SyncOrchestrator::new(Arc::new(provider), store, runs).with_settings(config.sync_settings()))
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[casesync] Interrupt received, cancelling sync");
            token.cancel();
        }
    });
}

pub async fn run_sync(
    config: &CliConfig,
    kind: SyncRunKind,
    triggered_by: Option<String>,
) -> Result<SyncRun> {
    config.require_api_token()?;
    let orchestrator = build_orchestrator(config).await?;

    // Only runs whose lease expired; a sync still running elsewhere keeps its row
    let recovered = orchestrator.recover_abandoned_runs().await?;
    if recovered > 0 {
        warn!("[casesync] Marked {} abandoned run(s) as failed", recovered);
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let triggered_by = triggered_by.unwrap_or_else(|| "cli".to_string());
    let run = orchestrator
        .run(kind, Some(triggered_by.as_str()), &cancel)
        .await?;
    info!("[casesync] Run {} finished as {}", run.id, run.status.as_str());
    Ok(run)
}

pub async fn status(config: &CliConfig) -> Result<SyncStatusReport> {
    let orchestrator = build_orchestrator(config).await?;
    Ok(orchestrator.get_sync_status().await?)
}

pub async fn health(config: &CliConfig) -> Result<HealthReport> {
    config.require_api_token()?;
    let orchestrator = build_orchestrator(config).await?;
    Ok(orchestrator.health_check().await)
}

pub fn format_run(run: &SyncRun) -> String {
    let mut out = String::new();
    let duration = run
        .duration()
        .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(
        out,
        "{} {:<8} {:<7} started {} ({}) processed={} created={} updated={}",
        run.id,
        run.kind.as_str(),
        run.status.as_str(),
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        duration,
        run.records_processed,
        run.records_created,
        run.records_updated
    );

    for (collection, result) in &run.details.entities {
        if !result.errors.is_empty() {
            let _ = writeln!(out, "  {}: {} rejected record(s)", collection, result.failed());
            for error in result.errors.iter().take(5) {
                let _ = writeln!(out, "    - {}", error);
            }
            if result.errors.len() > 5 {
                let _ = writeln!(out, "    ... and {} more", result.errors.len() - 5);
            }
        }
    }

    if run.status == RunStatus::Error {
        match &run.details.failure {
            Some(failure) => {
                let _ = writeln!(
                    out,
                    "  failed during {} of {} [{}]: {}",
                    failure.stage,
                    failure.entity.map(|k| k.collection()).unwrap_or("run"),
                    failure.category,
                    failure.message
                );
            }
            None => {
                if let Some(message) = &run.error_message {
                    let _ = writeln!(out, "  failed: {}", message);
                }
            }
        }
    }
    out
}

pub fn format_status(report: &SyncStatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Sync in progress: {}",
        if report.sync_in_progress { "yes" } else { "no" }
    );
    let _ = writeln!(
        out,
        "Local records: {} contacts, {} exchanges, {} tasks",
        report.entity_counts.contacts, report.entity_counts.exchanges, report.entity_counts.tasks
    );
    match &report.last_successful_full_sync {
        Some(run) => {
            let _ = writeln!(
                out,
                "Last successful full sync: {}",
                run.completed_at
                    .unwrap_or(run.started_at)
                    .format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => {
            let _ = writeln!(out, "Last successful full sync: never");
        }
    }

    let stats = &report.statistics;
    let _ = writeln!(
        out,
        "Runs: {} in last 24h, {} in last 7d, success rate {}, average duration {}",
        stats.runs_last_24h,
        stats.runs_last_7d,
        stats
            .success_rate
            .map(|r| format!("{:.1}%", r))
            .unwrap_or_else(|| "-".to_string()),
        stats
            .average_duration_secs
            .map(|s| format!("{:.1}s", s))
            .unwrap_or_else(|| "-".to_string())
    );

    if !report.recent_runs.is_empty() {
        let _ = writeln!(out, "\nRecent runs:");
        for run in &report.recent_runs {
            out.push_str(&format_run(run));
        }
    }
    out
}

pub fn format_health(report: &HealthReport) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "{} ({} ms",
        if report.healthy { "healthy" } else { "unhealthy" },
        report.latency_ms
    );
    if let Some(status) = report.status_code {
        let _ = write!(out, ", HTTP {}", status);
    }
    out.push(')');
    if let Some(limit) = &report.rate_limit {
        let _ = write!(
            out,
            "\nrate limit: {}/{} remaining",
            limit
                .remaining
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string()),
            limit
                .limit
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        if let Some(reset) = &limit.reset {
            let _ = write!(out, ", resets at {}", reset);
        }
    }
    if let Some(error) = &report.error {
        let _ = write!(out, "\nerror: {}", error);
    }
    out
}
