//! Run-level state machine: running -> success | error
//!
//! One run walks its entity kinds in dependency order (contacts, matters,
//! tasks). Each kind is fetched in full, then applied in chunks through the
//! `BatchUpserter`. A fatal error stops the run where it is; kinds already
//! applied stay applied and their counts stay on the run.
//!
//! Two locks keep runs single-flight. An in-process mutex rejects overlap
//! between orchestrators sharing it. The `running` row in the run log is a
//! lease kept alive by a heartbeat task, which rejects overlap between
//! processes sharing the database.

use casesync_api::{
    EntityCounts, EntityKind, FailureContext, HealthReport, Result, RunCompletion, RunDetails,
    RunStatus, SyncError, SyncRun, SyncRunKind, SyncStatusReport,
};
use chrono::{DateTime, Duration, Utc};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::core::source::SyncSource;
use crate::core::status::compute_statistics;
use crate::core::upserter::BatchUpserter;
use crate::storage::{EntityStore, SyncRunStore};

pub const ABANDONED_RUN_REASON: &str = "abandoned: process exited before completion";

/// Records applied concurrently per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub contacts: usize,
    pub matters: usize,
    pub tasks: usize,
}

impl BatchSizes {
    pub fn for_kind(&self, kind: EntityKind) -> usize {
        let size = match kind {
            EntityKind::Contact => self.contacts,
            EntityKind::Matter => self.matters,
            EntityKind::Task => self.tasks,
        };
        size.max(1)
    }
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            contacts: 50,
            matters: 25,
            tasks: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub batch_sizes: BatchSizes,
    /// Runs listed by `get_sync_status`
    pub recent_runs_limit: u32,
    /// A running run whose heartbeat is older than this is abandoned
    pub run_lease: StdDuration,
}

impl SyncSettings {
    /// Heartbeats land four times per lease
    pub fn heartbeat_interval(&self) -> StdDuration {
        (self.run_lease / 4).max(StdDuration::from_millis(1))
    }

    /// Cutoff before which a running run's heartbeat counts as stale
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lease = Duration::from_std(self.run_lease).unwrap_or_else(|_| Duration::days(365));
        now - lease
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_sizes: BatchSizes::default(),
            recent_runs_limit: 10,
            run_lease: StdDuration::from_secs(300),
        }
    }
}

/// Where a run stopped, carried from the failing step to the run record
struct RunFailure {
    entity: Option<EntityKind>,
    stage: &'static str,
    error: SyncError,
}

impl RunFailure {
    fn new(entity: EntityKind, stage: &'static str, error: SyncError) -> Self {
        Self {
            entity: Some(entity),
            stage,
            error,
        }
    }

    fn context(&self) -> FailureContext {
        let mut chain = Vec::new();
        let mut current: Option<&dyn StdError> = Some(&self.error);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }

        FailureContext {
            entity: self.entity,
            stage: self.stage.to_string(),
            category: self.error.category().to_string(),
            message: self.error.to_string(),
            chain,
        }
    }
}

pub struct SyncOrchestrator<S: SyncSource> {
    source: Arc<S>,
    store: Arc<dyn EntityStore>,
    runs: Arc<dyn SyncRunStore>,
    upserter: BatchUpserter,
    settings: SyncSettings,
    run_lock: Arc<Mutex<()>>,
}

impl<S: SyncSource> SyncOrchestrator<S> {
    pub fn new(source: Arc<S>, store: Arc<dyn EntityStore>, runs: Arc<dyn SyncRunStore>) -> Self {
        Self {
            source,
            upserter: BatchUpserter::new(store.clone()),
            store,
            runs,
            settings: SyncSettings::default(),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a run lock with other orchestrators syncing the same account
    pub fn with_run_lock(mut self, run_lock: Arc<Mutex<()>>) -> Self {
        self.run_lock = run_lock;
        self
    }

    pub fn run_lock(&self) -> Arc<Mutex<()>> {
        self.run_lock.clone()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Whether a run currently holds the lock
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    pub async fn run_full_sync(
        &self,
        triggered_by: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncRun> {
        self.run(SyncRunKind::Full, triggered_by, cancel).await
    }

    pub async fn sync_contacts(
        &self,
        triggered_by: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncRun> {
        self.run(SyncRunKind::Contacts, triggered_by, cancel).await
    }

    pub async fn sync_matters(
        &self,
        triggered_by: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncRun> {
        self.run(SyncRunKind::Matters, triggered_by, cancel).await
    }

    pub async fn sync_tasks(
        &self,
        triggered_by: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncRun> {
        self.run(SyncRunKind::Tasks, triggered_by, cancel).await
    }

    /// Execute one run and return its terminal record.
    ///
    /// Fatal sync errors end up on the returned run, not in `Err`. `Err` means
    /// another run holds the lock or lease, or the run log itself failed.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn run(
        &self,
        kind: SyncRunKind,
        triggered_by: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncRun> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            warn!("[SyncOrchestrator] Rejected {} run: another run is in progress", kind);
            SyncError::AlreadyRunning
        })?;

        let run = self
            .runs
            .create_run(kind, triggered_by, self.settings.stale_before(Utc::now()))
            .await?;
        let _heartbeat = self.keep_lease_alive(&run.id);
        info!(
            "[SyncOrchestrator] Starting {} sync run {} from {}",
            kind,
            run.id,
            self.source.source_name()
        );

        let mut details = RunDetails::default();
        let completion = match self.execute(kind, &mut details, cancel).await {
            Ok(()) => RunCompletion::success(details),
            Err(failure) => {
                let context = failure.context();
                error!(
                    "[SyncOrchestrator] Run {} failed during {} of {}: {}",
                    run.id,
                    context.stage,
                    context
                        .entity
                        .map(|k| k.collection())
                        .unwrap_or("run"),
                    context.message
                );
                let message = context.message.clone();
                details.failure = Some(context);
                RunCompletion::failure(message, details)
            }
        };

        let finished = self.runs.complete_run(&run.id, completion).await?;
        match finished.status {
            RunStatus::Success if finished.has_record_errors() => warn!(
                "[SyncOrchestrator] Run {} succeeded with rejected records: processed={} created={} updated={}",
                finished.id,
                finished.records_processed,
                finished.records_created,
                finished.records_updated
            ),
            _ => info!(
                "[SyncOrchestrator] Run {} finished as {}: processed={} created={} updated={}",
                finished.id,
                finished.status.as_str(),
                finished.records_processed,
                finished.records_created,
                finished.records_updated
            ),
        }
        Ok(finished)
    }

    /// Refresh the lease of `run_id` until the returned guard is dropped
    fn keep_lease_alive(&self, run_id: &str) -> DropGuard {
        let stop = CancellationToken::new();
        let runs = self.runs.clone();
        let run_id = run_id.to_string();
        let interval = self.settings.heartbeat_interval();
        let stopped = stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => match runs.heartbeat(&run_id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!("[SyncOrchestrator] Run {} is no longer running, heartbeat stopped", run_id);
                            break;
                        }
                        Err(e) => warn!("[SyncOrchestrator] Heartbeat for run {} failed: {}", run_id, e),
                    },
                }
            }
        });

        stop.drop_guard()
    }

    async fn execute(
        &self,
        kind: SyncRunKind,
        details: &mut RunDetails,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), RunFailure> {
        for &entity in kind.entity_kinds() {
            if cancel.is_cancelled() {
                return Err(RunFailure::new(
                    entity,
                    "fetch",
                    SyncError::cancelled(format!("cancelled before {}", entity.collection())),
                ));
            }

            let records = self
                .source
                .fetch_all(entity, cancel)
                .await
                .map_err(|e| RunFailure::new(entity, "fetch", e))?;
            info!(
                "[SyncOrchestrator] Fetched {} {} record(s)",
                records.len(),
                entity
            );

            let batch_size = self.settings.batch_sizes.for_kind(entity);
            self.upserter
                .apply(
                    self.source.as_ref(),
                    entity,
                    &records,
                    batch_size,
                    details.entity_mut(entity),
                    cancel,
                )
                .await
                .map_err(|e| RunFailure::new(entity, "upsert", e))?;
        }
        Ok(())
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatusReport> {
        let recent_runs = self.runs.recent_runs(self.settings.recent_runs_limit).await?;
        let last_successful_full_sync = self.runs.last_successful(SyncRunKind::Full).await?;

        let now = Utc::now();
        let window = self.runs.runs_since(now - Duration::days(7)).await?;
        let statistics = compute_statistics(&window, now);

        let entity_counts = EntityCounts {
            contacts: self.store.count(EntityKind::Contact).await?,
            exchanges: self.store.count(EntityKind::Matter).await?,
            tasks: self.store.count(EntityKind::Task).await?,
        };

        let sync_in_progress =
            self.is_running() || recent_runs.iter().any(|r| r.status == RunStatus::Running);

        Ok(SyncStatusReport {
            recent_runs,
            last_successful_full_sync,
            entity_counts,
            statistics,
            sync_in_progress,
        })
    }

    pub async fn health_check(&self) -> HealthReport {
        self.source.health_check().await
    }

    /// Fail runs left `running` whose lease has expired. Runs still
    /// heartbeating, from this process or another, are left alone.
    pub async fn recover_abandoned_runs(&self) -> Result<u64> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;
        let stale_before = self.settings.stale_before(Utc::now());
        Ok(self
            .runs
            .fail_abandoned_runs(ABANDONED_RUN_REASON, stale_before)
            .await?)
    }
}
