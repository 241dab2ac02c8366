//! Durable log of sync runs
//!
//! A run is created in `running` state and transitions exactly once to
//! `success` or `error`. `complete_run` refuses to touch a run that is already
//! terminal.
//!
//! The `running` row doubles as a lease shared by every process using the
//! database. Its owner refreshes `heartbeat_at` while it works; a running row
//! whose heartbeat is older than the caller's cutoff is considered abandoned.
//! `create_run` refuses to start while a live lease exists.

use async_trait::async_trait;
use casesync_api::{RunCompletion, RunDetails, RunStatus, SyncRun, SyncRunKind};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::backend::SqliteBackend;
use crate::storage::types::{
    Result, StorageError, decode_optional_timestamp, decode_timestamp, encode_timestamp,
};

#[async_trait]
pub trait SyncRunStore: Send + Sync {
    /// Insert a new `running` run with a fresh id and `started_at = now`,
    /// unless another running run has a heartbeat at or after `stale_before`.
    /// That case is `StorageError::RunInProgress`.
    async fn create_run(
        &self,
        kind: SyncRunKind,
        triggered_by: Option<&str>,
        stale_before: DateTime<Utc>,
    ) -> Result<SyncRun>;

    /// Refresh the lease of a running run. Returns false once it is terminal.
    async fn heartbeat(&self, id: &str) -> Result<bool>;

    /// Write the terminal state of a running run and return it
    async fn complete_run(&self, id: &str, completion: RunCompletion) -> Result<SyncRun>;

    async fn get_run(&self, id: &str) -> Result<Option<SyncRun>>;

    /// Most recent runs first
    async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>>;

    async fn last_successful(&self, kind: SyncRunKind) -> Result<Option<SyncRun>>;

    /// Runs started at or after `since`, most recent first
    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<SyncRun>>;

    /// Fail running runs whose last heartbeat is before `stale_before`.
    /// Returns the number touched.
    async fn fail_abandoned_runs(&self, reason: &str, stale_before: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct SqliteSyncRunStore {
    backend: SqliteBackend,
}

impl SqliteSyncRunStore {
    pub fn new(backend: SqliteBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SyncRunStore for SqliteSyncRunStore {
    async fn create_run(
        &self,
        kind: SyncRunKind,
        triggered_by: Option<&str>,
        stale_before: DateTime<Utc>,
    ) -> Result<SyncRun> {
        let run = SyncRun {
            id: Uuid::new_v4().to_string(),
            kind,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            error_message: None,
            details: RunDetails::default(),
            triggered_by: triggered_by.map(str::to_string),
        };

        let started_at = encode_timestamp(&run.started_at);
        // One statement, so the check and the insert share SQLite's write lock
        let result = sqlx::query(
            "INSERT INTO sync_runs (id, kind, status, started_at, details, triggered_by, heartbeat_at)
             SELECT ?, ?, ?, ?, ?, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM sync_runs WHERE status = 'running' AND heartbeat_at >= ?
             )",
        )
        .bind(&run.id)
        .bind(kind.as_str())
        .bind(run.status.as_str())
        .bind(&started_at)
        .bind(serde_json::to_string(&run.details)?)
        .bind(run.triggered_by.as_deref())
        .bind(&started_at)
        .bind(encode_timestamp(&stale_before))
        .execute(self.backend.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!("[SyncRunStore] Refused {} run: another run holds a live lease", kind);
            return Err(StorageError::RunInProgress);
        }

        info!("[SyncRunStore] Started {} run {}", kind, run.id);
        Ok(run)
    }

    async fn complete_run(&self, id: &str, completion: RunCompletion) -> Result<SyncRun> {
        if !completion.status.is_terminal() {
            return Err(StorageError::InvalidState(format!(
                "run {} must complete with a terminal status",
                id
            )));
        }

        let result = sqlx::query(
            "UPDATE sync_runs
             SET status = ?, completed_at = ?, records_processed = ?, records_created = ?,
                 records_updated = ?, error_message = ?, details = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(completion.status.as_str())
        .bind(encode_timestamp(&Utc::now()))
        .bind(completion.records_processed as i64)
        .bind(completion.records_created as i64)
        .bind(completion.records_updated as i64)
        .bind(completion.error_message.as_deref())
        .bind(serde_json::to_string(&completion.details)?)
        .bind(id)
        .execute(self.backend.pool())
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_run(id).await? {
                Some(run) => Err(StorageError::InvalidState(format!(
                    "run {} is already {}",
                    id,
                    run.status.as_str()
                ))),
                None => Err(StorageError::NotFound {
                    entity: "sync_runs".to_string(),
                    id: id.to_string(),
                }),
            };
        }

        self.get_run(id).await?.ok_or_else(|| StorageError::NotFound {
            entity: "sync_runs".to_string(),
            id: id.to_string(),
        })
    }

    async fn heartbeat(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_runs SET heartbeat_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(encode_timestamp(&Utc::now()))
        .bind(id)
        .execute(self.backend.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_run(&self, id: &str) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.backend.pool())
            .await?;
        row.as_ref().map(decode_run).transpose()
    }

    async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(self.backend.pool())
            .await?;
        rows.iter().map(decode_run).collect()
    }

    async fn last_successful(&self, kind: SyncRunKind) -> Result<Option<SyncRun>> {
        let row = sqlx::query(
            "SELECT * FROM sync_runs WHERE kind = ? AND status = 'success'
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .fetch_optional(self.backend.pool())
        .await?;
        row.as_ref().map(decode_run).transpose()
    }

    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_runs WHERE started_at >= ? ORDER BY started_at DESC, rowid DESC",
        )
        .bind(encode_timestamp(&since))
        .fetch_all(self.backend.pool())
        .await?;
        rows.iter().map(decode_run).collect()
    }

    async fn fail_abandoned_runs(&self, reason: &str, stale_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sync_runs SET status = 'error', completed_at = ?, error_message = ?
             WHERE status = 'running' AND heartbeat_at < ?",
        )
        .bind(encode_timestamp(&Utc::now()))
        .bind(reason)
        .bind(encode_timestamp(&stale_before))
        .execute(self.backend.pool())
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            warn!("[SyncRunStore] Marked {} abandoned run(s) as failed", count);
        }
        Ok(count)
    }
}

fn decode_run(row: &SqliteRow) -> Result<SyncRun> {
    let kind: SyncRunKind = row
        .try_get::<String, _>("kind")?
        .parse()
        .map_err(StorageError::SerializationError)?;
    let status: RunStatus = row
        .try_get::<String, _>("status")?
        .parse()
        .map_err(StorageError::SerializationError)?;
    let details: RunDetails = serde_json::from_str(&row.try_get::<String, _>("details")?)?;

    Ok(SyncRun {
        id: row.try_get("id")?,
        kind,
        status,
        started_at: decode_timestamp("started_at", &row.try_get::<String, _>("started_at")?)?,
        completed_at: decode_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        records_processed: row.try_get::<i64, _>("records_processed")?.max(0) as u64,
        records_created: row.try_get::<i64, _>("records_created")?.max(0) as u64,
        records_updated: row.try_get::<i64, _>("records_updated")?.max(0) as u64,
        error_message: row.try_get("error_message")?,
        details,
        triggered_by: row.try_get("triggered_by")?,
    })
}
