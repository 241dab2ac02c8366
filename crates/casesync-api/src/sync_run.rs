use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::batch::BatchResult;
use crate::entity::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunKind {
    Full,
    Contacts,
    Matters,
    Tasks,
}

impl SyncRunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunKind::Full => "full",
            SyncRunKind::Contacts => "contacts",
            SyncRunKind::Matters => "matters",
            SyncRunKind::Tasks => "tasks",
        }
    }

    /// Entity kinds executed by this run, in dependency order
    pub fn entity_kinds(&self) -> &'static [EntityKind] {
        match self {
            SyncRunKind::Full => &EntityKind::SYNC_ORDER,
            SyncRunKind::Contacts => &[EntityKind::Contact],
            SyncRunKind::Matters => &[EntityKind::Matter],
            SyncRunKind::Tasks => &[EntityKind::Task],
        }
    }
}

impl fmt::Display for SyncRunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncRunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncRunKind::Full),
            "contacts" => Ok(SyncRunKind::Contacts),
            "matters" => Ok(SyncRunKind::Matters),
            "tasks" => Ok(SyncRunKind::Tasks),
            other => Err(format!("unknown sync run kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Where and why a run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Entity kind being synced when the run failed, if any
    pub entity: Option<EntityKind>,
    /// "fetch", "upsert" or "run"
    pub stage: String,
    /// `SyncError::category()` of the triggering error
    pub category: String,
    pub message: String,
    /// Error source chain, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

/// Structured per-kind sub-results stored on the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetails {
    /// Keyed by remote collection name ("contacts", "matters", "tasks")
    #[serde(default)]
    pub entities: BTreeMap<String, BatchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureContext>,
}

impl RunDetails {
    pub fn entity(&self, kind: EntityKind) -> Option<&BatchResult> {
        self.entities.get(kind.collection())
    }

    pub fn entity_mut(&mut self, kind: EntityKind) -> &mut BatchResult {
        self.entities
            .entry(kind.collection().to_string())
            .or_default()
    }

    pub fn totals(&self) -> BatchResult {
        let mut total = BatchResult::default();
        for result in self.entities.values() {
            total.merge(result.clone());
        }
        total
    }
}

/// Terminal state written exactly once when a run finishes
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub error_message: Option<String>,
    pub details: RunDetails,
}

impl RunCompletion {
    pub fn success(details: RunDetails) -> Self {
        Self::from_details(RunStatus::Success, None, details)
    }

    pub fn failure(error_message: impl Into<String>, details: RunDetails) -> Self {
        Self::from_details(RunStatus::Error, Some(error_message.into()), details)
    }

    fn from_details(status: RunStatus, error_message: Option<String>, details: RunDetails) -> Self {
        let totals = details.totals();
        Self {
            status,
            records_processed: totals.processed,
            records_created: totals.created,
            records_updated: totals.updated,
            error_message,
            details,
        }
    }
}

/// Durable record of one orchestration invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub kind: SyncRunKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub error_message: Option<String>,
    pub details: RunDetails,
    pub triggered_by: Option<String>,
}

impl SyncRun {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }

    /// Succeeded, but some records were rejected
    pub fn has_record_errors(&self) -> bool {
        self.details.entities.values().any(|r| !r.errors.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub contacts: i64,
    pub exchanges: i64,
    pub tasks: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub runs_last_24h: u64,
    pub runs_last_7d: u64,
    /// Percentage of terminal runs in the last 7 days that succeeded
    pub success_rate: Option<f64>,
    pub average_duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub recent_runs: Vec<SyncRun>,
    pub last_successful_full_sync: Option<SyncRun>,
    pub entity_counts: EntityCounts,
    pub statistics: RunStatistics,
    pub sync_in_progress: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset: Option<String>,
}

/// Outcome of a minimal remote call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub rate_limit: Option<RateLimitInfo>,
    pub error: Option<String>,
}
