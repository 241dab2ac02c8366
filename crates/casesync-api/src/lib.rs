//! Shared types for the casesync engine
//!
//! - `entity` - entity kinds and the local field sets each kind maps to
//! - `batch` - per-record outcomes and their per-batch aggregation
//! - `sync_run` - the durable run record and the status surface built from it
//! - `error` - the `SyncError` taxonomy shared by every crate

pub mod batch;
pub mod entity;
pub mod error;
pub mod sync_run;

pub use batch::{BatchResult, RecordOutcome};
pub use entity::{
    ContactFields, EntityFields, EntityKind, ExchangeFields, ExchangeStatus, LocalEntity,
    LocalUser, ParticipantLink, ParticipantRole, TaskFields, TaskPriority, TaskStatus,
    TransformedRecord,
};
pub use error::{Result, SyncError};
pub use sync_run::{
    EntityCounts, FailureContext, HealthReport, RateLimitInfo, RunCompletion, RunDetails,
    RunStatistics, RunStatus, SyncRun, SyncRunKind, SyncStatusReport,
};
