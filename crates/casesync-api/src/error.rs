use crate::entity::EntityKind;

/// Errors crossing component boundaries in the sync engine.
///
/// Per-record variants (`Transform`, `Persistence`) are caught and counted by
/// the batch upserter. Everything else aborts the current run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Rate limited by remote API, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Remote API returned HTTP {status}: {body}")]
    RemoteApi { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response from remote API: {0}")]
    InvalidResponse(String),

    #[error("Cannot transform {kind} {external_id}: {message}")]
    Transform {
        kind: EntityKind,
        external_id: String,
        message: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Gave up on {collection} page {page} after {attempts} rate-limited attempts")]
    RetriesExhausted {
        collection: String,
        page: u32,
        attempts: u32,
    },

    #[error("Sync cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("A sync run is already in progress for this account")]
    AlreadyRunning,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn cancelled(reason: impl Into<String>) -> Self {
        SyncError::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn transform(kind: EntityKind, external_id: &str, message: impl Into<String>) -> Self {
        SyncError::Transform {
            kind,
            external_id: external_id.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable category, recorded in run details
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::RateLimited { .. } => "rate_limited",
            SyncError::RemoteApi { .. } => "remote_api",
            SyncError::Transport(_) => "transport",
            SyncError::InvalidResponse(_) => "invalid_response",
            SyncError::Transform { .. } => "transform",
            SyncError::Persistence(_) => "persistence",
            SyncError::RetriesExhausted { .. } => "retries_exhausted",
            SyncError::Cancelled { .. } => "cancelled",
            SyncError::AlreadyRunning => "already_running",
            SyncError::InvalidState(_) => "invalid_state",
            SyncError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
