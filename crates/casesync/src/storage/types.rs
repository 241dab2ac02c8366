use casesync_api::SyncError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Schema error: {0}")]
    SchemaError(String),


    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Another sync run holds a live lease")]
    RunInProgress,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidState(message) => SyncError::InvalidState(message),
            StorageError::RunInProgress => SyncError::AlreadyRunning,
            other => SyncError::Persistence(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fixed-width UTC text, so stored timestamps order lexicographically
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ")
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| {
            StorageError::SerializationError(format!(
                "Invalid timestamp in column {}: '{}' ({})",
                column, raw, e
            ))
        })
}

pub fn decode_optional_timestamp(column: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_timestamp(column, &s)).transpose()
}

pub fn encode_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn decode_optional_date(column: &str, raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| {
            StorageError::SerializationError(format!(
                "Invalid date in column {}: '{}' ({})",
                column, s, e
            ))
        })
    })
    .transpose()
}
