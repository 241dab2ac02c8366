//! Seam between the sync engine and an external system
//!
//! The engine is written against `SyncSource`; each external system crate
//! (e.g. `casesync-practicepanther`) provides an implementation that knows
//! how to page through its collections and map records to local fields.

use async_trait::async_trait;
use casesync_api::{EntityKind, HealthReport, Result, TransformedRecord};
use tokio_util::sync::CancellationToken;

use crate::storage::EntityStore;

/// A fetched remote record, as far as the engine needs to know it
pub trait RemoteEntity {
    fn kind(&self) -> EntityKind;

    /// `None` when the payload carried no usable id
    fn external_id(&self) -> Option<&str>;
}

#[async_trait]
pub trait SyncSource: Send + Sync {
    type Record: RemoteEntity + Send + Sync + 'static;

    /// Short name used in logs and `triggered_by` defaults
    fn source_name(&self) -> &str;

    /// Fetch every record of `kind`. Errors here abort the run.
    async fn fetch_all(
        &self,
        kind: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Record>>;

    /// Map one remote record to local fields, resolving references through
    /// `store`. Errors here are recorded against the record only.
    async fn transform(
        &self,
        record: &Self::Record,
        store: &dyn EntityStore,
    ) -> Result<TransformedRecord>;

    async fn health_check(&self) -> HealthReport;
}
