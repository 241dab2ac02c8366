//! PracticePanther implementation of the engine's `SyncSource`
//!
//! - `fetch_all` pages through one collection with the include expansions the
//!   converters need, then decodes each payload into a `RemoteRecord`
//! - `transform` dispatches to the per-kind converters
//! - malformed payloads are passed through and rejected at transform time so
//!   they are counted against the record, not the run

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use casesync::core::{RemoteEntity, SyncSource};
use casesync::storage::EntityStore;
use casesync_api::{EntityKind, HealthReport, Result, SyncError, TransformedRecord};

use crate::converters::{transform_contact, transform_matter, transform_task};
use crate::models::RemoteRecord;
use crate::paginator::{PageSource, PaginationSettings, Paginator};

pub const SOURCE_NAME: &str = "practicepanther";

/// Related records expanded inline for each collection
pub fn includes_for(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Contact => &[],
        EntityKind::Matter => &["client", "assigned_to_users"],
        EntityKind::Task => &["matter", "assigned_to"],
    }
}

pub struct PracticePantherSyncProvider<P: PageSource + ?Sized> {
    paginator: Paginator<P>,
}

impl<P: PageSource + ?Sized> PracticePantherSyncProvider<P> {
    pub fn new(source: Arc<P>) -> Self {
        Self::with_settings(source, PaginationSettings::default())
    }

    pub fn with_settings(source: Arc<P>, settings: PaginationSettings) -> Self {
        Self {
            paginator: Paginator::new(source, settings),
        }
    }

    pub fn paginator(&self) -> &Paginator<P> {
        &self.paginator
    }
}

#[async_trait]
impl<P: PageSource + ?Sized + 'static> SyncSource for PracticePantherSyncProvider<P> {
    type Record = RemoteRecord;

    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    #[tracing::instrument(name = "provider.practicepanther.fetch_all", skip(self, cancel))]
    async fn fetch_all(
        &self,
        kind: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteRecord>> {
        let page_size = self.paginator.settings().page_size;
        let raw = self
            .paginator
            .fetch_all(kind.collection(), page_size, includes_for(kind), cancel)
            .await?;

        let records: Vec<RemoteRecord> = raw
            .into_iter()
            .map(|value| RemoteRecord::decode(kind, value))
            .collect();
        let malformed = records
            .iter()
            .filter(|r| matches!(r, RemoteRecord::Malformed { .. }))
            .count();

        info!(
            "[PracticePantherSyncProvider] Fetched {} {} record(s) ({} malformed)",
            records.len(),
            kind,
            malformed
        );
        Ok(records)
    }

    async fn transform(
        &self,
        record: &RemoteRecord,
        store: &dyn EntityStore,
    ) -> Result<TransformedRecord> {
        let now = Utc::now();
        match record {
            RemoteRecord::Contact(contact) => transform_contact(contact, now),
            RemoteRecord::Matter(matter) => transform_matter(matter, store, now).await,
            RemoteRecord::Task(task) => transform_task(task, store, now).await,
            RemoteRecord::Malformed { reason, .. } => Err(SyncError::transform(
                record.kind(),
                record.external_id().unwrap_or("<unknown>"),
                reason.clone(),
            )),
        }
    }

    async fn health_check(&self) -> HealthReport {
        self.paginator.source().test_connection().await
    }
}
