//! Bounded-concurrency find-or-create-or-update over a batch of remote records

use casesync_api::{BatchResult, EntityKind, RecordOutcome, Result, SyncError};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::source::{RemoteEntity, SyncSource};
use crate::storage::EntityStore;

const UNKNOWN_ID: &str = "<unknown>";

pub struct BatchUpserter {
    store: Arc<dyn EntityStore>,
}

impl BatchUpserter {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Apply every record in `batch`, at most `concurrency` at a time, and
    /// fold each outcome into `result` as it lands.
    ///
    /// Records go out in windows of `concurrency`. A started window always
    /// runs to completion, so every write that reaches the store is counted.
    /// Cancellation is checked between windows and is the only `Err`.
    pub async fn apply<S>(
        &self,
        source: &S,
        kind: EntityKind,
        batch: &[S::Record],
        concurrency: usize,
        result: &mut BatchResult,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: SyncSource + ?Sized,
    {
        for window in batch.chunks(concurrency.max(1)) {
            if cancel.is_cancelled() {
                debug!(
                    "[BatchUpserter] {} batch cancelled after {} record(s)",
                    kind, result.processed
                );
                return Err(SyncError::cancelled(format!(
                    "stopped while upserting {} records",
                    kind
                )));
            }

            let mut in_flight = window
                .iter()
                .map(|record| self.upsert_one(source, kind, record))
                .collect::<FuturesUnordered<_>>();

            while let Some(outcome) = in_flight.next().await {
                result.record(outcome);
            }
        }

        debug!(
            "[BatchUpserter] Applied {} batch of {}, totals: processed={} created={} updated={} failed={}",
            kind,
            batch.len(),
            result.processed,
            result.created,
            result.updated,
            result.failed()
        );
        Ok(())
    }

    /// Transform and persist a single record, never failing the caller
    pub async fn upsert_one<S>(&self, source: &S, kind: EntityKind, record: &S::Record) -> RecordOutcome
    where
        S: SyncSource + ?Sized,
    {
        match self.try_upsert(source, record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let external_id = record.external_id().unwrap_or(UNKNOWN_ID);
                warn!("[BatchUpserter] {} {} failed: {}", kind, external_id, e);
                RecordOutcome::Failed(format!("{} {}: {}", kind, external_id, failure_message(&e)))
            }
        }
    }

    async fn try_upsert<S>(&self, source: &S, record: &S::Record) -> Result<RecordOutcome>
    where
        S: SyncSource + ?Sized,
    {
        let transformed = source.transform(record, self.store.as_ref()).await?;
        let fields = &transformed.fields;

        let (entity, created) = self.store.find_or_create(fields).await?;
        let outcome = if created {
            debug!(
                "[BatchUpserter] Created {} {} (id={})",
                entity.kind(),
                entity.external_id(),
                entity.id
            );
            RecordOutcome::Created
        } else {
            let changed = self.store.update(&entity, fields).await?;
            debug!(
                "[BatchUpserter] Updated {} {} (id={}, changed={})",
                entity.kind(),
                entity.external_id(),
                entity.id,
                changed
            );
            RecordOutcome::Updated
        };

        for link in &transformed.participants {
            self.store.link_participant(entity.id, link).await?;
        }

        Ok(outcome)
    }
}

/// Transform errors already carry kind and id; keep only the message
fn failure_message(error: &SyncError) -> String {
    match error {
        SyncError::Transform { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
