//! Scripted in-memory `SyncSource`
//!
//! Records are plain structs keyed by kind. Fetches can be scripted to fail
//! or to block until cancelled, and single transforms can be held until
//! released, which is enough to drive the orchestrator through every
//! terminal state without HTTP.

use async_trait::async_trait;
use casesync_api::{
    ContactFields, EntityFields, EntityKind, ExchangeFields, ExchangeStatus, HealthReport,
    ParticipantLink, Result, SyncError, TaskFields, TaskPriority, TaskStatus, TransformedRecord,
};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::{RemoteEntity, SyncSource};
use crate::storage::{Criteria, EntityStore};

#[derive(Debug, Clone, PartialEq)]
pub struct FakeRecord {
    pub kind: EntityKind,
    pub external_id: Option<String>,
    /// Contact name, matter name or task subject
    pub name: String,
    /// External id of the parent: client contact for matters, matter for tasks
    pub parent_ref: Option<String>,
}

impl FakeRecord {
    pub fn contact(external_id: &str, name: &str) -> Self {
        Self {
            kind: EntityKind::Contact,
            external_id: Some(external_id.to_string()),
            name: name.to_string(),
            parent_ref: None,
        }
    }

    pub fn matter(external_id: &str, name: &str, client_ref: Option<&str>) -> Self {
        Self {
            kind: EntityKind::Matter,
            external_id: Some(external_id.to_string()),
            name: name.to_string(),
            parent_ref: client_ref.map(str::to_string),
        }
    }

    pub fn task(external_id: &str, subject: &str, matter_ref: Option<&str>) -> Self {
        Self {
            kind: EntityKind::Task,
            external_id: Some(external_id.to_string()),
            name: subject.to_string(),
            parent_ref: matter_ref.map(str::to_string),
        }
    }

    /// A record without an id
    pub fn without_id(kind: EntityKind) -> Self {
        Self {
            kind,
            external_id: None,
            name: "orphan".to_string(),
            parent_ref: None,
        }
    }

    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl RemoteEntity for FakeRecord {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }
}

pub struct FakeSource {
    records: Mutex<HashMap<EntityKind, Vec<FakeRecord>>>,
    fetch_failures: Mutex<HashMap<EntityKind, SyncError>>,
    blocked: Mutex<HashSet<EntityKind>>,
    fetch_started: Notify,
    fetch_calls: AtomicUsize,
    held_transforms: Mutex<HashSet<String>>,
    transform_blocked: Notify,
    transform_release: CancellationToken,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            blocked: Mutex::new(HashSet::new()),
            fetch_started: Notify::new(),
            fetch_calls: AtomicUsize::new(0),
            held_transforms: Mutex::new(HashSet::new()),
            transform_blocked: Notify::new(),
            transform_release: CancellationToken::new(),
        }
    }

    pub fn with_records(records: Vec<FakeRecord>) -> Self {
        let source = Self::new();
        source.set_records(records);
        source
    }

    /// Replace the remote contents; kinds absent from `records` become empty
    pub fn set_records(&self, records: Vec<FakeRecord>) {
        let mut by_kind: HashMap<EntityKind, Vec<FakeRecord>> = HashMap::new();
        for record in records {
            by_kind.entry(record.kind).or_default().push(record);
        }
        *self.records.lock().unwrap() = by_kind;
    }

    /// Make every fetch of `kind` fail with `error`
    pub fn fail_fetch(&self, kind: EntityKind, error: SyncError) {
        self.fetch_failures.lock().unwrap().insert(kind, error);
    }

    pub fn clear_failures(&self) {
        self.fetch_failures.lock().unwrap().clear();
    }

    /// Make fetches of `kind` wait until the run is cancelled
    pub fn block_fetch(&self, kind: EntityKind) {
        self.blocked.lock().unwrap().insert(kind);
    }

    /// Resolves once a fetch has begun (immediately if one already has)
    pub async fn fetch_started(&self) {
        self.fetch_started.notified().await
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Hold the transform of `external_id` until `release_transforms`
    pub fn block_transform(&self, external_id: &str) {
        self.held_transforms
            .lock()
            .unwrap()
            .insert(external_id.to_string());
    }

    /// Resolves once a held transform is waiting
    pub async fn transform_blocked(&self) {
        self.transform_blocked.notified().await
    }

    pub fn release_transforms(&self) {
        self.transform_release.cancel();
    }
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncSource for FakeSource {
    type Record = FakeRecord;

    fn source_name(&self) -> &str {
        "fake"
    }

    async fn fetch_all(
        &self,
        kind: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<FakeRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_started.notify_one();

        let blocked = self.blocked.lock().unwrap().contains(&kind);
        if blocked {
            cancel.cancelled().await;
            return Err(SyncError::cancelled(format!("fetch of {} interrupted", kind.collection())));
        }

        if let Some(error) = self.fetch_failures.lock().unwrap().get(&kind) {
            return Err(error.clone());
        }

        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn transform(
        &self,
        record: &FakeRecord,
        store: &dyn EntityStore,
    ) -> Result<TransformedRecord> {
        let held = record
            .external_id
            .as_deref()
            .is_some_and(|id| self.held_transforms.lock().unwrap().contains(id));
        if held {
            self.transform_blocked.notify_one();
            self.transform_release.cancelled().await;
        }

        let external_id = record
            .external_id
            .clone()
            .ok_or_else(|| SyncError::transform(record.kind, "<unknown>", "missing required field 'id'"))?;
        if record.name.trim().is_empty() {
            return Err(SyncError::transform(
                record.kind,
                &external_id,
                "missing required field 'name'",
            ));
        }

        let pp_data = json!({ "id": external_id, "name": record.name });
        let last_sync_at = Utc::now();

        let parent_kind = match record.kind {
            EntityKind::Contact => None,
            EntityKind::Matter => Some(EntityKind::Contact),
            EntityKind::Task => Some(EntityKind::Matter),
        };
        let parent_id = match (parent_kind, record.parent_ref.as_deref()) {
            (Some(kind), Some(parent)) => store
                .find_one(kind, Criteria::ExternalId(parent))
                .await?
                .map(|entity| entity.id),
            _ => None,
        };

        let transformed = match record.kind {
            EntityKind::Contact => TransformedRecord::new(EntityFields::Contact(ContactFields {
                pp_contact_id: external_id,
                name: record.name.clone(),
                email: None,
                phone: None,
                company: None,
                address: None,
                pp_data,
                last_sync_at,
            })),
            EntityKind::Matter => {
                let participants = parent_id.map(ParticipantLink::client).into_iter().collect();
                TransformedRecord::new(EntityFields::Exchange(ExchangeFields {
                    pp_matter_id: external_id,
                    name: record.name.clone(),
                    exchange_number: None,
                    status: ExchangeStatus::Pending,
                    client_id: parent_id,
                    start_date: None,
                    identification_deadline: None,
                    completion_deadline: None,
                    exchange_value: None,
                    practice_area: None,
                    notes: None,
                    pp_data,
                    last_sync_at,
                }))
                .with_participants(participants)
            }
            EntityKind::Task => TransformedRecord::new(EntityFields::Task(TaskFields {
                pp_task_id: external_id,
                title: record.name.clone(),
                description: None,
                status: TaskStatus::Pending,
                priority: TaskPriority::Medium,
                due_date: None,
                completed_at: None,
                exchange_id: parent_id,
                assigned_to: None,
                pp_data,
                last_sync_at,
            })),
        };
        Ok(transformed)
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport {
            healthy: true,
            latency_ms: 0,
            status_code: Some(200),
            rate_limit: None,
            error: None,
        }
    }
}
