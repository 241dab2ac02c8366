use casesync_api::{
    ContactFields, EntityFields, ExchangeFields, ExchangeStatus, TaskFields, TaskPriority,
    TaskStatus,
};
use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::core::{SyncOrchestrator, SyncSettings, SyncSource};
use crate::storage::{SqliteBackend, SqliteEntityStore, SqliteSyncRunStore};

pub fn contact_fields(external_id: &str, name: &str) -> EntityFields {
    EntityFields::Contact(ContactFields {
        pp_contact_id: external_id.to_string(),
        name: name.to_string(),
        email: Some(format!("{}@example.com", external_id.to_lowercase())),
        phone: None,
        company: None,
        address: None,
        pp_data: json!({ "id": external_id, "display_name": name }),
        last_sync_at: Utc::now(),
    })
}

pub fn exchange_fields(external_id: &str, name: &str, client_id: Option<i64>) -> EntityFields {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1);
    EntityFields::Exchange(ExchangeFields {
        pp_matter_id: external_id.to_string(),
        name: name.to_string(),
        exchange_number: Some(format!("EX-{}", external_id)),
        status: ExchangeStatus::IdentificationPeriod,
        client_id,
        start_date: start,
        identification_deadline: NaiveDate::from_ymd_opt(2024, 2, 15),
        completion_deadline: NaiveDate::from_ymd_opt(2024, 6, 29),
        exchange_value: Some(1_250_000.0),
        practice_area: Some("1031 Exchange".to_string()),
        notes: None,
        pp_data: json!({ "id": external_id, "name": name }),
        last_sync_at: Utc::now(),
    })
}

pub fn task_fields(external_id: &str, title: &str, exchange_id: Option<i64>) -> EntityFields {
    EntityFields::Task(TaskFields {
        pp_task_id: external_id.to_string(),
        title: title.to_string(),
        description: None,
        status: TaskStatus::InProgress,
        priority: TaskPriority::High,
        due_date: NaiveDate::from_ymd_opt(2024, 2, 1),
        completed_at: None,
        exchange_id,
        assigned_to: None,
        pp_data: json!({ "id": external_id, "subject": title }),
        last_sync_at: Utc::now(),
    })
}

/// In-memory engine around a given source
pub struct TestEngine<S: SyncSource> {
    pub store: Arc<SqliteEntityStore>,
    pub runs: Arc<SqliteSyncRunStore>,
    pub orchestrator: SyncOrchestrator<S>,
}

impl<S: SyncSource> TestEngine<S> {
    pub async fn new(source: Arc<S>) -> crate::storage::Result<Self> {
        Self::with_settings(source, SyncSettings::default()).await
    }

    pub async fn with_settings(
        source: Arc<S>,
        settings: SyncSettings,
    ) -> crate::storage::Result<Self> {
        let backend = SqliteBackend::open_in_memory().await?;
        let store = Arc::new(SqliteEntityStore::new(backend.clone()));
        let runs = Arc::new(SqliteSyncRunStore::new(backend));
        let orchestrator =
            SyncOrchestrator::new(source, store.clone(), runs.clone()).with_settings(settings);
        Ok(Self {
            store,
            runs,
            orchestrator,
        })
    }
}
