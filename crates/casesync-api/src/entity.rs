use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three remote collections the engine reconciles, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Matter,
    Task,
}

impl EntityKind {
    /// Sync order: matters reference contacts, tasks reference matters.
    pub const SYNC_ORDER: [EntityKind; 3] =
        [EntityKind::Contact, EntityKind::Matter, EntityKind::Task];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Matter => "matter",
            EntityKind::Task => "task",
        }
    }

    /// Remote collection path segment
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contacts",
            EntityKind::Matter => "matters",
            EntityKind::Task => "tasks",
        }
    }

    /// Local table holding rows of this kind
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contacts",
            EntityKind::Matter => "exchanges",
            EntityKind::Task => "tasks",
        }
    }

    /// Unique column anchoring idempotent upsert
    pub fn external_id_column(&self) -> &'static str {
        match self {
            EntityKind::Contact => "pp_contact_id",
            EntityKind::Matter => "pp_matter_id",
            EntityKind::Task => "pp_task_id",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local lifecycle of an exchange (the local name for a remote matter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "45D")]
    IdentificationPeriod,
    #[serde(rename = "180D")]
    ExchangePeriod,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "TERMINATED")]
    Terminated,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "PENDING",
            ExchangeStatus::IdentificationPeriod => "45D",
            ExchangeStatus::ExchangePeriod => "180D",
            ExchangeStatus::Completed => "COMPLETED",
            ExchangeStatus::Terminated => "TERMINATED",
        }
    }
}

impl FromStr for ExchangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExchangeStatus::Pending),
            "45D" => Ok(ExchangeStatus::IdentificationPeriod),
            "180D" => Ok(ExchangeStatus::ExchangePeriod),
            "COMPLETED" => Ok(ExchangeStatus::Completed),
            "TERMINATED" => Ok(ExchangeStatus::Terminated),
            other => Err(format!("unknown exchange status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    OnHold,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::OnHold => "ON_HOLD",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            "ON_HOLD" => Ok(TaskStatus::OnHold),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "HIGH" => Ok(TaskPriority::High),
            "URGENT" => Ok(TaskPriority::Urgent),
            other => Err(format!("unknown task priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactFields {
    pub pp_contact_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    /// Address parts joined with ", "
    pub address: Option<String>,
    /// Full remote payload, kept for audit/debugging
    pub pp_data: serde_json::Value,
    pub last_sync_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFields {
    pub pp_matter_id: String,
    pub name: String,
    pub exchange_number: Option<String>,
    pub status: ExchangeStatus,
    /// Local contact id, None until the client contact has been synced
    pub client_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub identification_deadline: Option<NaiveDate>,
    pub completion_deadline: Option<NaiveDate>,
    pub exchange_value: Option<f64>,
    pub practice_area: Option<String>,
    pub notes: Option<String>,
    pub pp_data: serde_json::Value,
    pub last_sync_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFields {
    pub pp_task_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exchange_id: Option<i64>,
    /// Local user id
    pub assigned_to: Option<i64>,
    pub pp_data: serde_json::Value,
    pub last_sync_at: DateTime<Utc>,
}

/// Field set of one local row, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityFields {
    Contact(ContactFields),
    Exchange(ExchangeFields),
    Task(TaskFields),
}

impl EntityFields {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityFields::Contact(_) => EntityKind::Contact,
            EntityFields::Exchange(_) => EntityKind::Matter,
            EntityFields::Task(_) => EntityKind::Task,
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            EntityFields::Contact(c) => &c.pp_contact_id,
            EntityFields::Exchange(e) => &e.pp_matter_id,
            EntityFields::Task(t) => &t.pp_task_id,
        }
    }

    pub fn last_sync_at(&self) -> DateTime<Utc> {
        match self {
            EntityFields::Contact(c) => c.last_sync_at,
            EntityFields::Exchange(e) => e.last_sync_at,
            EntityFields::Task(t) => t.last_sync_at,
        }
    }

    /// Equality ignoring `last_sync_at`, which changes on every encounter.
    pub fn same_content(&self, other: &EntityFields) -> bool {
        let mut normalized = other.clone();
        let stamp = self.last_sync_at();
        match &mut normalized {
            EntityFields::Contact(c) => c.last_sync_at = stamp,
            EntityFields::Exchange(e) => e.last_sync_at = stamp,
            EntityFields::Task(t) => t.last_sync_at = stamp,
        }
        *self == normalized
    }
}

/// A persisted row: local primary id plus its mapped fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    pub id: i64,
    pub fields: EntityFields,
}

impl LocalEntity {
    pub fn kind(&self) -> EntityKind {
        self.fields.kind()
    }

    pub fn external_id(&self) -> &str {
        self.fields.external_id()
    }
}

/// Application user; managed outside the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Client,
    Coordinator,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Client => "client",
            ParticipantRole::Coordinator => "coordinator",
        }
    }

    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            ParticipantRole::Client => &["view", "upload", "message"],
            ParticipantRole::Coordinator => &["view", "edit", "upload", "message", "manage"],
        }
    }
}

/// Participant to attach to an exchange after it is upserted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantLink {
    Contact { contact_id: i64, role: ParticipantRole },
    User { user_id: i64, role: ParticipantRole },
}

impl ParticipantLink {
    pub fn client(contact_id: i64) -> Self {
        ParticipantLink::Contact {
            contact_id,
            role: ParticipantRole::Client,
        }
    }

    pub fn coordinator(user_id: i64) -> Self {
        ParticipantLink::User {
            user_id,
            role: ParticipantRole::Coordinator,
        }
    }

    pub fn role(&self) -> ParticipantRole {
        match self {
            ParticipantLink::Contact { role, .. } | ParticipantLink::User { role, .. } => *role,
        }
    }

    /// Stable identity of the participant within one exchange
    pub fn participant_key(&self) -> String {
        match self {
            ParticipantLink::Contact { contact_id, .. } => format!("contact:{}", contact_id),
            ParticipantLink::User { user_id, .. } => format!("user:{}", user_id),
        }
    }
}

/// Output of an entity transformer
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRecord {
    pub fields: EntityFields,
    pub participants: Vec<ParticipantLink>,
}

impl TransformedRecord {
    pub fn new(fields: EntityFields) -> Self {
        Self {
            fields,
            participants: Vec::new(),
        }
    }

    pub fn with_participants(mut self, participants: Vec<ParticipantLink>) -> Self {
        self.participants = participants;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_status_round_trips_through_db_text() {
        for status in [
            ExchangeStatus::Pending,
            ExchangeStatus::IdentificationPeriod,
            ExchangeStatus::ExchangePeriod,
            ExchangeStatus::Completed,
            ExchangeStatus::Terminated,
        ] {
            assert_eq!(status.as_str().parse::<ExchangeStatus>().unwrap(), status);
        }
        assert_eq!(ExchangeStatus::IdentificationPeriod.as_str(), "45D");
    }

    #[test]
    fn test_same_content_ignores_sync_timestamp() {
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let contact = ContactFields {
            pp_contact_id: "C1".to_string(),
            name: "Ada".to_string(),
            email: None,
            phone: None,
            company: None,
            address: None,
            pp_data: serde_json::json!({"id": "C1"}),
            last_sync_at: earlier,
        };
        let mut later = contact.clone();
        later.last_sync_at = Utc::now();

        let a = EntityFields::Contact(contact);
        let b = EntityFields::Contact(later.clone());
        assert!(a.same_content(&b));

        later.name = "Ada Lovelace".to_string();
        assert!(!a.same_content(&EntityFields::Contact(later)));
    }

    #[test]
    fn test_participant_key_distinguishes_contacts_from_users() {
        assert_eq!(ParticipantLink::client(7).participant_key(), "contact:7");
        assert_eq!(ParticipantLink::coordinator(7).participant_key(), "user:7");
        assert_eq!(
            ParticipantRole::Coordinator.permissions(),
            &["view", "edit", "upload", "message", "manage"]
        );
    }
}
