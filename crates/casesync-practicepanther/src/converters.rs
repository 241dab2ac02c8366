//! Remote record -> local field set conversion
//!
//! Pure mapping helpers plus the three per-kind transformers. References to
//! other entities (client contact, parent matter, assignee) are resolved
//! through the local store; an unresolved reference leaves the field empty.

use casesync::storage::{Criteria, EntityStore};
use casesync_api::{
    ContactFields, EntityFields, EntityKind, ExchangeFields, ExchangeStatus, ParticipantLink,
    Result, SyncError, TaskFields, TaskPriority, TaskStatus, TransformedRecord,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde_json::Value;

use crate::models::{RemoteAddress, RemoteContact, RemoteMatter, RemoteTask, RemoteUserRef};

pub const IDENTIFICATION_PERIOD_DAYS: u64 = 45;
pub const EXCHANGE_PERIOD_DAYS: u64 = 180;

const UNKNOWN_ID: &str = "<unknown>";

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}

fn required_id(kind: EntityKind, id: Option<&String>) -> Result<String> {
    non_empty(id).ok_or_else(|| SyncError::transform(kind, UNKNOWN_ID, "missing required field 'id'"))
}

pub fn map_matter_status(status: Option<&str>) -> ExchangeStatus {
    match status.map(normalize_key).as_deref() {
        Some("open") | Some("pending") => ExchangeStatus::Pending,
        Some("active") => ExchangeStatus::IdentificationPeriod,
        Some("in_progress") => ExchangeStatus::ExchangePeriod,
        Some("completed") | Some("closed") => ExchangeStatus::Completed,
        Some("terminated") | Some("cancelled") => ExchangeStatus::Terminated,
        _ => ExchangeStatus::Pending,
    }
}

pub fn map_task_status(status: Option<&str>) -> TaskStatus {
    match status.map(normalize_key).as_deref() {
        Some("in_progress") => TaskStatus::InProgress,
        Some("completed") => TaskStatus::Completed,
        Some("cancelled") => TaskStatus::Cancelled,
        Some("on_hold") => TaskStatus::OnHold,
        _ => TaskStatus::Pending,
    }
}

pub fn map_task_priority(priority: Option<&str>) -> TaskPriority {
    match priority.map(normalize_key).as_deref() {
        Some("low") => TaskPriority::Low,
        Some("high") => TaskPriority::High,
        Some("urgent") => TaskPriority::Urgent,
        _ => TaskPriority::Medium,
    }
}

/// Parse a money-like value: JSON numbers pass through, strings lose `$` and
/// `,` before parsing. Anything else is `None`.
pub fn parse_decimal(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .replace(['$', ','], "")
            .trim()
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// `YYYY-MM-DD` or an RFC 3339 timestamp (date part taken as given)
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

/// RFC 3339 timestamp, or a bare date taken as midnight UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

/// Identification and completion deadlines for an exchange starting on `start`
pub fn derive_deadlines(start: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
    (
        start.checked_add_days(Days::new(IDENTIFICATION_PERIOD_DAYS)),
        start.checked_add_days(Days::new(EXCHANGE_PERIOD_DAYS)),
    )
}

pub fn format_address(address: &RemoteAddress) -> Option<String> {
    let parts: Vec<String> = [
        &address.street_1,
        &address.street_2,
        &address.city,
        &address.state,
        &address.zip,
        &address.country,
    ]
    .into_iter()
    .filter_map(|part| non_empty(part.as_ref()))
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn contact_name(contact: &RemoteContact) -> Option<String> {
    non_empty(contact.display_name.as_ref()).or_else(|| {
        let parts: Vec<String> = [&contact.first_name, &contact.last_name]
            .into_iter()
            .filter_map(|part| non_empty(part.as_ref()))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    })
}

pub fn transform_contact(contact: &RemoteContact, now: DateTime<Utc>) -> Result<TransformedRecord> {
    let external_id = required_id(EntityKind::Contact, contact.id.as_ref())?;
    let name = contact_name(contact).ok_or_else(|| {
        SyncError::transform(EntityKind::Contact, &external_id, "missing required field 'name'")
    })?;

    let phone = [&contact.phone, &contact.phone_mobile, &contact.phone_work]
        .into_iter()
        .find_map(|p| non_empty(p.as_ref()));

    Ok(TransformedRecord::new(EntityFields::Contact(ContactFields {
        pp_contact_id: external_id,
        name,
        email: non_empty(contact.email.as_ref()),
        phone,
        company: non_empty(contact.company_name.as_ref()),
        address: contact.address.as_ref().and_then(format_address),
        pp_data: contact.raw.clone(),
        last_sync_at: now,
    })))
}

async fn resolve_local_id(
    store: &dyn EntityStore,
    kind: EntityKind,
    external_id: Option<&String>,
) -> Result<Option<i64>> {
    let Some(external_id) = non_empty(external_id) else {
        return Ok(None);
    };
    let entity = store
        .find_one(kind, Criteria::ExternalId(&external_id))
        .await?;
    Ok(entity.map(|e| e.id))
}

async fn resolve_user(store: &dyn EntityStore, user: &RemoteUserRef) -> Result<Option<i64>> {
    let Some(email) = non_empty(user.email.as_ref()) else {
        return Ok(None);
    };
    Ok(store.find_user_by_email(&email).await?.map(|u| u.id))
}

pub async fn transform_matter(
    matter: &RemoteMatter,
    store: &dyn EntityStore,
    now: DateTime<Utc>,
) -> Result<TransformedRecord> {
    let external_id = required_id(EntityKind::Matter, matter.id.as_ref())?;
    let name = non_empty(matter.name.as_ref()).ok_or_else(|| {
        SyncError::transform(EntityKind::Matter, &external_id, "missing required field 'name'")
    })?;

    let client_id = resolve_local_id(
        store,
        EntityKind::Contact,
        matter.client.as_ref().and_then(|c| c.id.as_ref()),
    )
    .await?;

    let start_date = [&matter.opened_at, &matter.open_date, &matter.start_date]
        .into_iter()
        .filter_map(|d| d.as_deref())
        .find_map(parse_date);
    let (identification_deadline, completion_deadline) = match start_date {
        Some(start) => derive_deadlines(start),
        None => (None, None),
    };

    let mut participants = Vec::new();
    if let Some(client_id) = client_id {
        participants.push(ParticipantLink::client(client_id));
    }
    for user in &matter.assigned_to_users {
        if let Some(user_id) = resolve_user(store, user).await? {
            let link = ParticipantLink::coordinator(user_id);
            if !participants.contains(&link) {
                participants.push(link);
            }
        }
    }

    let fields = EntityFields::Exchange(ExchangeFields {
        pp_matter_id: external_id,
        name,
        exchange_number: non_empty(matter.number.as_ref()),
        status: map_matter_status(matter.status.as_deref()),
        client_id,
        start_date,
        identification_deadline,
        completion_deadline,
        exchange_value: matter.value.as_ref().and_then(parse_decimal),
        practice_area: non_empty(matter.practice_area.as_ref()),
        notes: non_empty(matter.notes.as_ref()),
        pp_data: matter.raw.clone(),
        last_sync_at: now,
    });

    Ok(TransformedRecord::new(fields).with_participants(participants))
}

pub async fn transform_task(
    task: &RemoteTask,
    store: &dyn EntityStore,
    now: DateTime<Utc>,
) -> Result<TransformedRecord> {
    let external_id = required_id(EntityKind::Task, task.id.as_ref())?;
    let title = non_empty(task.subject.as_ref()).ok_or_else(|| {
        SyncError::transform(EntityKind::Task, &external_id, "missing required field 'subject'")
    })?;

    let exchange_id = resolve_local_id(
        store,
        EntityKind::Matter,
        task.matter.as_ref().and_then(|m| m.id.as_ref()),
    )
    .await?;

    let mut assigned_to = None;
    for user in task.assigned_to.iter().chain(task.assigned_to_users.iter()) {
        if let Some(user_id) = resolve_user(store, user).await? {
            assigned_to = Some(user_id);
            break;
        }
    }

    Ok(TransformedRecord::new(EntityFields::Task(TaskFields {
        pp_task_id: external_id,
        title,
        description: non_empty(task.description.as_ref()),
        status: map_task_status(task.status.as_deref()),
        priority: map_task_priority(task.priority.as_deref()),
        due_date: task.due_date.as_deref().and_then(parse_date),
        completed_at: task.completed_at.as_deref().and_then(parse_timestamp),
        exchange_id,
        assigned_to,
        pp_data: task.raw.clone(),
        last_sync_at: now,
    })))
}
