//! Remote record shapes as returned by the PracticePanther API
//!
//! Only fields the engine maps are modelled. Everything else stays in the raw
//! payload kept on each record, which is stored verbatim as `pp_data`.

use casesync::core::RemoteEntity;
use casesync_api::EntityKind;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accepts ids sent either as JSON strings or numbers
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| id_from_value(&v)))
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRef {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteUserRef {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAddress {
    pub street_1: Option<String>,
    pub street_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteContact {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub phone_mobile: Option<String>,
    pub phone_work: Option<String>,
    pub company_name: Option<String>,
    pub address: Option<RemoteAddress>,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMatter {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub number: Option<String>,
    pub status: Option<String>,
    pub client: Option<RemoteRef>,
    pub opened_at: Option<String>,
    pub open_date: Option<String>,
    pub start_date: Option<String>,
    /// Numeric or currency-formatted string
    pub value: Option<Value>,
    pub practice_area: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub assigned_to_users: Vec<RemoteUserRef>,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub matter: Option<RemoteRef>,
    pub assigned_to: Option<RemoteUserRef>,
    #[serde(default)]
    pub assigned_to_users: Vec<RemoteUserRef>,
    #[serde(skip)]
    pub raw: Value,
}

/// One fetched remote record, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteRecord {
    Contact(RemoteContact),
    Matter(RemoteMatter),
    Task(RemoteTask),
    /// Payload that did not fit the known shape
    Malformed {
        kind: EntityKind,
        external_id: Option<String>,
        reason: String,
        raw: Value,
    },
}

impl RemoteRecord {
    /// Decode a raw payload of the given kind. Never fails; shape errors
    /// become `Malformed` so they are reported per record.
    pub fn decode(kind: EntityKind, raw: Value) -> Self {
        let decoded = match kind {
            EntityKind::Contact => serde_json::from_value::<RemoteContact>(raw.clone()).map(|mut c| {
                c.raw = raw.clone();
                RemoteRecord::Contact(c)
            }),
            EntityKind::Matter => serde_json::from_value::<RemoteMatter>(raw.clone()).map(|mut m| {
                m.raw = raw.clone();
                RemoteRecord::Matter(m)
            }),
            EntityKind::Task => serde_json::from_value::<RemoteTask>(raw.clone()).map(|mut t| {
                t.raw = raw.clone();
                RemoteRecord::Task(t)
            }),
        };

        decoded.unwrap_or_else(|e| RemoteRecord::Malformed {
            kind,
            external_id: raw.get("id").and_then(id_from_value),
            reason: format!("unexpected payload shape: {}", e),
            raw,
        })
    }

    pub fn raw(&self) -> &Value {
        match self {
            RemoteRecord::Contact(c) => &c.raw,
            RemoteRecord::Matter(m) => &m.raw,
            RemoteRecord::Task(t) => &t.raw,
            RemoteRecord::Malformed { raw, .. } => raw,
        }
    }
}

impl RemoteEntity for RemoteRecord {
    fn kind(&self) -> EntityKind {
        match self {
            RemoteRecord::Contact(_) => EntityKind::Contact,
            RemoteRecord::Matter(_) => EntityKind::Matter,
            RemoteRecord::Task(_) => EntityKind::Task,
            RemoteRecord::Malformed { kind, .. } => *kind,
        }
    }

    fn external_id(&self) -> Option<&str> {
        match self {
            RemoteRecord::Contact(c) => c.id.as_deref(),
            RemoteRecord::Matter(m) => m.id.as_deref(),
            RemoteRecord::Task(t) => t.id.as_deref(),
            RemoteRecord::Malformed { external_id, .. } => external_id.as_deref(),
        }
    }
}
