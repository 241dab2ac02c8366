//! Local persistence for synced entities
//!
//! `EntityStore` is the opaque capability the sync engine writes through:
//! find-or-create keyed on the external-id column, update, find-one and count.
//! `SqliteEntityStore` implements it on top of `SqliteBackend`.

use async_trait::async_trait;
use casesync_api::{
    ContactFields, EntityFields, EntityKind, ExchangeFields, LocalEntity, LocalUser,
    ParticipantLink, ParticipantRole, TaskFields,
};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, trace};

use crate::storage::backend::SqliteBackend;
use crate::storage::types::{
    Result, StorageError, decode_optional_date, decode_optional_timestamp, decode_timestamp,
    encode_date, encode_timestamp,
};

/// Lookup key for `EntityStore::find_one`
#[derive(Debug, Clone, Copy)]
pub enum Criteria<'a> {
    Id(i64),
    ExternalId(&'a str),
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a row for `fields.external_id()` unless one exists.
    ///
    /// Returns the stored row and whether it was created by this call.
    /// An existing row is returned unchanged.
    async fn find_or_create(&self, fields: &EntityFields) -> Result<(LocalEntity, bool)>;

    /// Overwrite all mapped fields of `entity`. Returns whether any content
    /// (other than the sync timestamp) differed.
    async fn update(&self, entity: &LocalEntity, fields: &EntityFields) -> Result<bool>;

    async fn find_one(&self, kind: EntityKind, criteria: Criteria<'_>)
    -> Result<Option<LocalEntity>>;

    async fn count(&self, kind: EntityKind) -> Result<i64>;

    /// Case-insensitive email match
    async fn find_user_by_email(&self, email: &str) -> Result<Option<LocalUser>>;

    /// Find-or-create a participant link. Returns true if it was created.
    async fn link_participant(&self, exchange_id: i64, link: &ParticipantLink) -> Result<bool>;
}

/// SQLite-backed entity store
#[derive(Clone)]
pub struct SqliteEntityStore {
    backend: SqliteBackend,
}

impl SqliteEntityStore {
    pub fn new(backend: SqliteBackend) -> Self {
        Self { backend }
    }

    /// Insert or rename a local user. Users are owned by the host application;
    /// this exists for seeding and tests.
    pub async fn upsert_user(&self, email: &str, name: Option<&str>) -> Result<LocalUser> {
        sqlx::query(
            "INSERT INTO users (email, name) VALUES (?, ?)
             ON CONFLICT(email) DO UPDATE SET name = excluded.name",
        )
        .bind(email)
        .bind(name)
        .execute(self.backend.pool())
        .await?;

        self.find_user_by_email(email)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "users".to_string(),
                id: email.to_string(),
            })
    }

    /// Participants currently linked to an exchange
    pub async fn participants(&self, exchange_id: i64) -> Result<Vec<ParticipantLink>> {
        let rows = sqlx::query(
            "SELECT contact_id, user_id, role FROM exchange_participants
             WHERE exchange_id = ? ORDER BY id",
        )
        .bind(exchange_id)
        .fetch_all(self.backend.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let role = match row.try_get::<String, _>("role")?.as_str() {
                    "client" => ParticipantRole::Client,
                    "coordinator" => ParticipantRole::Coordinator,
                    other => {
                        return Err(StorageError::SerializationError(format!(
                            "unknown participant role '{}'",
                            other
                        )));
                    }
                };
                let contact_id: Option<i64> = row.try_get("contact_id")?;
                let user_id: Option<i64> = row.try_get("user_id")?;
                match (contact_id, user_id) {
                    (Some(contact_id), _) => Ok(ParticipantLink::Contact { contact_id, role }),
                    (None, Some(user_id)) => Ok(ParticipantLink::User { user_id, role }),
                    (None, None) => Err(StorageError::InvalidState(format!(
                        "participant of exchange {} has neither contact nor user",
                        exchange_id
                    ))),
                }
            })
            .collect()
    }

    async fn insert_if_absent(&self, fields: &EntityFields) -> Result<bool> {
        let now = encode_timestamp(&Utc::now());
        let pool = self.backend.pool();

        let result = match fields {
            EntityFields::Contact(c) => {
                sqlx::query(
                    "INSERT INTO contacts (pp_contact_id, name, email, phone, company, address,
                         pp_data, last_sync_at, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(pp_contact_id) DO NOTHING",
                )
                .bind(&c.pp_contact_id)
                .bind(&c.name)
                .bind(c.email.as_deref())
                .bind(c.phone.as_deref())
                .bind(c.company.as_deref())
                .bind(c.address.as_deref())
                .bind(serde_json::to_string(&c.pp_data)?)
                .bind(encode_timestamp(&c.last_sync_at))
                .bind(&now)
                .bind(&now)
                .execute(pool)
                .await?
            }
            EntityFields::Exchange(e) => {
                sqlx::query(
                    "INSERT INTO exchanges (pp_matter_id, name, exchange_number, status, client_id,
                         start_date, identification_deadline, completion_deadline, exchange_value,
                         practice_area, notes, pp_data, last_sync_at, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(pp_matter_id) DO NOTHING",
                )
                .bind(&e.pp_matter_id)
                .bind(&e.name)
                .bind(e.exchange_number.as_deref())
                .bind(e.status.as_str())
                .bind(e.client_id)
                .bind(e.start_date.as_ref().map(encode_date))
                .bind(e.identification_deadline.as_ref().map(encode_date))
                .bind(e.completion_deadline.as_ref().map(encode_date))
                .bind(e.exchange_value)
                .bind(e.practice_area.as_deref())
                .bind(e.notes.as_deref())
                .bind(serde_json::to_string(&e.pp_data)?)
                .bind(encode_timestamp(&e.last_sync_at))
                .bind(&now)
                .bind(&now)
                .execute(pool)
                .await?
            }
            EntityFields::Task(t) => {
                sqlx::query(
                    "INSERT INTO tasks (pp_task_id, title, description, status, priority, due_date,
                         completed_at, exchange_id, assigned_to, pp_data, last_sync_at,
                         created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(pp_task_id) DO NOTHING",
                )
                .bind(&t.pp_task_id)
                .bind(&t.title)
                .bind(t.description.as_deref())
                .bind(t.status.as_str())
                .bind(t.priority.as_str())
                .bind(t.due_date.as_ref().map(encode_date))
                .bind(t.completed_at.as_ref().map(encode_timestamp))
                .bind(t.exchange_id)
                .bind(t.assigned_to)
                .bind(serde_json::to_string(&t.pp_data)?)
                .bind(encode_timestamp(&t.last_sync_at))
                .bind(&now)
                .bind(&now)
                .execute(pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn write_fields(&self, id: i64, fields: &EntityFields) -> Result<()> {
        let now = encode_timestamp(&Utc::now());
        let pool = self.backend.pool();

        let result = match fields {
            EntityFields::Contact(c) => {
                sqlx::query(
                    "UPDATE contacts SET name = ?, email = ?, phone = ?, company = ?, address = ?,
                         pp_data = ?, last_sync_at = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&c.name)
                .bind(c.email.as_deref())
                .bind(c.phone.as_deref())
                .bind(c.company.as_deref())
                .bind(c.address.as_deref())
                .bind(serde_json::to_string(&c.pp_data)?)
                .bind(encode_timestamp(&c.last_sync_at))
                .bind(&now)
                .bind(id)
                .execute(pool)
                .await?
            }
            EntityFields::Exchange(e) => {
                sqlx::query(
                    "UPDATE exchanges SET name = ?, exchange_number = ?, status = ?, client_id = ?,
                         start_date = ?, identification_deadline = ?, completion_deadline = ?,
                         exchange_value = ?, practice_area = ?, notes = ?, pp_data = ?,
                         last_sync_at = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&e.name)
                .bind(e.exchange_number.as_deref())
                .bind(e.status.as_str())
                .bind(e.client_id)
                .bind(e.start_date.as_ref().map(encode_date))
                .bind(e.identification_deadline.as_ref().map(encode_date))
                .bind(e.completion_deadline.as_ref().map(encode_date))
                .bind(e.exchange_value)
                .bind(e.practice_area.as_deref())
                .bind(e.notes.as_deref())
                .bind(serde_json::to_string(&e.pp_data)?)
                .bind(encode_timestamp(&e.last_sync_at))
                .bind(&now)
                .bind(id)
                .execute(pool)
                .await?
            }
            EntityFields::Task(t) => {
                sqlx::query(
                    "UPDATE tasks SET title = ?, description = ?, status = ?, priority = ?,
                         due_date = ?, completed_at = ?, exchange_id = ?, assigned_to = ?,
                         pp_data = ?, last_sync_at = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&t.title)
                .bind(t.description.as_deref())
                .bind(t.status.as_str())
                .bind(t.priority.as_str())
                .bind(t.due_date.as_ref().map(encode_date))
                .bind(t.completed_at.as_ref().map(encode_timestamp))
                .bind(t.exchange_id)
                .bind(t.assigned_to)
                .bind(serde_json::to_string(&t.pp_data)?)
                .bind(encode_timestamp(&t.last_sync_at))
                .bind(&now)
                .bind(id)
                .execute(pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: fields.kind().table().to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn find_or_create(&self, fields: &EntityFields) -> Result<(LocalEntity, bool)> {
        let kind = fields.kind();
        let external_id = fields.external_id();
        if external_id.is_empty() {
            return Err(StorageError::InvalidState(format!(
                "{} has an empty {}",
                kind,
                kind.external_id_column()
            )));
        }

        let created = self.insert_if_absent(fields).await?;
        let entity = self
            .find_one(kind, Criteria::ExternalId(external_id))
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: kind.table().to_string(),
                id: external_id.to_string(),
            })?;

        trace!(
            "[SqliteEntityStore] find_or_create {} {} -> id={} created={}",
            kind, external_id, entity.id, created
        );
        Ok((entity, created))
    }

    async fn update(&self, entity: &LocalEntity, fields: &EntityFields) -> Result<bool> {
        if entity.kind() != fields.kind() || entity.external_id() != fields.external_id() {
            return Err(StorageError::InvalidState(format!(
                "cannot update {} {} with fields of {} {}",
                entity.kind(),
                entity.external_id(),
                fields.kind(),
                fields.external_id()
            )));
        }

        let changed = !entity.fields.same_content(fields);
        self.write_fields(entity.id, fields).await?;

        if changed {
            debug!(
                "[SqliteEntityStore] Updated {} {} (id={})",
                entity.kind(),
                entity.external_id(),
                entity.id
            );
        }
        Ok(changed)
    }

    async fn find_one(
        &self,
        kind: EntityKind,
        criteria: Criteria<'_>,
    ) -> Result<Option<LocalEntity>> {
        let row = match criteria {
            Criteria::Id(id) => {
                let sql = format!("SELECT * FROM {} WHERE id = ?", kind.table());
                sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.backend.pool())
                    .await?
            }
            Criteria::ExternalId(external_id) => {
                let sql = format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    kind.table(),
                    kind.external_id_column()
                );
                sqlx::query(&sql)
                    .bind(external_id)
                    .fetch_optional(self.backend.pool())
                    .await?
            }
        };

        row.map(|row| decode_entity(kind, &row)).transpose()
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS count FROM {}", kind.table());
        let row = sqlx::query(&sql).fetch_one(self.backend.pool()).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<LocalUser>> {
        let row = sqlx::query("SELECT id, email, name FROM users WHERE email = ?")
            .bind(email.trim())
            .fetch_optional(self.backend.pool())
            .await?;

        row.map(|row| {
            Ok(LocalUser {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn link_participant(&self, exchange_id: i64, link: &ParticipantLink) -> Result<bool> {
        let (contact_id, user_id) = match link {
            ParticipantLink::Contact { contact_id, .. } => (Some(*contact_id), None),
            ParticipantLink::User { user_id, .. } => (None, Some(*user_id)),
        };
        let role = link.role();
        let permissions = serde_json::to_string(role.permissions())?;

        let result = sqlx::query(
            "INSERT INTO exchange_participants
                 (exchange_id, participant_key, contact_id, user_id, role, permissions, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(exchange_id, participant_key) DO NOTHING",
        )
        .bind(exchange_id)
        .bind(link.participant_key())
        .bind(contact_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(permissions)
        .bind(encode_timestamp(&Utc::now()))
        .execute(self.backend.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn decode_entity(kind: EntityKind, row: &SqliteRow) -> Result<LocalEntity> {
    let id: i64 = row.try_get("id")?;
    let pp_data: serde_json::Value = serde_json::from_str(&row.try_get::<String, _>("pp_data")?)?;
    let last_sync_at = decode_timestamp("last_sync_at", &row.try_get::<String, _>("last_sync_at")?)?;

    let fields = match kind {
        EntityKind::Contact => EntityFields::Contact(ContactFields {
            pp_contact_id: row.try_get("pp_contact_id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            company: row.try_get("company")?,
            address: row.try_get("address")?,
            pp_data,
            last_sync_at,
        }),
        EntityKind::Matter => EntityFields::Exchange(ExchangeFields {
            pp_matter_id: row.try_get("pp_matter_id")?,
            name: row.try_get("name")?,
            exchange_number: row.try_get("exchange_number")?,
            status: row
                .try_get::<String, _>("status")?
                .parse()
                .map_err(StorageError::SerializationError)?,
            client_id: row.try_get("client_id")?,
            start_date: decode_optional_date("start_date", row.try_get("start_date")?)?,
            identification_deadline: decode_optional_date(
                "identification_deadline",
                row.try_get("identification_deadline")?,
            )?,
            completion_deadline: decode_optional_date(
                "completion_deadline",
                row.try_get("completion_deadline")?,
            )?,
            exchange_value: row.try_get("exchange_value")?,
            practice_area: row.try_get("practice_area")?,
            notes: row.try_get("notes")?,
            pp_data,
            last_sync_at,
        }),
        EntityKind::Task => EntityFields::Task(TaskFields {
            pp_task_id: row.try_get("pp_task_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row
                .try_get::<String, _>("status")?
                .parse()
                .map_err(StorageError::SerializationError)?,
            priority: row
                .try_get::<String, _>("priority")?
                .parse()
                .map_err(StorageError::SerializationError)?,
            due_date: decode_optional_date("due_date", row.try_get("due_date")?)?,
            completed_at: decode_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
            exchange_id: row.try_get("exchange_id")?,
            assigned_to: row.try_get("assigned_to")?,
            pp_data,
            last_sync_at,
        }),
    };

    Ok(LocalEntity { id, fields })
}
