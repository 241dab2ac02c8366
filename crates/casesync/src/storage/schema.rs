//! Table definitions for the local store
//!
//! Every statement is idempotent so the schema can be applied on each open.

pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE COLLATE NOCASE,
        name TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pp_contact_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        company TEXT,
        address TEXT,
        pp_data TEXT NOT NULL DEFAULT '{}',
        last_sync_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exchanges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pp_matter_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        exchange_number TEXT,
        status TEXT NOT NULL,
        client_id INTEGER REFERENCES contacts(id),
        start_date TEXT,
        identification_deadline TEXT,
        completion_deadline TEXT,
        exchange_value REAL,
        practice_area TEXT,
        notes TEXT,
        pp_data TEXT NOT NULL DEFAULT '{}',
        last_sync_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pp_task_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        due_date TEXT,
        completed_at TEXT,
        exchange_id INTEGER REFERENCES exchanges(id),
        assigned_to INTEGER REFERENCES users(id),
        pp_data TEXT NOT NULL DEFAULT '{}',
        last_sync_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exchange_participants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        exchange_id INTEGER NOT NULL REFERENCES exchanges(id),
        participant_key TEXT NOT NULL,
        contact_id INTEGER REFERENCES contacts(id),
        user_id INTEGER REFERENCES users(id),
        role TEXT NOT NULL,
        permissions TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (exchange_id, participant_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_runs (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        records_processed INTEGER NOT NULL DEFAULT 0,
        records_created INTEGER NOT NULL DEFAULT 0,
        records_updated INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        details TEXT NOT NULL DEFAULT '{}',
        triggered_by TEXT,
        heartbeat_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_started_at ON sync_runs(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_status ON sync_runs(status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_exchange_id ON tasks(exchange_id)",
];
