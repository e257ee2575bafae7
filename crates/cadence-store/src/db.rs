//! Database handle, schema migrations, and shared row-mapping helpers.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cadence_core::error::{CadenceError, Result};
use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::Connection;

/// The follow-up engine's persistent store.
pub struct FollowupStore {
    conn: Mutex<Connection>,
}

impl FollowupStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CadenceError::Store(format!("DB open: {e}")))?;

        // WAL mode for concurrent dashboard reads alongside the engine loop
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CadenceError::Store(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Campaign definitions (config store)
            CREATE TABLE IF NOT EXISTS followup_configs (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                auto_message INTEGER NOT NULL DEFAULT 0,
                business_start TEXT NOT NULL DEFAULT '08:00:00',
                business_end TEXT NOT NULL DEFAULT '20:00:00',
                loop_from INTEGER,
                loop_to INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Ordered message steps (step catalog)
            CREATE TABLE IF NOT EXISTS followup_steps (
                id TEXT PRIMARY KEY,
                config_id TEXT NOT NULL,
                step_order INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                delay_value INTEGER NOT NULL DEFAULT 0,
                delay_unit TEXT NOT NULL DEFAULT 'minutes',
                message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                UNIQUE (config_id, step_order),
                FOREIGN KEY (config_id) REFERENCES followup_configs(id)
            );

            -- One row per (conversation, step) delivery attempt. Never deleted.
            CREATE TABLE IF NOT EXISTS followup_executions (
                id TEXT PRIMARY KEY,
                config_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                scheduled_at TEXT NOT NULL,
                sent_at TEXT,
                is_infinite_loop INTEGER NOT NULL DEFAULT 0,
                loop_iteration INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL
            );

            -- At most one pending execution per (conversation, step)
            CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_one_scheduled
                ON followup_executions (conversation_id, step_id)
                WHERE status = 'scheduled';

            CREATE INDEX IF NOT EXISTS idx_executions_due
                ON followup_executions (status, scheduled_at);

            CREATE INDEX IF NOT EXISTS idx_executions_conversation
                ON followup_executions (conversation_id, created_at);

            -- Append-only engagement history
            CREATE TABLE IF NOT EXISTS followup_history (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_conversation
                ON followup_history (conversation_id, created_at);

            -- Conversation directory: pause flag + inbound timestamps
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                is_paused INTEGER NOT NULL DEFAULT 0,
                last_inbound_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| CadenceError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CadenceError::Store(format!("Lock: {e}")))
    }
}

pub(crate) fn store_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Store(e.to_string())
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

pub(crate) fn parse_time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .unwrap_or_else(|_| NaiveTime::from_hms_opt(0, 0, 0).unwrap())
}

pub(crate) fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}
