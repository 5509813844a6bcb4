// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Schema Migrations
//!
//! The chat database carries its schema version in `schema_version`.
//! Opening a store applies every newer step inside a single transaction,
//! so a failing step leaves the database at its previous version.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::StorageError;

/// One versioned schema step.
pub struct Migration {
    /// Versions start at 1 and strictly increase.
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Brings a connection up to the latest schema.
pub struct MigrationRunner;

impl MigrationRunner {
    pub fn run(conn: &Connection, migrations: &[Migration]) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        let from = Self::current_version(conn)?;
        let mut last = from;
        let mut steps = Vec::new();
        for step in migrations.iter().filter(|m| m.version > from) {
            if step.version <= last && !steps.is_empty() {
                return Err(StorageError::Migration(format!(
                    "schema step v{} listed after v{}",
                    step.version, last
                )));
            }
            last = step.version;
            steps.push(step);
        }
        if steps.is_empty() {
            return Ok(());
        }

        // Dropping the transaction without commit rolls every step back.
        let tx = conn.unchecked_transaction()?;
        for step in &steps {
            tx.execute_batch(step.sql).map_err(|e| {
                StorageError::Migration(format!("schema step v{} ({}): {}", step.version, step.name, e))
            })?;
            tx.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![step.version, chrono::Utc::now().timestamp()],
            )?;
            debug!(version = step.version, name = step.name, "Schema step applied");
        }
        tx.commit()?;

        info!(from, to = last, "Chat database migrated");
        Ok(())
    }

    /// Latest applied version, 0 for an empty database.
    pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
        let tracked = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
                [],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !tracked {
            return Ok(0);
        }

        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }
}

/// All migrations in version order. New migrations are appended.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "baseline_schema",
            sql: MIGRATION_V1_BASELINE,
        },
        Migration {
            version: 2,
            name: "lookup_indexes",
            sql: MIGRATION_V2_INDEXES,
        },
        Migration {
            version: 3,
            name: "transmission_send_state",
            sql: MIGRATION_V3_SEND_STATE,
        },
    ]
}

const MIGRATION_V1_BASELINE: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    group_id TEXT,
    subject TEXT
);

CREATE TABLE IF NOT EXISTS chat_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    contact_jid TEXT NOT NULL,
    role TEXT NOT NULL,
    contact TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    xmpp_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    server_date INTEGER,
    status TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    content TEXT NOT NULL,
    encryption TEXT NOT NULL,
    signing TEXT NOT NULL,
    coder_errors INTEGER NOT NULL DEFAULT 0,
    server_error TEXT
);

CREATE TABLE IF NOT EXISTS transmissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL,
    contact_jid TEXT NOT NULL,
    address TEXT NOT NULL,
    received_at INTEGER
);
";

const MIGRATION_V2_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_chat_members_chat ON chat_members(chat_id);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
CREATE INDEX IF NOT EXISTS idx_messages_xmpp_id ON messages(xmpp_id);
CREATE INDEX IF NOT EXISTS idx_transmissions_message ON transmissions(message_id);
";

const MIGRATION_V3_SEND_STATE: &str = "
ALTER TABLE transmissions ADD COLUMN sent INTEGER NOT NULL DEFAULT 0;
";
