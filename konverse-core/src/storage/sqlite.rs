// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! SQLite-backed [`Persistence`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::migration::{all_migrations, MigrationRunner};
use super::{tables, Persistence, Row, StorageError, Value};

/// SQLite storage implementation.
///
/// Table and column names cannot be bound as SQL parameters, so tables are
/// checked against [`tables::ALL`] and columns must be plain identifiers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Creates an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        MigrationRunner::run(&conn, &all_migrations())?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        MigrationRunner::current_version(&*self.lock()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }
}

fn check_table(table: &str) -> Result<(), StorageError> {
    if tables::ALL.contains(&table) {
        Ok(())
    } else {
        Err(StorageError::UnknownTable(table.to_string()))
    }
}

fn check_column(column: &str) -> Result<(), StorageError> {
    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidColumn(column.to_string()))
    }
}

impl Persistence for SqliteStore {
    fn insert(&self, table: &str, fields: &[(&str, Value)]) -> Result<i64, StorageError> {
        check_table(table)?;
        for (column, _) in fields {
            check_column(column)?;
        }

        let columns: Vec<&str> = fields.iter().map(|(c, _)| *c).collect();
        let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );

        let conn = self.lock()?;
        conn.execute(&sql, params_from_iter(fields.iter().map(|(_, v)| v)))?;
        let id = conn.last_insert_rowid();
        debug!(table, id, "Inserted row");
        Ok(id)
    }

    fn update(&self, table: &str, fields: &[(&str, Value)], id: i64) -> Result<(), StorageError> {
        check_table(table)?;
        if fields.is_empty() {
            return Ok(());
        }
        for (column, _) in fields {
            check_column(column)?;
        }

        let assignments: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, (c, _))| format!("{} = ?{}", c, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table,
            assignments.join(", "),
            fields.len() + 1
        );

        let mut values: Vec<Value> = fields.iter().map(|(_, v)| v.clone()).collect();
        values.push(Value::Integer(id));

        let changed = self.lock()?.execute(&sql, params_from_iter(values.iter()))?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("{} #{}", table, id)));
        }
        Ok(())
    }

    fn delete(&self, table: &str, id: i64) -> Result<(), StorageError> {
        check_table(table)?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", table);
        let changed = self.lock()?.execute(&sql, [id])?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("{} #{}", table, id)));
        }
        Ok(())
    }

    fn select_where(&self, table: &str, column: &str, value: Value) -> Result<Vec<Row>, StorageError> {
        check_table(table)?;
        check_column(column)?;
        let sql = format!("SELECT * FROM {} WHERE {} = ?1 ORDER BY id", table, column);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

        let rows = stmt.query_map([value], |row| {
            let mut out = Row::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                out.insert(name.clone(), row.get::<_, Value>(i)?);
            }
            Ok(out)
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }
}
