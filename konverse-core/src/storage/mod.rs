// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Storage Module
//!
//! The core writes every state change through the [`Persistence`] trait
//! (save-on-write, no batching). [`SqliteStore`] is the bundled
//! implementation; embedders may supply their own.

pub mod error;
pub mod migration;
pub mod sqlite;

use std::collections::HashMap;

pub use error::StorageError;
pub use rusqlite::types::Value;
pub use sqlite::SqliteStore;

/// Id of an entity that was never written (or whose insert failed).
pub const INVALID_ID: i64 = -1;

/// Table names.
pub mod tables {
    pub const CHATS: &str = "chats";
    pub const CHAT_MEMBERS: &str = "chat_members";
    pub const MESSAGES: &str = "messages";
    pub const TRANSMISSIONS: &str = "transmissions";

    pub const ALL: [&str; 4] = [CHATS, CHAT_MEMBERS, MESSAGES, TRANSMISSIONS];
}

/// A selected row keyed by column name.
pub type Row = HashMap<String, Value>;

/// Record store consumed by the model layer.
pub trait Persistence: Send + Sync {
    /// Inserts a row and returns its id.
    fn insert(&self, table: &str, fields: &[(&str, Value)]) -> Result<i64, StorageError>;

    /// Updates the given columns of row `id`.
    fn update(&self, table: &str, fields: &[(&str, Value)], id: i64) -> Result<(), StorageError>;

    /// Deletes row `id`.
    fn delete(&self, table: &str, id: i64) -> Result<(), StorageError>;

    /// Returns all rows where `column == value`, ordered by id.
    fn select_where(&self, table: &str, column: &str, value: Value) -> Result<Vec<Row>, StorageError>;
}

/// Typed accessors on a selected [`Row`].
pub trait RowExt {
    fn int(&self, column: &str) -> Option<i64>;
    fn text(&self, column: &str) -> Option<&str>;
    fn blob(&self, column: &str) -> Option<&[u8]>;
}

impl RowExt for Row {
    fn int(&self, column: &str) -> Option<i64> {
        match self.get(column) {
            Some(Value::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    fn text(&self, column: &str) -> Option<&str> {
        match self.get(column) {
            Some(Value::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    fn blob(&self, column: &str) -> Option<&[u8]> {
        match self.get(column) {
            Some(Value::Blob(v)) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// Converts an optional value into a nullable column value.
pub fn nullable<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}
