// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transmission Ledger
//!
//! One record per recipient of an outgoing message, or one record naming
//! the sender of an incoming message.

use std::hash::{Hash, Hasher};

use tracing::{debug, warn};

use crate::identity::Jid;
use crate::storage::{nullable, tables, Persistence, Row, RowExt, StorageError, Value, INVALID_ID};

/// Delivery record for one contact.
///
/// Equality only considers the contact, so a second record for the same
/// contact (with a different resource) is a duplicate.
#[derive(Debug, Clone)]
pub struct Transmission {
    id: i64,
    message_id: i64,
    contact: Jid,
    address: Jid,
    /// The transport accepted the envelope for this contact.
    sent: bool,
    received_at: Option<i64>,
}

impl Transmission {
    /// A new, not yet persisted record.
    pub fn new(contact: &Jid, address: Jid) -> Self {
        Transmission {
            id: INVALID_ID,
            message_id: INVALID_ID,
            contact: contact.to_bare(),
            address,
            sent: false,
            received_at: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    /// Bare identity of the recipient (or sender).
    pub fn contact(&self) -> &Jid {
        &self.contact
    }

    /// Full network address the envelope went to (or came from).
    pub fn address(&self) -> &Jid {
        &self.address
    }

    pub fn received_at(&self) -> Option<i64> {
        self.received_at
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn is_received(&self) -> bool {
        self.received_at.is_some()
    }

    pub fn is_persisted(&self) -> bool {
        self.id != INVALID_ID
    }

    /// Writes the record for `message_id`. A failed insert leaves it orphaned.
    pub(crate) fn save(&mut self, db: &dyn Persistence, message_id: i64) {
        self.message_id = message_id;
        let fields = [
            ("message_id", Value::Integer(message_id)),
            ("contact_jid", Value::Text(self.contact.to_string())),
            ("address", Value::Text(self.address.to_string())),
            ("sent", Value::Integer(i64::from(self.sent))),
            ("received_at", nullable(self.received_at)),
        ];
        self.id = match db.insert(tables::TRANSMISSIONS, &fields) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, contact = %self.contact, "Could not insert transmission");
                INVALID_ID
            }
        };
    }

    /// Records the delivery receipt. The first call wins; later calls are
    /// no-ops and return `false`.
    pub(crate) fn set_received(&mut self, db: &dyn Persistence, at: i64) -> bool {
        if let Some(first) = self.received_at {
            debug!(contact = %self.contact, first, "Transmission already received");
            return false;
        }

        if self.is_persisted() {
            if let Err(e) = db.update(
                tables::TRANSMISSIONS,
                &[("received_at", Value::Integer(at))],
                self.id,
            ) {
                warn!(error = %e, id = self.id, "Could not persist receipt");
            }
        }
        self.received_at = Some(at);
        true
    }

    /// Records that the envelope for this contact was handed over.
    pub(crate) fn set_sent(&mut self, db: &dyn Persistence) -> bool {
        if self.sent {
            return false;
        }
        if self.is_persisted() {
            if let Err(e) = db.update(tables::TRANSMISSIONS, &[("sent", Value::Integer(1))], self.id) {
                warn!(error = %e, id = self.id, "Could not persist send state");
            }
        }
        self.sent = true;
        true
    }

    pub(crate) fn delete(&self, db: &dyn Persistence) {
        if !self.is_persisted() {
            return;
        }
        if let Err(e) = db.delete(tables::TRANSMISSIONS, self.id) {
            warn!(error = %e, id = self.id, "Could not delete transmission");
        }
    }

    /// Loads every record of a message.
    pub(crate) fn load_all(db: &dyn Persistence, message_id: i64) -> Result<Vec<Self>, StorageError> {
        db.select_where(tables::TRANSMISSIONS, "message_id", Value::Integer(message_id))?
            .iter()
            .map(row_to_transmission)
            .collect()
    }
}

fn row_to_transmission(row: &Row) -> Result<Transmission, StorageError> {
    let missing = |column: &str| StorageError::Serialization(format!("transmission: missing {}", column));
    Ok(Transmission {
        id: row.int("id").ok_or_else(|| missing("id"))?,
        message_id: row.int("message_id").ok_or_else(|| missing("message_id"))?,
        contact: Jid::parse(row.text("contact_jid").ok_or_else(|| missing("contact_jid"))?),
        address: Jid::parse(row.text("address").ok_or_else(|| missing("address"))?),
        sent: row.int("sent").unwrap_or(0) != 0,
        received_at: row.int("received_at"),
    })
}

impl PartialEq for Transmission {
    fn eq(&self, other: &Self) -> bool {
        self.contact == other.contact
    }
}

impl Eq for Transmission {}

impl Hash for Transmission {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.contact.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    #[test]
    fn test_equality_ignores_resource() {
        let a = Transmission::new(&Jid::parse("bob@example.org"), Jid::parse("bob@example.org/phone"));
        let b = Transmission::new(&Jid::parse("Bob@Example.org/desk"), Jid::parse("bob@example.org/desk"));
        assert_eq!(a, b);
        assert_eq!(a.contact().resource(), None);
    }

    #[test]
    fn test_first_receipt_wins() {
        let db = SqliteStore::in_memory().unwrap();
        let mut t = Transmission::new(&Jid::parse("bob@example.org"), Jid::parse("bob@example.org"));
        t.save(&db, 1);
        assert!(t.is_persisted());

        assert!(t.set_received(&db, 100));
        assert!(!t.set_received(&db, 200));
        assert_eq!(t.received_at(), Some(100));

        let loaded = Transmission::load_all(&db, 1).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].received_at(), Some(100));
    }

    #[test]
    fn test_sent_state_persists() {
        let db = SqliteStore::in_memory().unwrap();
        let mut t = Transmission::new(&Jid::parse("bob@example.org"), Jid::parse("bob@example.org/phone"));
        t.save(&db, 3);
        assert!(!t.is_sent());

        assert!(t.set_sent(&db));
        assert!(!t.set_sent(&db));

        let loaded = Transmission::load_all(&db, 3).unwrap();
        assert!(loaded[0].is_sent());
        assert!(!loaded[0].is_received());
    }
}
