// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message aggregate and its delivery state machine.
//!
//! ```text
//! IN                                   (incoming, never changes)
//! PENDING -> SENT -> RECEIVED          (all transmissions acknowledged)
//! PENDING | SENT -> ERROR              (server reported a failure)
//! ```
//!
//! `RECEIVED` and `ERROR` are terminal. Every transition is written to the
//! store before the change event is dispatched.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crypto::{
    errors_from_mask, errors_to_mask, CoderError, CoderStatus, Encryption, Signing,
};
use crate::identity::Jid;
use crate::storage::{
    nullable, tables, Persistence, Row, RowExt, StorageError, Value, INVALID_ID,
};

use super::content::{Attachment, Body, MessageContent};
use super::events::{EventDispatcher, MessageEvent};
use super::now_millis;
use super::transmission::Transmission;

/// Prefix of locally generated message ids.
const XMPP_ID_PREFIX: &str = "Kon_";

/// Delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Incoming.
    In,
    /// Outgoing, not yet accepted by the server.
    Pending,
    /// Accepted by the server.
    Sent,
    /// Acknowledged by every recipient.
    Received,
    /// The server reported a failure.
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::In => "in",
            Status::Pending => "pending",
            Status::Sent => "sent",
            Status::Received => "received",
            Status::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Status> {
        match value {
            "in" => Some(Status::In),
            "pending" => Some(Status::Pending),
            "sent" => Some(Status::Sent),
            "received" => Some(Status::Received),
            "error" => Some(Status::Error),
            _ => None,
        }
    }

    /// No delivery transition leaves this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Received | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery failure reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub condition: String,
    pub text: String,
}

/// Generates a message id for the wire.
pub fn generate_xmpp_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}{}", XMPP_ID_PREFIX, suffix)
}

/// A chat message.
pub struct Message {
    id: i64,
    chat_id: i64,
    xmpp_id: String,
    created_at: i64,
    server_date: Option<i64>,
    status: Status,
    read: bool,
    content: MessageContent,
    coder_status: CoderStatus,
    transmissions: Vec<Transmission>,
    server_error: Option<ServerError>,
    db: Arc<dyn Persistence>,
    events: Arc<EventDispatcher<MessageEvent>>,
    // raised under the message lock, dispatched after it is released
    pending_events: Vec<MessageEvent>,
}

impl Message {
    /// A new outgoing message, one transmission per recipient.
    ///
    /// Duplicate recipients (same bare address) get a single transmission.
    pub fn outgoing(
        db: Arc<dyn Persistence>,
        events: Arc<EventDispatcher<MessageEvent>>,
        chat_id: i64,
        recipients: &[Jid],
        body: Body,
        encrypt: bool,
    ) -> Self {
        let mut transmissions: Vec<Transmission> = Vec::with_capacity(recipients.len());
        for jid in recipients {
            let transmission = Transmission::new(jid, jid.clone());
            if !transmissions.contains(&transmission) {
                transmissions.push(transmission);
            }
        }

        let coder_status = if encrypt {
            CoderStatus::to_encrypt()
        } else {
            CoderStatus::insecure()
        };

        Message {
            id: INVALID_ID,
            chat_id,
            xmpp_id: generate_xmpp_id(),
            created_at: now_millis(),
            server_date: None,
            status: Status::Pending,
            read: true,
            content: MessageContent::Plain(body),
            coder_status,
            transmissions,
            server_error: None,
            db,
            events,
            pending_events: Vec::new(),
        }
    }

    /// A received message. `sender` is the full address it came from.
    pub fn incoming(
        db: Arc<dyn Persistence>,
        events: Arc<EventDispatcher<MessageEvent>>,
        chat_id: i64,
        sender: &Jid,
        xmpp_id: &str,
        content: MessageContent,
        server_date: Option<i64>,
    ) -> Self {
        let coder_status = if content.is_encrypted() {
            CoderStatus::encrypted()
        } else {
            CoderStatus::insecure()
        };

        Message {
            id: INVALID_ID,
            chat_id,
            xmpp_id: xmpp_id.to_string(),
            created_at: now_millis(),
            server_date,
            status: Status::In,
            read: false,
            content,
            coder_status,
            transmissions: vec![Transmission::new(sender, sender.clone())],
            server_error: None,
            db,
            events,
            pending_events: Vec::new(),
        }
    }

    /// Loads a single message by row id.
    pub fn load(
        db: Arc<dyn Persistence>,
        events: Arc<EventDispatcher<MessageEvent>>,
        id: i64,
    ) -> Result<Option<Self>, StorageError> {
        let rows = db.select_where(tables::MESSAGES, "id", Value::Integer(id))?;
        match rows.first() {
            Some(row) => Self::from_row(db.clone(), events, row).map(Some),
            None => Ok(None),
        }
    }

    /// Loads every message of a chat, in row order.
    pub fn load_for_chat(
        db: Arc<dyn Persistence>,
        events: Arc<EventDispatcher<MessageEvent>>,
        chat_id: i64,
    ) -> Result<Vec<Self>, StorageError> {
        db.select_where(tables::MESSAGES, "chat_id", Value::Integer(chat_id))?
            .iter()
            .map(|row| Self::from_row(db.clone(), events.clone(), row))
            .collect()
    }

    fn from_row(
        db: Arc<dyn Persistence>,
        events: Arc<EventDispatcher<MessageEvent>>,
        row: &Row,
    ) -> Result<Self, StorageError> {
        let missing = |column: &str| StorageError::Serialization(format!("message: bad {}", column));

        let id = row.int("id").ok_or_else(|| missing("id"))?;
        let status = row
            .text("status")
            .and_then(Status::parse)
            .ok_or_else(|| missing("status"))?;
        let content = MessageContent::from_json(row.text("content").ok_or_else(|| missing("content"))?)?;
        let encryption = row
            .text("encryption")
            .and_then(encryption_from_db)
            .ok_or_else(|| missing("encryption"))?;
        let signing = row
            .text("signing")
            .and_then(signing_from_db)
            .ok_or_else(|| missing("signing"))?;
        let errors = errors_from_mask(row.int("coder_errors").unwrap_or(0) as u32);
        let server_error = match row.text("server_error") {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        };

        let mut message = Message {
            id,
            chat_id: row.int("chat_id").ok_or_else(|| missing("chat_id"))?,
            xmpp_id: row.text("xmpp_id").ok_or_else(|| missing("xmpp_id"))?.to_string(),
            created_at: row.int("created_at").ok_or_else(|| missing("created_at"))?,
            server_date: row.int("server_date"),
            status,
            read: row.int("read").unwrap_or(0) != 0,
            content,
            coder_status: CoderStatus::new(encryption, signing, errors),
            transmissions: Transmission::load_all(&*db, id)?,
            server_error,
            db,
            events,
            pending_events: Vec::new(),
        };

        // The receipt rows are written before the status; trust them.
        if matches!(message.status, Status::Pending | Status::Sent) && message.all_received() {
            info!(id, "Re-deriving received status from transmissions");
            message.status = Status::Received;
            message.store();
        }

        Ok(message)
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn xmpp_id(&self) -> &str {
        &self.xmpp_id
    }

    /// Local creation time, milliseconds since the epoch.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn server_date(&self) -> Option<i64> {
        self.server_date
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_outgoing(&self) -> bool {
        self.status != Status::In
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    pub fn coder_status(&self) -> &CoderStatus {
        &self.coder_status
    }

    pub fn transmissions(&self) -> &[Transmission] {
        &self.transmissions
    }

    pub fn server_error(&self) -> Option<&ServerError> {
        self.server_error.as_ref()
    }

    /// Sender address of an incoming message.
    pub fn sender(&self) -> Option<&Jid> {
        match self.status {
            Status::In => self.transmissions.first().map(|t| t.address()),
            _ => None,
        }
    }

    /// Whether the message has a row in the store.
    pub fn is_persisted(&self) -> bool {
        self.id != INVALID_ID
    }

    /// Every transmission has a receipt (and there is at least one).
    /// Recipients whose envelope has not been handed to the transport.
    pub fn unsent_transmissions(&self) -> impl Iterator<Item = &Transmission> {
        self.transmissions.iter().filter(|t| !t.is_sent())
    }

    /// Records that the envelope for `contact` was handed to the transport.
    pub fn mark_sent_to(&mut self, contact: &Jid) -> bool {
        match self.transmissions.iter_mut().find(|t| t.contact() == contact) {
            Some(transmission) => transmission.set_sent(&*self.db),
            None => false,
        }
    }

    pub fn all_received(&self) -> bool {
        !self.transmissions.is_empty() && self.transmissions.iter().all(Transmission::is_received)
    }

    /// Requests a delivery status change.
    ///
    /// Incoming and terminal messages ignore the request, so `Sent` is only
    /// ever entered from `Pending`. `Received` is only reached through
    /// [`Message::set_received`].
    pub fn set_status(&mut self, status: Status) {
        if status == self.status {
            return;
        }
        match (self.status, status) {
            (Status::In, _) | (_, Status::In) => {
                warn!(xmpp_id = %self.xmpp_id, from = %self.status, to = %status, "Incoming messages have no delivery status");
                return;
            }
            (from, _) if from.is_terminal() => {
                warn!(xmpp_id = %self.xmpp_id, from = %from, to = %status, "Ignoring transition out of terminal status");
                return;
            }
            (_, Status::Pending) | (_, Status::Received) => {
                warn!(xmpp_id = %self.xmpp_id, from = %self.status, to = %status, "Ignoring status request");
                return;
            }
            _ => {}
        }
        self.transition(status);
    }

    /// Records the delivery receipt of `contact`.
    ///
    /// Returns `false` if the contact is not a recipient or already
    /// acknowledged. Moves to `Received` once every transmission is received.
    pub fn set_received(&mut self, contact: &Jid, at: i64) -> bool {
        if self.status == Status::In {
            warn!(xmpp_id = %self.xmpp_id, "Receipt for incoming message");
            return false;
        }

        let Some(transmission) = self.transmissions.iter_mut().find(|t| t.contact() == contact) else {
            warn!(xmpp_id = %self.xmpp_id, contact = %contact, "Receipt from unknown recipient");
            return false;
        };
        if !transmission.set_received(&*self.db, at) {
            return false;
        }

        self.emit(MessageEvent::Received {
            message_id: self.id,
            xmpp_id: self.xmpp_id.clone(),
            contact: contact.to_bare(),
        });

        if self.status.is_terminal() {
            debug!(xmpp_id = %self.xmpp_id, status = %self.status, "Receipt after terminal status");
        } else if self.all_received() {
            self.transition(Status::Received);
        }
        true
    }

    /// Records a delivery failure reported by the server.
    ///
    /// Expected from `Sent`; a pending message fails too (logged). Incoming
    /// and terminal messages ignore it.
    pub fn set_server_error(&mut self, condition: &str, text: &str) {
        match self.status {
            Status::Sent => {}
            Status::Pending => {
                warn!(xmpp_id = %self.xmpp_id, "Server error for message not marked sent");
            }
            Status::In | Status::Received | Status::Error => {
                warn!(xmpp_id = %self.xmpp_id, status = %self.status, condition, "Ignoring server error");
                return;
            }
        }
        self.fail(condition, text);
    }

    /// Moves a pending or sent message to `Error`.
    pub(crate) fn fail(&mut self, condition: &str, text: &str) {
        if !matches!(self.status, Status::Pending | Status::Sent) {
            return;
        }
        self.server_error = Some(ServerError {
            condition: condition.to_string(),
            text: text.to_string(),
        });
        self.transition(Status::Error);
        self.emit(MessageEvent::ServerError {
            message_id: self.id,
            xmpp_id: self.xmpp_id.clone(),
            condition: condition.to_string(),
            text: text.to_string(),
        });
    }

    fn transition(&mut self, status: Status) {
        info!(xmpp_id = %self.xmpp_id, from = %self.status, to = %status, "Message status");
        self.status = status;
        self.store();
        self.emit(MessageEvent::StatusChanged {
            message_id: self.id,
            xmpp_id: self.xmpp_id.clone(),
            status,
        });
    }

    /// Marks an incoming message as read. Returns `true` if it was unread.
    pub fn set_read(&mut self) -> bool {
        if self.status != Status::In || self.read {
            return false;
        }
        self.read = true;
        self.store();
        true
    }

    pub fn set_server_date(&mut self, date: i64) {
        self.server_date = Some(date);
        self.store();
    }

    /// Outgoing content was encrypted (and signed) for sending.
    pub fn set_encrypted(&mut self, signed: bool) {
        self.coder_status.set_encrypted();
        if signed {
            self.apply_signing(Signing::Signed);
        }
        self.coder_changed();
    }

    /// Replaces the security error set.
    pub fn set_security_errors(&mut self, errors: BTreeSet<CoderError>) {
        self.coder_status.set_security_errors(errors);
        self.coder_changed();
    }

    /// Stores the decrypted body together with the decryption verdict.
    ///
    /// Returns `false` if the content was not encrypted.
    pub fn set_decrypted_content(
        &mut self,
        body: Body,
        signing: Signing,
        errors: BTreeSet<CoderError>,
    ) -> bool {
        if !self.content.set_decrypted(body) {
            return false;
        }
        self.coder_status.set_decrypted();
        self.apply_signing(signing);
        self.coder_status.set_security_errors(errors);
        self.store();
        self.emit(MessageEvent::ContentChanged {
            message_id: self.id,
            xmpp_id: self.xmpp_id.clone(),
        });
        self.emit(MessageEvent::CoderStatusChanged {
            message_id: self.id,
            xmpp_id: self.xmpp_id.clone(),
        });
        true
    }

    /// Records a decryption that did not recover the body.
    pub fn set_decryption_failed(&mut self, signing: Signing, errors: BTreeSet<CoderError>) {
        self.apply_signing(signing);
        self.coder_status.set_security_errors(errors);
        self.coder_changed();
    }

    /// Updates the attachment in place. Returns `false` if there is none.
    pub fn update_attachment<F: FnOnce(&mut Attachment)>(&mut self, update: F) -> bool {
        let Some(attachment) = self.content.attachment_mut() else {
            return false;
        };
        update(attachment);
        self.store();
        self.emit(MessageEvent::ContentChanged {
            message_id: self.id,
            xmpp_id: self.xmpp_id.clone(),
        });
        true
    }

    fn emit(&mut self, event: MessageEvent) {
        self.pending_events.push(event);
    }

    pub(crate) fn take_events(&mut self) -> Vec<MessageEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub(crate) fn event_dispatcher(&self) -> &Arc<EventDispatcher<MessageEvent>> {
        &self.events
    }

    /// Dispatches the events raised since the last flush.
    ///
    /// Messages behind a [`MessageHandle`](super::MessageHandle) flush when
    /// the guard from [`lock_message`](super::lock_message) drops.
    pub fn flush_events(&mut self) {
        for event in self.take_events() {
            self.events.dispatch(event);
        }
    }

    fn apply_signing(&mut self, signing: Signing) {
        if let Err(e) = self.coder_status.set_signing(signing) {
            warn!(xmpp_id = %self.xmpp_id, error = %e, "Signing transition rejected");
        }
    }

    fn coder_changed(&mut self) {
        debug!(xmpp_id = %self.xmpp_id, status = %self.coder_status, "Coder status");
        self.store();
        self.emit(MessageEvent::CoderStatusChanged {
            message_id: self.id,
            xmpp_id: self.xmpp_id.clone(),
        });
    }

    /// Inserts the message and its transmissions into chat `chat_id`.
    ///
    /// On failure the message stays orphaned (`id == INVALID_ID`).
    pub(crate) fn save(&mut self) {
        if self.is_persisted() {
            self.store();
            return;
        }
        let fields = match self.fields() {
            Ok(fields) => fields,
            Err(e) => {
                warn!(xmpp_id = %self.xmpp_id, error = %e, "Could not serialize message");
                return;
            }
        };
        match self.db.insert(tables::MESSAGES, &fields) {
            Ok(id) => {
                self.id = id;
                let db = self.db.clone();
                for transmission in &mut self.transmissions {
                    transmission.save(&*db, id);
                }
            }
            Err(e) => {
                warn!(xmpp_id = %self.xmpp_id, error = %e, "Could not insert message, keeping it in memory only");
            }
        }
    }

    /// Writes the current state of a persisted message.
    fn store(&self) {
        if !self.is_persisted() {
            return;
        }
        let result = self
            .fields()
            .and_then(|fields| self.db.update(tables::MESSAGES, &fields, self.id));
        if let Err(e) = result {
            warn!(id = self.id, error = %e, "Could not update message");
        }
    }

    fn fields(&self) -> Result<Vec<(&'static str, Value)>, StorageError> {
        let server_error = match &self.server_error {
            Some(error) => Some(serde_json::to_string(error)?),
            None => None,
        };
        Ok(vec![
            ("chat_id", Value::Integer(self.chat_id)),
            ("xmpp_id", Value::Text(self.xmpp_id.clone())),
            ("created_at", Value::Integer(self.created_at)),
            ("server_date", nullable(self.server_date)),
            ("status", Value::Text(self.status.as_str().to_string())),
            ("read", Value::Integer(self.read as i64)),
            ("content", Value::Text(self.content.to_json()?)),
            (
                "encryption",
                Value::Text(encryption_to_db(self.coder_status.encryption()).to_string()),
            ),
            (
                "signing",
                Value::Text(signing_to_db(self.coder_status.signing()).to_string()),
            ),
            (
                "coder_errors",
                Value::Integer(errors_to_mask(self.coder_status.errors()) as i64),
            ),
            ("server_error", nullable(server_error)),
        ])
    }

    /// Removes the message and its transmissions from the store.
    pub(crate) fn delete(&self) {
        for transmission in &self.transmissions {
            transmission.delete(&*self.db);
        }
        if self.is_persisted() {
            if let Err(e) = self.db.delete(tables::MESSAGES, self.id) {
                warn!(id = self.id, error = %e, "Could not delete message");
            }
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("chat_id", &self.chat_id)
            .field("xmpp_id", &self.xmpp_id)
            .field("status", &self.status)
            .field("coder_status", &self.coder_status)
            .field("transmissions", &self.transmissions.len())
            .finish_non_exhaustive()
    }
}

fn encryption_to_db(encryption: Encryption) -> &'static str {
    match encryption {
        Encryption::None => "none",
        Encryption::Encrypted => "encrypted",
        Encryption::Decrypted => "decrypted",
        Encryption::ToEncrypt => "to_encrypt",
    }
}

fn encryption_from_db(value: &str) -> Option<Encryption> {
    match value {
        "none" => Some(Encryption::None),
        "encrypted" => Some(Encryption::Encrypted),
        "decrypted" => Some(Encryption::Decrypted),
        "to_encrypt" => Some(Encryption::ToEncrypt),
        _ => None,
    }
}

fn signing_to_db(signing: Signing) -> &'static str {
    match signing {
        Signing::None => "none",
        Signing::Unknown => "unknown",
        Signing::Signed => "signed",
        Signing::Verified => "verified",
    }
}

fn signing_from_db(value: &str) -> Option<Signing> {
    match value {
        "none" => Some(Signing::None),
        "unknown" => Some(Signing::Unknown),
        "signed" => Some(Signing::Signed),
        "verified" => Some(Signing::Verified),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    fn setup() -> (Arc<dyn Persistence>, Arc<EventDispatcher<MessageEvent>>) {
        (
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(EventDispatcher::new()),
        )
    }

    fn jid(s: &str) -> Jid {
        Jid::parse(s)
    }

    #[test]
    fn test_xmpp_id_format() {
        let id = generate_xmpp_id();
        assert!(id.starts_with("Kon_"));
        assert_eq!(id.len(), 12);
        assert!(id[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_duplicate_recipients_collapse() {
        let (db, events) = setup();
        let message = Message::outgoing(
            db,
            events,
            1,
            &[jid("bob@example.org"), jid("Bob@example.org/phone")],
            Body::text("hi"),
            false,
        );
        assert_eq!(message.transmissions().len(), 1);
    }

    #[test]
    fn test_sent_is_idempotent() {
        let (db, events) = setup();
        let mut message =
            Message::outgoing(db, events, 1, &[jid("bob@example.org")], Body::text("hi"), false);
        message.save();
        message.set_status(Status::Sent);
        message.set_status(Status::Sent);
        assert_eq!(message.status(), Status::Sent);
    }

    #[test]
    fn test_pending_server_error_fails() {
        let (db, events) = setup();
        let mut message =
            Message::outgoing(db, events, 1, &[jid("bob@example.org")], Body::text("hi"), false);
        message.set_server_error("remote-server-not-found", "");
        assert_eq!(message.status(), Status::Error);
        assert_eq!(message.server_error().unwrap().condition, "remote-server-not-found");
    }

    #[test]
    fn test_error_is_terminal() {
        let (db, events) = setup();
        let mut message =
            Message::outgoing(db, events, 1, &[jid("bob@example.org")], Body::text("hi"), false);
        message.set_status(Status::Sent);
        message.set_server_error("service-unavailable", "down");
        message.set_status(Status::Sent);
        assert!(message.set_received(&jid("bob@example.org"), 5));
        assert_eq!(message.status(), Status::Error);
    }

    #[test]
    fn test_incoming_ignores_delivery_changes() {
        let (db, events) = setup();
        let mut message = Message::incoming(
            db,
            events,
            1,
            &jid("bob@example.org/phone"),
            "abc",
            MessageContent::plain("hi"),
            None,
        );
        message.set_status(Status::Sent);
        message.set_server_error("x", "y");
        assert!(!message.set_received(&jid("bob@example.org"), 1));
        assert_eq!(message.status(), Status::In);
        assert_eq!(message.sender().unwrap().resource(), Some("phone"));
    }

    #[test]
    fn test_read_only_for_incoming() {
        let (db, events) = setup();
        let mut incoming = Message::incoming(
            db.clone(),
            events.clone(),
            1,
            &jid("bob@example.org"),
            "abc",
            MessageContent::plain("hi"),
            None,
        );
        assert!(!incoming.is_read());
        assert!(incoming.set_read());
        assert!(!incoming.set_read());

        let mut outgoing =
            Message::outgoing(db, events, 1, &[jid("bob@example.org")], Body::text("x"), false);
        assert!(!outgoing.set_read());
    }

    #[test]
    fn test_set_encrypted_marks_signed() {
        let (db, events) = setup();
        let mut message =
            Message::outgoing(db, events, 1, &[jid("bob@example.org")], Body::text("hi"), true);
        assert_eq!(message.coder_status().encryption(), Encryption::ToEncrypt);
        message.set_encrypted(true);
        assert_eq!(message.coder_status().encryption(), Encryption::Encrypted);
        assert_eq!(message.coder_status().signing(), Signing::Signed);
    }

    #[test]
    fn test_decrypted_content_roundtrips_store() {
        let (db, events) = setup();
        let mut message = Message::incoming(
            db.clone(),
            events.clone(),
            7,
            &jid("bob@example.org/phone"),
            "abc",
            MessageContent::Encrypted(vec![1, 2, 3]),
            Some(1_000),
        );
        message.save();
        assert!(message.set_decrypted_content(
            Body::text("hello"),
            Signing::Verified,
            BTreeSet::from([CoderError::NoIntegrity]),
        ));

        let loaded = Message::load(db, events, message.id()).unwrap().unwrap();
        assert_eq!(loaded.content().text(), "hello");
        assert_eq!(loaded.coder_status(), message.coder_status());
        assert_eq!(loaded.server_date(), Some(1_000));
        assert_eq!(loaded.sender(), Some(&jid("bob@example.org")));
    }

    #[test]
    fn test_events_wait_for_flush() {
        let (db, events) = setup();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.add_handler(Arc::new(crate::model::CallbackHandler::new(
            move |event: MessageEvent| sink.lock().unwrap().push(event),
        )));

        let mut message =
            Message::outgoing(db, events, 1, &[jid("bob@example.org")], Body::text("hi"), false);
        message.set_status(Status::Sent);
        assert!(seen.lock().unwrap().is_empty());

        message.flush_events();
        assert!(matches!(
            seen.lock().unwrap().as_slice(),
            [MessageEvent::StatusChanged { status: Status::Sent, .. }]
        ));
        message.flush_events();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_handler_may_relock_message() {
        let (db, events) = setup();
        let message =
            Message::outgoing(db, events.clone(), 1, &[jid("bob@example.org")], Body::text("hi"), false);
        let handle = crate::model::handle(message);
        let observed = Arc::new(std::sync::Mutex::new(None));

        let weak = Arc::downgrade(&handle);
        let sink = observed.clone();
        events.add_handler(Arc::new(crate::model::CallbackHandler::new(
            move |_: MessageEvent| {
                if let Some(handle) = weak.upgrade() {
                    *sink.lock().unwrap() = Some(crate::model::lock_message(&handle).status());
                }
            },
        )));

        crate::model::lock_message(&handle).set_status(Status::Sent);
        assert_eq!(*observed.lock().unwrap(), Some(Status::Sent));
    }

    #[test]
    fn test_db_names_roundtrip() {
        for e in [
            Encryption::None,
            Encryption::Encrypted,
            Encryption::Decrypted,
            Encryption::ToEncrypt,
        ] {
            assert_eq!(encryption_from_db(encryption_to_db(e)), Some(e));
        }
        for s in [Signing::None, Signing::Unknown, Signing::Signed, Signing::Verified] {
            assert_eq!(signing_from_db(signing_to_db(s)), Some(s));
        }
        for s in [Status::In, Status::Pending, Status::Sent, Status::Received, Status::Error] {
            assert_eq!(Status::parse(s.as_str()), Some(s));
        }
    }
}
