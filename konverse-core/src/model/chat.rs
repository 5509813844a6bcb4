// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat aggregate: members and an ordered message list.
//!
//! Chats are shared as `Arc<Chat>` and lock internally. Message handles are
//! cloned out of the chat lock before a message is locked, so the two locks
//! are never held together. Duplicate detection reads the per-entry
//! origin and never locks a message.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::identity::Jid;
use crate::storage::{nullable, tables, Persistence, Row, RowExt, StorageError, Value, INVALID_ID};

use super::contact::{Contact, Member, Role};
use super::events::{ChatEvent, EventDispatcher, MessageEvent};
use super::message::{Message, Status};
use super::{lock_message, MessageHandle};

/// Chat errors.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Operation only valid for group chats")]
    NotAGroup,

    #[error("A single chat has exactly one member")]
    SingleChatMember,

    #[error("Not a member: {0}")]
    UnknownMember(Jid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Single-recipient or group chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatKind {
    Single,
    Group { group_id: String, subject: String },
}

struct ChatState {
    id: i64,
    kind: ChatKind,
    members: Vec<Member>,
    /// Sorted by key.
    messages: Vec<Entry>,
}

/// A message handle with its immutable sort key `(created_at, id)`.
struct Entry {
    key: (i64, i64),
    origin: Origin,
    handle: MessageHandle,
}

impl Entry {
    fn new(message: Message) -> Self {
        Entry {
            key: (message.created_at(), message.id()),
            origin: Origin::of(&message),
            handle: super::handle(message),
        }
    }
}

/// Identity of a message for duplicate detection: wire id plus sender,
/// with no sender for outgoing messages.
#[derive(Debug, PartialEq, Eq)]
struct Origin {
    xmpp_id: String,
    sender: Option<Jid>,
}

impl Origin {
    fn of(message: &Message) -> Self {
        let sender = if message.is_outgoing() {
            None
        } else {
            message.sender().map(Jid::to_bare)
        };
        Origin {
            xmpp_id: message.xmpp_id().to_string(),
            sender,
        }
    }
}

/// A conversation.
pub struct Chat {
    state: RwLock<ChatState>,
    db: Arc<dyn Persistence>,
    message_events: Arc<EventDispatcher<MessageEvent>>,
    events: EventDispatcher<ChatEvent>,
}

impl Chat {
    /// Creates and stores a chat with one contact.
    pub fn single(db: Arc<dyn Persistence>, contact: Contact) -> Arc<Chat> {
        Self::create(db, ChatKind::Single, vec![Member::new(contact, Role::Member)])
    }

    /// Creates and stores a group chat.
    pub fn group(
        db: Arc<dyn Persistence>,
        group_id: &str,
        subject: &str,
        members: Vec<Member>,
    ) -> Arc<Chat> {
        let kind = ChatKind::Group {
            group_id: group_id.to_string(),
            subject: subject.to_string(),
        };
        Self::create(db, kind, members)
    }

    fn create(db: Arc<dyn Persistence>, kind: ChatKind, mut members: Vec<Member>) -> Arc<Chat> {
        let id = match db.insert(tables::CHATS, &kind_fields(&kind)) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Could not insert chat, keeping it in memory only");
                INVALID_ID
            }
        };
        if id != INVALID_ID {
            for member in &mut members {
                insert_member(&*db, id, member);
            }
        }
        info!(id, members = members.len(), "Created chat");

        Arc::new(Chat {
            state: RwLock::new(ChatState {
                id,
                kind,
                members,
                messages: Vec::new(),
            }),
            db,
            message_events: Arc::new(EventDispatcher::new()),
            events: EventDispatcher::new(),
        })
    }

    /// Loads a chat with its members and messages.
    pub fn load(db: Arc<dyn Persistence>, id: i64) -> Result<Option<Arc<Chat>>, StorageError> {
        let rows = db.select_where(tables::CHATS, "id", Value::Integer(id))?;
        match rows.first() {
            Some(row) => Self::from_row(db.clone(), row).map(Some),
            None => Ok(None),
        }
    }

    /// Loads every stored chat, ordered by id.
    pub fn load_all(db: Arc<dyn Persistence>) -> Result<Vec<Arc<Chat>>, StorageError> {
        let mut rows = db.select_where(tables::CHATS, "kind", Value::Text(KIND_SINGLE.to_string()))?;
        rows.extend(db.select_where(tables::CHATS, "kind", Value::Text(KIND_GROUP.to_string()))?);
        rows.sort_by_key(|row| row.int("id"));
        rows.iter().map(|row| Self::from_row(db.clone(), row)).collect()
    }

    fn from_row(db: Arc<dyn Persistence>, row: &Row) -> Result<Arc<Chat>, StorageError> {
        let id = row
            .int("id")
            .ok_or_else(|| StorageError::Serialization("chat: missing id".to_string()))?;
        let kind = match row.text("kind") {
            Some(KIND_SINGLE) => ChatKind::Single,
            Some(KIND_GROUP) => ChatKind::Group {
                group_id: row.text("group_id").unwrap_or_default().to_string(),
                subject: row.text("subject").unwrap_or_default().to_string(),
            },
            other => {
                return Err(StorageError::Serialization(format!(
                    "chat {}: unknown kind {:?}",
                    id, other
                )))
            }
        };

        let members = db
            .select_where(tables::CHAT_MEMBERS, "chat_id", Value::Integer(id))?
            .iter()
            .map(row_to_member)
            .collect::<Result<Vec<_>, _>>()?;

        let message_events = Arc::new(EventDispatcher::new());
        let mut messages: Vec<Message> = Message::load_for_chat(db.clone(), message_events.clone(), id)?;
        messages.sort_by_key(|m| (m.created_at(), m.id()));
        debug!(id, members = members.len(), messages = messages.len(), "Loaded chat");

        Ok(Arc::new(Chat {
            state: RwLock::new(ChatState {
                id,
                kind,
                members,
                messages: messages.into_iter().map(Entry::new).collect(),
            }),
            db,
            message_events,
            events: EventDispatcher::new(),
        }))
    }

    fn read(&self) -> RwLockReadGuard<'_, ChatState> {
        self.state.read().expect("chat lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChatState> {
        self.state.write().expect("chat lock poisoned")
    }

    pub fn id(&self) -> i64 {
        self.read().id
    }

    pub fn is_persisted(&self) -> bool {
        self.id() != INVALID_ID
    }

    pub fn kind(&self) -> ChatKind {
        self.read().kind.clone()
    }

    pub fn is_group(&self) -> bool {
        matches!(self.read().kind, ChatKind::Group { .. })
    }

    pub fn subject(&self) -> Option<String> {
        match &self.read().kind {
            ChatKind::Group { subject, .. } => Some(subject.clone()),
            ChatKind::Single => None,
        }
    }

    /// Chat events (membership, new messages, read state).
    pub fn events(&self) -> &EventDispatcher<ChatEvent> {
        &self.events
    }

    /// Events of every message in this chat.
    pub fn message_events(&self) -> &Arc<EventDispatcher<MessageEvent>> {
        &self.message_events
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.db
    }

    pub fn members(&self) -> Vec<Member> {
        self.read().members.clone()
    }

    /// Members that messages can be addressed to.
    pub fn valid_members(&self) -> Vec<Member> {
        self.read()
            .members
            .iter()
            .filter(|m| m.contact.is_valid())
            .cloned()
            .collect()
    }

    /// Whether the chat has someone to talk to.
    ///
    /// A single chat needs its contact to be valid; a group needs at least
    /// one valid member besides the local user.
    pub fn is_valid(&self) -> bool {
        let state = self.read();
        match state.kind {
            ChatKind::Single => state.members.len() == 1 && state.members[0].contact.is_valid(),
            ChatKind::Group { .. } => state.members.iter().any(|m| m.contact.is_valid()),
        }
    }

    /// At least one valid member wants encryption.
    pub fn is_send_encrypted(&self) -> bool {
        self.read()
            .members
            .iter()
            .any(|m| m.contact.is_valid() && m.contact.wants_encryption())
    }

    /// There are valid members and every one of them has a key.
    pub fn can_send_encrypted(&self) -> bool {
        let valid = self.valid_members();
        !valid.is_empty() && valid.iter().all(|m| m.contact.has_key())
    }

    /// Adds a group member, or updates the role of an existing one.
    pub fn add_member(&self, contact: Contact, role: Role) -> Result<(), ChatError> {
        let mut state = self.write();
        if state.kind == ChatKind::Single {
            return Err(ChatError::SingleChatMember);
        }
        let chat_id = state.id;

        if let Some(member) = state.members.iter_mut().find(|m| m.contact.jid() == contact.jid()) {
            member.contact = contact;
            member.role = role;
            update_member(&*self.db, member);
        } else {
            let mut member = Member::new(contact, role);
            if chat_id != INVALID_ID {
                insert_member(&*self.db, chat_id, &mut member);
            }
            state.members.push(member);
        }
        drop(state);

        self.events.dispatch(ChatEvent::MembersChanged { chat_id });
        Ok(())
    }

    /// Removes a group member.
    pub fn remove_member(&self, jid: &Jid) -> Result<(), ChatError> {
        let mut state = self.write();
        if state.kind == ChatKind::Single {
            return Err(ChatError::SingleChatMember);
        }
        let index = state
            .members
            .iter()
            .position(|m| m.contact.jid() == jid)
            .ok_or_else(|| ChatError::UnknownMember(jid.clone()))?;
        let member = state.members.remove(index);
        let chat_id = state.id;
        drop(state);

        if member.id != INVALID_ID {
            self.db.delete(tables::CHAT_MEMBERS, member.id)?;
        }
        self.events.dispatch(ChatEvent::MembersChanged { chat_id });
        Ok(())
    }

    /// Replaces the stored contact data of a member (key, flags).
    pub fn update_contact(&self, contact: Contact) -> Result<(), ChatError> {
        let mut state = self.write();
        let member = state
            .members
            .iter_mut()
            .find(|m| m.contact.jid() == contact.jid())
            .ok_or_else(|| ChatError::UnknownMember(contact.jid().clone()))?;
        member.contact = contact;
        update_member(&*self.db, member);
        let chat_id = state.id;
        drop(state);

        self.events.dispatch(ChatEvent::MembersChanged { chat_id });
        Ok(())
    }

    pub fn set_subject(&self, subject: &str) -> Result<(), ChatError> {
        let mut state = self.write();
        let ChatKind::Group { subject: current, .. } = &mut state.kind else {
            return Err(ChatError::NotAGroup);
        };
        *current = subject.to_string();
        let chat_id = state.id;
        if chat_id != INVALID_ID {
            self.db.update(
                tables::CHATS,
                &[("subject", Value::Text(subject.to_string()))],
                chat_id,
            )?;
        }
        drop(state);

        self.events.dispatch(ChatEvent::SubjectChanged {
            chat_id,
            subject: subject.to_string(),
        });
        Ok(())
    }

    /// Adds a message and stores it. See [`Chat::insert_message`].
    pub fn add_message(&self, message: Message) -> bool {
        self.insert_message(message).is_some()
    }

    /// Adds a message and returns its handle.
    ///
    /// Returns `None` if the message belongs to another chat or duplicates
    /// one already present: same wire id and direction, and for incoming
    /// messages the same sender.
    pub fn insert_message(&self, mut message: Message) -> Option<MessageHandle> {
        let origin = Origin::of(&message);
        let incoming_unread = !message.is_outgoing() && !message.is_read();

        // Check and insert under one write lock so concurrent copies of the
        // same message cannot both get in.
        let (chat_id, handle) = {
            let mut state = self.write();
            let chat_id = state.id;
            if message.chat_id() != chat_id {
                warn!(chat_id, message_chat = message.chat_id(), "Message belongs to another chat");
                return None;
            }
            if state.messages.iter().any(|e| e.origin == origin) {
                debug!(xmpp_id = %origin.xmpp_id, "Duplicate message");
                return None;
            }

            message.save();
            let entry = Entry::new(message);
            let handle = entry.handle.clone();
            let index = state.messages.partition_point(|e| e.key <= entry.key);
            state.messages.insert(index, entry);
            (chat_id, handle)
        };

        self.events.dispatch(ChatEvent::MessageAdded {
            chat_id,
            xmpp_id: origin.xmpp_id,
        });
        if incoming_unread {
            self.events.dispatch(ChatEvent::ReadChanged {
                chat_id,
                unread: true,
            });
        }
        Some(handle)
    }

    /// All messages, ordered by creation time.
    pub fn messages(&self) -> Vec<MessageHandle> {
        self.read().messages.iter().map(|e| e.handle.clone()).collect()
    }

    /// Outgoing messages the server has not accepted yet.
    pub fn pending_messages(&self) -> Vec<MessageHandle> {
        self.messages()
            .into_iter()
            .filter(|h| lock_message(h).status() == Status::Pending)
            .collect()
    }

    pub fn last_message(&self) -> Option<MessageHandle> {
        self.read().messages.last().map(|e| e.handle.clone())
    }

    /// The newest message with this wire id.
    pub fn message_by_xmpp_id(&self, xmpp_id: &str) -> Option<MessageHandle> {
        self.messages()
            .into_iter()
            .rev()
            .find(|h| lock_message(h).xmpp_id() == xmpp_id)
    }

    /// Whether any incoming message is unread.
    pub fn unread(&self) -> bool {
        self.messages().iter().any(|h| {
            let m = lock_message(h);
            !m.is_outgoing() && !m.is_read()
        })
    }

    /// Number of unread incoming messages.
    pub fn unread_count(&self) -> usize {
        self.messages()
            .iter()
            .filter(|h| {
                let m = lock_message(h);
                !m.is_outgoing() && !m.is_read()
            })
            .count()
    }

    /// Marks every incoming message read.
    pub fn set_read(&self) {
        let mut changed = false;
        for handle in self.messages() {
            changed |= lock_message(&handle).set_read();
        }
        if changed {
            self.events.dispatch(ChatEvent::ReadChanged {
                chat_id: self.id(),
                unread: false,
            });
        }
    }

    /// Deletes the chat with all members and messages from the store.
    pub fn delete(&self) -> Result<(), StorageError> {
        for handle in self.messages() {
            lock_message(&handle).delete();
        }
        let state = self.read();
        if state.id == INVALID_ID {
            return Ok(());
        }
        for member in &state.members {
            if member.id != INVALID_ID {
                self.db.delete(tables::CHAT_MEMBERS, member.id)?;
            }
        }
        self.db.delete(tables::CHATS, state.id)?;
        info!(id = state.id, "Deleted chat");
        Ok(())
    }
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Chat")
            .field("id", &state.id)
            .field("kind", &state.kind)
            .field("members", &state.members.len())
            .field("messages", &state.messages.len())
            .finish_non_exhaustive()
    }
}

const KIND_SINGLE: &str = "single";
const KIND_GROUP: &str = "group";

fn kind_fields(kind: &ChatKind) -> Vec<(&'static str, Value)> {
    match kind {
        ChatKind::Single => vec![("kind", Value::Text(KIND_SINGLE.to_string()))],
        ChatKind::Group { group_id, subject } => vec![
            ("kind", Value::Text(KIND_GROUP.to_string())),
            ("group_id", Value::Text(group_id.clone())),
            ("subject", nullable(Some(subject.clone()))),
        ],
    }
}

fn member_fields(chat_id: i64, member: &Member) -> Result<Vec<(&'static str, Value)>, StorageError> {
    Ok(vec![
        ("chat_id", Value::Integer(chat_id)),
        ("contact_jid", Value::Text(member.contact.jid().to_string())),
        ("role", Value::Text(member.role.as_str().to_string())),
        ("contact", Value::Text(serde_json::to_string(&member.contact)?)),
    ])
}

fn insert_member(db: &dyn Persistence, chat_id: i64, member: &mut Member) {
    let result = member_fields(chat_id, member).and_then(|fields| db.insert(tables::CHAT_MEMBERS, &fields));
    member.id = match result {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, jid = %member.contact.jid(), "Could not insert chat member");
            INVALID_ID
        }
    };
}

fn update_member(db: &dyn Persistence, member: &Member) {
    if member.id == INVALID_ID {
        return;
    }
    let result = serde_json::to_string(&member.contact)
        .map_err(StorageError::from)
        .and_then(|contact| {
            db.update(
                tables::CHAT_MEMBERS,
                &[
                    ("role", Value::Text(member.role.as_str().to_string())),
                    ("contact", Value::Text(contact)),
                ],
                member.id,
            )
        });
    if let Err(e) = result {
        warn!(error = %e, id = member.id, "Could not update chat member");
    }
}

fn row_to_member(row: &Row) -> Result<Member, StorageError> {
    let id = row
        .int("id")
        .ok_or_else(|| StorageError::Serialization("member: missing id".to_string()))?;
    let role = row
        .text("role")
        .and_then(Role::parse)
        .ok_or_else(|| StorageError::Serialization(format!("member {}: bad role", id)))?;
    let contact: Contact = serde_json::from_str(
        row.text("contact")
            .ok_or_else(|| StorageError::Serialization(format!("member {}: missing contact", id)))?,
    )?;
    Ok(Member { id, contact, role })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::content::{Body, MessageContent};
    use crate::storage::SqliteStore;

    fn db() -> Arc<dyn Persistence> {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    fn contact(jid: &str) -> Contact {
        Contact::new(Jid::parse(jid), jid)
    }

    #[test]
    fn test_single_chat_rejects_members() {
        let chat = Chat::single(db(), contact("bob@example.org"));
        assert!(matches!(
            chat.add_member(contact("carol@example.org"), Role::Member),
            Err(ChatError::SingleChatMember)
        ));
        assert_eq!(chat.members().len(), 1);
        assert!(matches!(chat.set_subject("x"), Err(ChatError::NotAGroup)));
    }

    #[test]
    fn test_messages_ordered_by_creation() {
        let chat = Chat::single(db(), contact("bob@example.org"));
        let bob = Jid::parse("bob@example.org/phone");
        let early = Message::outgoing(
            chat.persistence().clone(),
            chat.message_events().clone(),
            chat.id(),
            &[bob.to_bare()],
            Body::text("1"),
            false,
        );
        std::thread::sleep(std::time::Duration::from_millis(2));
        let late = Message::incoming(
            chat.persistence().clone(),
            chat.message_events().clone(),
            chat.id(),
            &bob,
            "late",
            MessageContent::plain("2"),
            None,
        );

        assert!(chat.add_message(late));
        assert!(chat.add_message(early));
        let texts: Vec<String> = chat
            .messages()
            .iter()
            .map(|h| lock_message(h).content().text().to_string())
            .collect();
        assert_eq!(texts, vec!["1", "2"]);
        assert!(chat.unread());

        chat.set_read();
        assert!(!chat.unread());
    }

    #[test]
    fn test_group_members_persist() {
        let db = db();
        let chat = Chat::group(
            db.clone(),
            "g1",
            "Friends",
            vec![Member::new(Contact::me(Jid::parse("alice@example.org")), Role::Owner)],
        );
        assert!(!chat.is_valid());

        chat.add_member(contact("bob@example.org"), Role::Member).unwrap();
        chat.add_member(contact("carol@example.org"), Role::Admin).unwrap();
        chat.remove_member(&Jid::parse("carol@example.org")).unwrap();
        chat.set_subject("Best friends").unwrap();
        assert!(chat.is_valid());

        let loaded = Chat::load(db, chat.id()).unwrap().unwrap();
        assert_eq!(loaded.subject().as_deref(), Some("Best friends"));
        assert_eq!(loaded.members().len(), 2);
        assert_eq!(loaded.valid_members().len(), 1);
        assert!(matches!(
            loaded.remove_member(&Jid::parse("dave@example.org")),
            Err(ChatError::UnknownMember(_))
        ));
    }

    #[test]
    fn test_message_of_other_chat_rejected() {
        let chat = Chat::single(db(), contact("bob@example.org"));
        let message = Message::outgoing(
            chat.persistence().clone(),
            chat.message_events().clone(),
            chat.id() + 1,
            &[Jid::parse("bob@example.org")],
            Body::text("x"),
            false,
        );
        assert!(!chat.add_message(message));
        assert!(chat.messages().is_empty());
    }

    fn incoming(chat: &Chat, sender: &str, xmpp_id: &str) -> Message {
        Message::incoming(
            chat.persistence().clone(),
            chat.message_events().clone(),
            chat.id(),
            &Jid::parse(sender),
            xmpp_id,
            MessageContent::plain("hi"),
            None,
        )
    }

    #[test]
    fn test_concurrent_duplicates_insert_once() {
        let chat = Chat::single(db(), contact("bob@example.org"));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let chat = chat.clone();
                std::thread::spawn(move || {
                    let resource = format!("bob@example.org/device{}", i);
                    chat.insert_message(incoming(&chat, &resource, "same-id")).is_some()
                })
            })
            .collect();
        let inserted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|added| *added)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(chat.messages().len(), 1);
    }

    #[test]
    fn test_duplicate_check_does_not_lock_messages() {
        let chat = Chat::single(db(), contact("bob@example.org"));
        let first = chat.insert_message(incoming(&chat, "bob@example.org", "m1")).unwrap();
        let _held = lock_message(&first);

        let (tx, rx) = std::sync::mpsc::channel();
        let inserter = chat.clone();
        std::thread::spawn(move || {
            let duplicate = inserter.insert_message(incoming(&inserter, "bob@example.org", "m1"));
            let other = inserter.insert_message(incoming(&inserter, "carol@example.org", "m1"));
            let _ = tx.send((duplicate.is_some(), other.is_some()));
        });

        let result = rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(result.ok(), Some((false, true)));
    }
}
