// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Aggregation Tests

mod common;

use std::sync::{Arc, Mutex};

use common::fixtures::*;
use common::helpers::*;
use konverse_core::model::{lock_message, CallbackHandler};
use konverse_core::storage::Persistence;
use konverse_core::{
    Body, Chat, ChatError, ChatEvent, ChatKind, Contact, Jid, Member, Message, MessageContent,
    MessageHandle, Role,
};

fn incoming(chat: &Chat, sender: &Jid, xmpp_id: &str, text: &str) -> Option<MessageHandle> {
    let message = Message::incoming(
        chat.persistence().clone(),
        chat.message_events().clone(),
        chat.id(),
        sender,
        xmpp_id,
        MessageContent::plain(text),
        None,
    );
    chat.insert_message(message)
}

fn member(jid: Jid) -> Member {
    let name = jid.local().to_string();
    Member::new(Contact::new(jid, &name), Role::Member)
}

#[test]
fn test_mixed_key_availability() {
    let bob = Contact::new(bob(), "Bob").with_key(&bob_key().public_key_ring());
    let carol = Contact::new(carol(), "Carol").with_encryption(true);
    let chat = Chat::group(
        memory_store(),
        "g@groups.example.org",
        "Mixed",
        vec![Member::new(bob, Role::Owner), Member::new(carol, Role::Member)],
    );

    assert!(chat.is_send_encrypted());
    assert!(!chat.can_send_encrypted());
}

#[test]
fn test_invalid_members_do_not_count() {
    let bob = Contact::new(bob(), "Bob").with_key(&bob_key().public_key_ring());
    let mut carol = Contact::new(carol(), "Carol").with_encryption(true);
    carol.set_blocked(true);
    let me = Contact::me(alice()).with_encryption(true);
    let chat = Chat::group(
        memory_store(),
        "g@groups.example.org",
        "Filtered",
        vec![
            Member::new(bob, Role::Member),
            Member::new(carol, Role::Member),
            Member::new(me, Role::Owner),
        ],
    );

    let valid: Vec<Jid> = chat.valid_members().iter().map(|m| m.contact.jid().clone()).collect();
    assert_eq!(valid, vec![common::fixtures::bob()]);
    assert!(chat.is_valid());
    assert!(chat.is_send_encrypted());
    assert!(chat.can_send_encrypted());
}

#[test]
fn test_nobody_wants_encryption() {
    let chat = Chat::single(memory_store(), Contact::new(bob(), "Bob"));
    assert!(!chat.is_send_encrypted());
    assert!(!chat.can_send_encrypted());
    assert!(chat.is_valid());
}

#[test]
fn test_deleted_contact_invalidates_single_chat() {
    let mut bob = Contact::new(bob(), "Bob");
    bob.set_deleted(true);
    let chat = Chat::single(memory_store(), bob);
    assert!(!chat.is_valid());
    assert!(!chat.can_send_encrypted());
}

#[test]
fn test_duplicate_incoming_rejected() {
    let chat = Chat::group(
        memory_store(),
        "g@groups.example.org",
        "Dups",
        vec![member(bob()), member(carol())],
    );

    assert!(incoming(&chat, &bob_phone(), "m1", "first").is_some());
    assert!(incoming(&chat, &bob(), "m1", "again").is_none());
    // same id from another sender is a different message
    assert!(incoming(&chat, &carol(), "m1", "other").is_some());
    assert_eq!(chat.messages().len(), 2);
}

#[test]
fn test_outgoing_not_confused_with_incoming() {
    let chat = Chat::single(memory_store(), Contact::new(bob(), "Bob"));
    let outgoing = Message::outgoing(
        chat.persistence().clone(),
        chat.message_events().clone(),
        chat.id(),
        &[bob()],
        Body::text("ping"),
        false,
    );
    let xmpp_id = outgoing.xmpp_id().to_string();
    assert!(chat.add_message(outgoing));
    assert!(incoming(&chat, &bob(), &xmpp_id, "echo").is_some());
    assert_eq!(chat.messages().len(), 2);
}

#[test]
fn test_unread_tracking() {
    let chat = Chat::single(memory_store(), Contact::new(bob(), "Bob"));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    chat.events()
        .add_handler(Arc::new(CallbackHandler::new(move |e: ChatEvent| {
            sink.lock().unwrap().push(e)
        })));

    incoming(&chat, &bob(), "a", "one");
    incoming(&chat, &bob(), "b", "two");
    assert!(chat.unread());
    assert_eq!(chat.unread_count(), 2);

    chat.set_read();
    assert!(!chat.unread());
    assert_eq!(chat.unread_count(), 0);

    // nothing left to mark
    chat.set_read();

    let events = events.lock().unwrap();
    let read_changes: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ReadChanged { unread, .. } => Some(*unread),
            _ => None,
        })
        .collect();
    assert_eq!(read_changes, vec![true, true, false]);
}

#[test]
fn test_lookup_by_wire_id() {
    let chat = Chat::single(memory_store(), Contact::new(bob(), "Bob"));
    incoming(&chat, &bob(), "x1", "hello");
    incoming(&chat, &bob(), "x2", "world");

    let found = chat.message_by_xmpp_id("x1").unwrap();
    assert_eq!(lock_message(&found).content().text(), "hello");
    assert!(chat.message_by_xmpp_id("nope").is_none());

    let last = chat.last_message().unwrap();
    assert_eq!(lock_message(&last).xmpp_id(), "x2");
}

#[test]
fn test_membership_errors() {
    let single = Chat::single(memory_store(), Contact::new(bob(), "Bob"));
    assert!(matches!(
        single.add_member(Contact::new(carol(), "Carol"), Role::Member),
        Err(ChatError::SingleChatMember)
    ));
    assert!(matches!(single.set_subject("nope"), Err(ChatError::NotAGroup)));

    let group = Chat::group(memory_store(), "g@groups.example.org", "G", vec![member(bob())]);
    assert!(matches!(
        group.remove_member(&carol()),
        Err(ChatError::UnknownMember(_))
    ));
}

#[test]
fn test_group_changes_survive_reload() {
    let db = memory_store();
    let group = Chat::group(db.clone(), "g@groups.example.org", "Before", vec![member(bob())]);

    group.add_member(Contact::new(carol(), "Carol"), Role::Admin).unwrap();
    group.add_member(Contact::new(bob(), "Bob"), Role::Owner).unwrap();
    group.set_subject("After").unwrap();
    incoming(&group, &carol(), "g1", "hi all");

    let reloaded = Chat::load(db, group.id()).unwrap().unwrap();
    assert_eq!(reloaded.subject().as_deref(), Some("After"));
    assert!(matches!(reloaded.kind(), ChatKind::Group { .. }));

    let roles: Vec<(Jid, Role)> = reloaded
        .members()
        .iter()
        .map(|m| (m.contact.jid().clone(), m.role))
        .collect();
    assert_eq!(roles, vec![(bob(), Role::Owner), (carol(), Role::Admin)]);
    assert_eq!(reloaded.messages().len(), 1);
}

#[test]
fn test_delete_removes_everything() {
    let db = memory_store();
    let chat = Chat::single(db.clone(), Contact::new(bob(), "Bob"));
    incoming(&chat, &bob(), "d1", "bye");
    let id = chat.id();

    chat.delete().unwrap();
    assert!(Chat::load(db.clone(), id).unwrap().is_none());
    assert!(Chat::load_all(db).unwrap().is_empty());
}

#[test]
fn test_unpersisted_store_still_holds_messages() {
    let db: Arc<dyn Persistence> = Arc::new(FailingPersistence);
    let chat = Chat::single(db, Contact::new(bob(), "Bob"));
    assert!(!chat.is_persisted());
    assert!(incoming(&chat, &bob(), "o1", "in memory").is_some());
    assert_eq!(chat.unread_count(), 1);
}
