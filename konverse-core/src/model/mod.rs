// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Messaging Model
//!
//! Chats, messages, their per-recipient transmissions, and the events they
//! emit. Every state change is written through [`Persistence`](crate::storage::Persistence)
//! as it happens.

mod chat;
mod contact;
mod content;
mod events;
mod message;
mod transmission;

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub use chat::{Chat, ChatError, ChatKind};
pub use contact::{Contact, Member, Role};
pub use content::{Attachment, Body, MessageContent};
pub use events::{CallbackHandler, ChatEvent, EventDispatcher, EventHandler, MessageEvent};
pub use message::{generate_xmpp_id, Message, ServerError, Status};
pub use transmission::Transmission;

/// Shared, individually locked message.
pub type MessageHandle = Arc<Mutex<Message>>;

pub(crate) fn handle(message: Message) -> MessageHandle {
    Arc::new(Mutex::new(message))
}

/// Locks a message for reading or a state transition.
///
/// Events raised while the lock is held are dispatched once it is
/// released, so handlers may lock the message again.
pub fn lock_message(handle: &MessageHandle) -> MessageGuard<'_> {
    MessageGuard {
        message: handle.lock().expect("message lock poisoned"),
        pending: PendingEvents::default(),
    }
}

/// Exclusive access to a message. See [`lock_message`].
pub struct MessageGuard<'a> {
    // dropped before `pending`: unlock first, then dispatch
    message: MutexGuard<'a, Message>,
    pending: PendingEvents,
}

impl Deref for MessageGuard<'_> {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl DerefMut for MessageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

impl Drop for MessageGuard<'_> {
    fn drop(&mut self) {
        let events = self.message.take_events();
        if !events.is_empty() {
            self.pending = PendingEvents {
                dispatcher: Some(self.message.event_dispatcher().clone()),
                events,
            };
        }
    }
}

#[derive(Default)]
struct PendingEvents {
    dispatcher: Option<Arc<EventDispatcher<MessageEvent>>>,
    events: Vec<MessageEvent>,
}

impl Drop for PendingEvents {
    fn drop(&mut self) {
        if let Some(dispatcher) = &self.dispatcher {
            for event in self.events.drain(..) {
                dispatcher.dispatch(event);
            }
        }
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
