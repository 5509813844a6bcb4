// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event System
//!
//! Change notifications for messages and chats. Each aggregate owns (or
//! shares) an [`EventDispatcher`]; the embedding layer subscribes handlers.

use std::sync::{Arc, RwLock};

use crate::identity::Jid;

use super::message::Status;

/// Events emitted by a [`Message`](super::Message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    /// Delivery status changed.
    StatusChanged {
        message_id: i64,
        xmpp_id: String,
        status: Status,
    },

    /// A recipient acknowledged the message.
    Received {
        message_id: i64,
        xmpp_id: String,
        contact: Jid,
    },

    /// Encryption, signing or security errors changed.
    CoderStatusChanged { message_id: i64, xmpp_id: String },

    /// Content was replaced (decrypted, attachment updated).
    ContentChanged { message_id: i64, xmpp_id: String },

    /// The server reported a delivery failure.
    ServerError {
        message_id: i64,
        xmpp_id: String,
        condition: String,
        text: String,
    },
}

/// Events emitted by a [`Chat`](super::Chat).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageAdded { chat_id: i64, xmpp_id: String },
    ReadChanged { chat_id: i64, unread: bool },
    MembersChanged { chat_id: i64 },
    SubjectChanged { chat_id: i64, subject: String },
}

/// Event handler trait.
pub trait EventHandler<E>: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: E);
}

/// Simple callback-based event handler.
pub struct CallbackHandler<F> {
    callback: F,
}

impl<F> CallbackHandler<F> {
    /// Creates a new callback handler.
    pub fn new(callback: F) -> Self {
        CallbackHandler { callback }
    }
}

impl<E, F> EventHandler<E> for CallbackHandler<F>
where
    F: Fn(E) + Send + Sync,
{
    fn on_event(&self, event: E) {
        (self.callback)(event);
    }
}

/// Event dispatcher for managing multiple handlers.
///
/// Handlers can be added through a shared reference so one dispatcher can
/// be handed to every message of a chat.
pub struct EventDispatcher<E> {
    handlers: RwLock<Vec<Arc<dyn EventHandler<E>>>>,
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        EventDispatcher {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventDispatcher<E> {
    /// Creates a new event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event handler.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler<E>>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }

    /// Removes all handlers.
    pub fn clear_handlers(&self) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.clear();
        }
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Dispatches an event to all handlers.
    pub fn dispatch(&self, event: E) {
        // Snapshot so handlers may register further handlers.
        let handlers: Vec<_> = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };
        for handler in &handlers {
            handler.on_event(event.clone());
        }
    }
}
