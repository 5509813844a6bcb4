// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Delivery Orchestrator
//!
//! Owns the chat registry and the collaborators (store, transport, key
//! directory, personal key). Outgoing messages are encrypted per recipient
//! and handed to the transport; the transport layer reports back through
//! [`DeliveryOrchestrator::handle_sent`], [`DeliveryOrchestrator::handle_receipt`]
//! and [`DeliveryOrchestrator::handle_error`], all safe to call repeatedly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::crypto::{CoderStatus, Encryption};
use crate::identity::{Jid, KeyDirectory, PersonalKey};
use crate::model::{
    lock_message, now_millis, Attachment, Body, Chat, ChatKind, Contact, EventDispatcher, Member,
    Message, MessageContent, MessageHandle, Status,
};
use crate::storage::{Persistence, StorageError};

use super::coder;
use super::error::DeliveryError;
use super::transport::{IncomingEnvelope, OutgoingEnvelope, Payload, Transport, TransportError};
use super::worker::{Job, KeySlot, Worker, WorkerContext};
use super::DeliveryEvent;

/// Condition recorded when no envelope could be built.
const ENCRYPTION_CONDITION: &str = "encryption";
/// Condition recorded when the transport refused an envelope.
const TRANSPORT_CONDITION: &str = "transport";

/// Coordinates sending, receiving and acknowledgement handling.
pub struct DeliveryOrchestrator<T: Transport> {
    config: CoreConfig,
    key: KeySlot,
    keys: Arc<dyn KeyDirectory>,
    db: Arc<dyn Persistence>,
    transport: T,
    chats: RwLock<Vec<Arc<Chat>>>,
    /// Outgoing messages being handed to the transport or awaiting the
    /// server's acceptance.
    in_flight: Mutex<HashMap<String, MessageHandle>>,
    worker: Worker,
    events: Arc<EventDispatcher<DeliveryEvent>>,
}

impl<T: Transport> DeliveryOrchestrator<T> {
    /// Loads the stored chats and starts the background worker.
    pub fn new(
        config: CoreConfig,
        db: Arc<dyn Persistence>,
        transport: T,
        keys: Arc<dyn KeyDirectory>,
    ) -> Result<Self, DeliveryError> {
        let chats = Chat::load_all(db.clone())?;
        let key: KeySlot = Arc::new(RwLock::new(None));
        let events = Arc::new(EventDispatcher::new());

        let worker = Worker::spawn(WorkerContext {
            key: key.clone(),
            keys: keys.clone(),
            events: events.clone(),
            attachment_suffix: config.attachment_suffix.clone(),
        })?;

        info!(chats = chats.len(), "Delivery orchestrator started");
        Ok(DeliveryOrchestrator {
            config,
            key,
            keys,
            db,
            transport,
            chats: RwLock::new(chats),
            in_flight: Mutex::new(HashMap::new()),
            worker,
            events,
        })
    }

    /// Loads (or replaces) the personal key.
    pub fn set_personal_key(&self, key: PersonalKey) {
        info!(fingerprint = %key.fingerprint(), "Personal key loaded");
        *self.key.write().expect("key lock poisoned") = Some(Arc::new(key));
    }

    pub fn clear_personal_key(&self) {
        *self.key.write().expect("key lock poisoned") = None;
    }

    pub fn has_personal_key(&self) -> bool {
        self.key.read().expect("key lock poisoned").is_some()
    }

    fn personal_key(&self) -> Option<Arc<PersonalKey>> {
        self.key.read().expect("key lock poisoned").clone()
    }

    pub fn events(&self) -> &EventDispatcher<DeliveryEvent> {
        &self.events
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // chat registry

    pub fn chats(&self) -> Vec<Arc<Chat>> {
        self.chats.read().expect("chat registry poisoned").clone()
    }

    /// The single chat with `jid`, if there is one.
    pub fn chat_for(&self, jid: &Jid) -> Option<Arc<Chat>> {
        find_single(&self.chats.read().expect("chat registry poisoned"), jid)
    }

    /// The single chat with `jid`, created (with a new contact) if needed.
    pub fn find_or_create_single(&self, jid: &Jid) -> Arc<Chat> {
        let mut chats = self.chats.write().expect("chat registry poisoned");
        if let Some(chat) = find_single(&chats, jid) {
            return chat;
        }

        let mut contact =
            Contact::new(jid.clone(), jid.local()).with_encryption(self.config.encrypt_by_default);
        contact.set_key(self.keys.lookup_public_key(&jid.to_bare()).as_ref());
        let chat = Chat::single(self.db.clone(), contact);
        chats.push(chat.clone());
        chat
    }

    pub fn create_group(&self, group_id: &str, subject: &str, members: Vec<Member>) -> Arc<Chat> {
        let chat = Chat::group(self.db.clone(), group_id, subject, members);
        self.chats
            .write()
            .expect("chat registry poisoned")
            .push(chat.clone());
        chat
    }

    /// Removes a chat from the registry and the store.
    pub fn delete_chat(&self, chat: &Arc<Chat>) -> Result<(), StorageError> {
        self.chats
            .write()
            .expect("chat registry poisoned")
            .retain(|c| !Arc::ptr_eq(c, chat));

        // messages are locked only after the in-flight map is released
        let chat_id = chat.id();
        let in_flight: Vec<(String, MessageHandle)> = self
            .in_flight
            .lock()
            .expect("mutex poisoned")
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();
        for (xmpp_id, handle) in in_flight {
            if lock_message(&handle).chat_id() == chat_id {
                self.forget(&xmpp_id);
            }
        }
        chat.delete()
    }

    /// Re-reads the key of `jid` from the directory into every chat member.
    pub fn refresh_contact_key(&self, jid: &Jid) {
        let key = self.keys.lookup_public_key(&jid.to_bare());
        for chat in self.chats() {
            for member in chat.members() {
                if member.contact.jid() != jid {
                    continue;
                }
                let mut contact = member.contact;
                contact.set_key(key.as_ref());
                if let Err(e) = chat.update_contact(contact) {
                    warn!(error = %e, "Could not update contact key");
                }
            }
        }
    }

    // outgoing

    /// Creates a message for the chat's valid members and submits it.
    ///
    /// Encryption is requested when any member wants it.
    pub fn send_message(&self, chat: &Arc<Chat>, body: Body) -> Result<MessageHandle, DeliveryError> {
        let recipients: Vec<Jid> = chat
            .valid_members()
            .into_iter()
            .map(|m| m.contact.jid().clone())
            .collect();
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let encrypt = chat.is_send_encrypted();
        if encrypt && !chat.can_send_encrypted() {
            warn!(chat_id = chat.id(), "Not every member has a key, some will be skipped");
        }

        let message = Message::outgoing(
            chat.persistence().clone(),
            chat.message_events().clone(),
            chat.id(),
            &recipients,
            body,
            encrypt,
        );
        let handle = chat
            .insert_message(message)
            .ok_or(DeliveryError::DuplicateMessage)?;
        self.submit(&handle)?;
        Ok(handle)
    }

    /// Encodes a pending message and hands it to the transport.
    ///
    /// Returns `true` if envelopes were handed over. Messages already in
    /// flight are not sent twice, and recipients the transport already
    /// accepted are skipped. Disconnected transports leave the message
    /// pending; any other transport error fails the message.
    pub fn submit(&self, handle: &MessageHandle) -> Result<bool, DeliveryError> {
        let xmpp_id = lock_message(handle).xmpp_id().to_string();

        // Registered first so an early acknowledgement finds the message.
        // The in-flight map and a message lock are never held together.
        if !self.claim(&xmpp_id, handle) {
            debug!(xmpp_id = %xmpp_id, "Already handed to transport");
            return Ok(false);
        }

        let envelopes = {
            let mut message = lock_message(handle);
            if message.status() != Status::Pending {
                debug!(xmpp_id = %xmpp_id, status = %message.status(), "Not pending, not sending");
                None
            } else if !self.transport.is_connected() {
                debug!(xmpp_id = %xmpp_id, "Not connected, message stays pending");
                None
            } else {
                self.build_envelopes(&mut message)
            }
        };
        let envelopes = match envelopes {
            Some(envelopes) if !envelopes.is_empty() => envelopes,
            _ => {
                self.forget(&xmpp_id);
                return Ok(false);
            }
        };

        for envelope in &envelopes {
            match self.transport.send(envelope) {
                Ok(()) => {
                    debug!(xmpp_id = %xmpp_id, recipient = %envelope.recipient, "Envelope sent");
                    lock_message(handle).mark_sent_to(&envelope.recipient);
                }
                Err(TransportError::NotConnected) => {
                    info!(xmpp_id = %xmpp_id, "Disconnected while sending, message stays pending");
                    self.forget(&xmpp_id);
                    return Ok(false);
                }
                Err(e) => {
                    warn!(xmpp_id = %xmpp_id, error = %e, "Transport refused envelope");
                    self.forget(&xmpp_id);
                    lock_message(handle).fail(TRANSPORT_CONDITION, &e.to_string());
                    return Err(e.into());
                }
            }
        }
        Ok(true)
    }

    /// Builds one envelope per recipient not yet sent to. `None` if the
    /// message failed.
    fn build_envelopes(&self, message: &mut Message) -> Option<Vec<OutgoingEnvelope>> {
        if message.unsent_transmissions().next().is_none() {
            debug!(xmpp_id = message.xmpp_id(), "Every recipient already sent to");
            return Some(Vec::new());
        }
        let partly_sent = message.transmissions().iter().any(|t| t.is_sent());

        let encryption = message.coder_status().encryption();
        if !matches!(encryption, Encryption::ToEncrypt | Encryption::Encrypted) {
            let text = message.content().text().to_string();
            let url = message.content().attachment().map(|a| a.url.clone());
            return Some(
                message
                    .unsent_transmissions()
                    .map(|t| OutgoingEnvelope {
                        xmpp_id: message.xmpp_id().to_string(),
                        recipient: t.address().clone(),
                        payload: Payload::Plain(text.clone()),
                        attachment_url: url.clone(),
                    })
                    .collect(),
            );
        }

        let key = self.personal_key();
        let encoded = coder::encrypt_message(message, key.as_deref(), &*self.keys);
        let mut errors = encoded.errors;
        if partly_sent {
            // keep what the earlier attempt found about the other recipients
            errors.extend(message.coder_status().errors().iter().copied());
        }

        if encoded.envelopes.is_empty() {
            message.set_security_errors(errors);
            if partly_sent {
                warn!(xmpp_id = message.xmpp_id(), "Remaining recipients could not be encrypted for");
                return Some(Vec::new());
            }
            message.fail(
                ENCRYPTION_CONDITION,
                "message could not be encrypted for any recipient",
            );
            return None;
        }

        // a resend after a disconnect re-encrypts an already encrypted message
        if encryption == Encryption::ToEncrypt {
            message.set_encrypted(true);
        }
        message.set_security_errors(errors);
        Some(encoded.envelopes)
    }

    /// Re-submits every pending message of `chat`. Returns how many were
    /// handed to the transport.
    pub fn send_pending(&self, chat: &Chat) -> Result<usize, DeliveryError> {
        let mut sent = 0;
        for handle in chat.pending_messages() {
            if self.submit(&handle)? {
                sent += 1;
            }
        }
        info!(chat_id = chat.id(), sent, "Resent pending messages");
        Ok(sent)
    }

    /// [`DeliveryOrchestrator::send_pending`] for every chat, e.g. after reconnecting.
    pub fn send_all_pending(&self) -> Result<usize, DeliveryError> {
        let mut sent = 0;
        for chat in self.chats() {
            sent += self.send_pending(&chat)?;
        }
        Ok(sent)
    }

    /// Returns the file to upload for an attachment in `chat`.
    ///
    /// When the chat encrypts and every member has a key, an encrypted copy
    /// is written to the attachment directory; otherwise the file itself is
    /// uploaded.
    pub fn prepare_upload(&self, chat: &Chat, file: &Path) -> Result<(PathBuf, CoderStatus), DeliveryError> {
        if !(chat.is_send_encrypted() && chat.can_send_encrypted()) {
            return Ok((file.to_path_buf(), CoderStatus::insecure()));
        }
        let my_key = self.personal_key().ok_or(DeliveryError::NoPersonalKey)?;
        let recipients: Vec<_> = chat
            .valid_members()
            .iter()
            .filter_map(|m| self.keys.lookup_public_key(m.contact.jid()))
            .collect();

        fs::create_dir_all(&self.config.attachment_dir)?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let output = self.config.attachment_dir.join(format!("{}.enc", name));
        coder::encrypt_attachment_file(file, &output, &recipients, &my_key)?;

        let mut status = CoderStatus::to_encrypt();
        status.set_encrypted();
        Ok((output, status))
    }

    // acknowledgements

    /// The server accepted the message.
    pub fn handle_sent(&self, xmpp_id: &str) -> bool {
        let Some(handle) = self.find_outgoing(xmpp_id) else {
            warn!(xmpp_id, "Sent acknowledgement for unknown message");
            return false;
        };
        lock_message(&handle).set_status(Status::Sent);
        // receipts find it through its chat from now on
        self.forget(xmpp_id);
        true
    }

    /// `from` acknowledged delivery. Returns `false` for unknown or repeated receipts.
    pub fn handle_receipt(&self, xmpp_id: &str, from: &Jid) -> bool {
        let Some(handle) = self.find_outgoing(xmpp_id) else {
            warn!(xmpp_id, "Receipt for unknown message");
            return false;
        };
        let (changed, terminal) = {
            let mut message = lock_message(&handle);
            let changed = message.set_received(from, now_millis());
            (changed, message.status().is_terminal())
        };
        if terminal {
            self.forget(xmpp_id);
        }
        changed
    }

    /// The server reported a delivery failure.
    pub fn handle_error(&self, xmpp_id: &str, condition: &str, text: &str) -> bool {
        let Some(handle) = self.find_outgoing(xmpp_id) else {
            warn!(xmpp_id, condition, "Error for unknown message");
            return false;
        };
        lock_message(&handle).set_server_error(condition, text);
        self.forget(xmpp_id);
        true
    }

    fn forget(&self, xmpp_id: &str) {
        self.in_flight.lock().expect("mutex poisoned").remove(xmpp_id);
    }

    fn find_outgoing(&self, xmpp_id: &str) -> Option<MessageHandle> {
        if let Some(handle) = self.in_flight.lock().expect("mutex poisoned").get(xmpp_id) {
            return Some(handle.clone());
        }
        self.chats().iter().find_map(|chat| {
            chat.messages().into_iter().rev().find(|h| {
                let message = lock_message(h);
                message.is_outgoing() && message.xmpp_id() == xmpp_id
            })
        })
    }

    /// Registers the message as in flight. `false` if it already was.
    fn claim(&self, xmpp_id: &str, handle: &MessageHandle) -> bool {
        let mut in_flight = self.in_flight.lock().expect("mutex poisoned");
        if in_flight.contains_key(xmpp_id) {
            return false;
        }
        in_flight.insert(xmpp_id.to_string(), handle.clone());
        true
    }

    /// Number of messages handed to the transport and not yet accepted.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("mutex poisoned").len()
    }

    // incoming

    /// Stores an incoming envelope and queues its decryption.
    ///
    /// Returns `None` for a duplicate.
    pub fn on_envelope_received(
        &self,
        envelope: IncomingEnvelope,
    ) -> Result<Option<MessageHandle>, DeliveryError> {
        let chat = self.find_or_create_single(&envelope.sender);
        let content = match envelope.payload {
            Payload::Encrypted(data) => MessageContent::Encrypted(data),
            Payload::Plain(text) => MessageContent::Plain(Body {
                text,
                attachment: envelope
                    .attachment_url
                    .as_deref()
                    .map(|url| Attachment::remote(url, CoderStatus::insecure())),
            }),
        };
        let encrypted = content.is_encrypted();

        let message = Message::incoming(
            chat.persistence().clone(),
            chat.message_events().clone(),
            chat.id(),
            &envelope.sender,
            &envelope.xmpp_id,
            content,
            envelope.server_date,
        );
        let Some(handle) = chat.insert_message(message) else {
            debug!(xmpp_id = %envelope.xmpp_id, "Dropping duplicate envelope");
            return Ok(None);
        };

        info!(xmpp_id = %envelope.xmpp_id, sender = %envelope.sender, encrypted, "Message received");
        self.events.dispatch(DeliveryEvent::MessageReceived {
            chat_id: chat.id(),
            xmpp_id: envelope.xmpp_id,
        });
        if encrypted {
            self.worker.enqueue(Job::DecryptMessage(handle.clone()))?;
        }
        Ok(Some(handle))
    }

    /// Queues another decryption attempt, e.g. after a key refresh.
    pub fn retry_decryption(&self, handle: &MessageHandle) -> Result<bool, DeliveryError> {
        if !lock_message(handle).coder_status().is_encrypted() {
            return Ok(false);
        }
        self.worker.enqueue(Job::DecryptMessage(handle.clone()))?;
        Ok(true)
    }

    /// Queues decryption of a downloaded attachment.
    pub fn decrypt_attachment(&self, handle: &MessageHandle) -> Result<(), DeliveryError> {
        {
            let message = lock_message(handle);
            let attachment = message.content().attachment().ok_or(DeliveryError::NoAttachment)?;
            if !attachment.is_downloaded() {
                return Err(DeliveryError::NotDownloaded);
            }
        }
        self.worker.enqueue(Job::DecryptAttachment(handle.clone()))
    }

    /// Finishes queued background jobs and stops the worker.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}

fn find_single(chats: &[Arc<Chat>], jid: &Jid) -> Option<Arc<Chat>> {
    chats
        .iter()
        .find(|chat| {
            chat.kind() == ChatKind::Single
                && chat.members().first().map(|m| m.contact.jid() == jid).unwrap_or(false)
        })
        .cloned()
}
