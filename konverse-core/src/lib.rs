// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Konverse Core Library
//!
//! Secure end-to-end message delivery for the Konverse desktop client:
//! the layered crypto envelope, per-recipient delivery tracking and the
//! message/chat state that ties them together.
//! All signing, hashing and key derivation use the audited `ring` crate.

pub mod config;
pub mod crypto;
pub mod delivery;
pub mod envelope;
pub mod identity;
pub mod logging;
pub mod model;
pub mod storage;

pub use config::{ConfigError, CoreConfig};
pub use crypto::{CoderError, CoderStatus, Encryption, Signing};
pub use delivery::{
    DeliveryError, DeliveryEvent, DeliveryOrchestrator, IncomingEnvelope, MockTransport,
    OutgoingEnvelope, Payload, Transport, TransportError,
};
pub use envelope::{open, seal_stanza, seal_text, EncodeError, Opened};
pub use identity::{Jid, KeyDirectory, MemoryKeyDirectory, PersonalKey, PublicKeyRing};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel, LoggingError};
pub use model::{
    Attachment, Body, Chat, ChatError, ChatEvent, ChatKind, Contact, Member, Message,
    MessageContent, MessageEvent, MessageHandle, Role, Status, Transmission,
};
pub use storage::{Persistence, SqliteStore, StorageError, INVALID_ID};
