// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Delivery
//!
//! Fans an outgoing message out to one envelope per recipient, hands the
//! envelopes to the [`Transport`], and folds acknowledgements back onto the
//! message. Incoming envelopes are stored and decrypted on a background
//! [`Worker`].

#[cfg(feature = "testing")]
pub mod coder;
#[cfg(not(feature = "testing"))]
mod coder;

mod error;
mod orchestrator;
mod transport;
mod worker;

use std::collections::BTreeSet;
use std::path::PathBuf;

pub use coder::{decrypted_path, encrypt_attachment_file};
pub use error::DeliveryError;
pub use orchestrator::DeliveryOrchestrator;
pub use transport::{
    IncomingEnvelope, MockTransport, OutgoingEnvelope, Payload, Transport, TransportError,
    TransportResult,
};
pub use worker::{Job, Worker};

use crate::crypto::CoderError;
use crate::identity::Jid;

/// Events emitted by the [`DeliveryOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// An incoming message was stored.
    MessageReceived { chat_id: i64, xmpp_id: String },

    /// The worker finished decrypting a message body.
    DecryptionFinished {
        xmpp_id: String,
        errors: BTreeSet<CoderError>,
    },

    /// The worker wrote a decrypted attachment.
    AttachmentDecrypted { xmpp_id: String, path: PathBuf },

    /// Decryption suggests the contact's key is missing or outdated.
    KeyRequested { contact: Jid },
}
