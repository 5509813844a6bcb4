// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Crypto Envelope
//!
//! Layered container exchanged over the wire: compress, sign, encrypt.
//! [`codec`] handles raw payloads (attachments); [`seal_text`],
//! [`seal_stanza`] and [`open`] add the CPIM layer used for message bodies.
//! Nothing here knows about messages or chats.

#[cfg(feature = "testing")]
pub mod packet;
#[cfg(not(feature = "testing"))]
mod packet;

pub mod codec;
pub mod cpim;
pub mod stanza;

use std::collections::BTreeSet;

use tracing::{debug, warn};

pub use codec::{decrypt, decrypt_to, encrypt, encrypt_with, Decryption, EncodeError, EncodeOptions};
pub use cpim::{CpimError, CpimMessage, MIME_TEXT, MIME_XMPP};
pub use stanza::{StanzaContent, StanzaError};

use crate::crypto::{CoderError, Signing};
use crate::identity::{PersonalKey, PublicKeyRing};

/// Encrypts a text body for `recipients`, signed by `sender`.
pub fn seal_text(
    text: &str,
    recipients: &[PublicKeyRing],
    sender: &PersonalKey,
) -> Result<Vec<u8>, EncodeError> {
    seal(MIME_TEXT, text, recipients, sender)
}

/// Encrypts a structured body (text plus attachment link).
pub fn seal_stanza(
    content: &StanzaContent,
    recipients: &[PublicKeyRing],
    sender: &PersonalKey,
) -> Result<Vec<u8>, EncodeError> {
    seal(MIME_XMPP, &content.to_xml(), recipients, sender)
}

fn seal(
    mime: &str,
    body: &str,
    recipients: &[PublicKeyRing],
    sender: &PersonalKey,
) -> Result<Vec<u8>, EncodeError> {
    let to: Vec<&str> = recipients.iter().map(|r| r.user_id()).collect();
    let cpim = CpimMessage::new(sender.user_id(), &to, mime, body);
    encrypt(cpim.to_text().as_bytes(), recipients, Some(sender))
}

/// A decrypted message body and its security verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Decoded content; `None` if the body could not be recovered.
    pub content: Option<StanzaContent>,
    pub signing: Signing,
    pub errors: BTreeSet<CoderError>,
}

impl Opened {
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().map(|c| c.body.as_str())
    }
}

/// Decrypts a message envelope and checks its CPIM binding.
///
/// The CPIM `To` header must name the local key's user id and `From` must
/// equal the sender key's user id (when a sender key is known).
pub fn open(envelope: &[u8], my_key: &PersonalKey, sender: Option<&PublicKeyRing>) -> Opened {
    let (plaintext, decryption) = decrypt(envelope, my_key, sender);
    let Decryption {
        signing,
        mut errors,
        recovered,
    } = decryption;

    if !recovered {
        return Opened {
            content: None,
            signing,
            errors,
        };
    }

    let text = String::from_utf8_lossy(&plaintext);
    let cpim = match CpimMessage::parse(&text) {
        Ok(cpim) => cpim,
        Err(e) => {
            warn!(error = %e, "Can't find valid CPIM data");
            errors.insert(CoderError::InvalidData);
            return Opened {
                content: None,
                signing,
                errors,
            };
        }
    };

    if !cpim.is_addressed_to(my_key.user_id()) {
        warn!("Destination does not match personal key");
        errors.insert(CoderError::InvalidRecipient);
    }
    if let Some(key) = sender {
        if key.user_id() != cpim.from {
            warn!("Sender doesn't match sender's key");
            errors.insert(CoderError::InvalidSender);
        }
    }

    let content = if cpim.is_stanza() {
        match StanzaContent::parse(&cpim.body) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(error = %e, "Can't parse stanza");
                errors.insert(CoderError::InvalidData);
                None
            }
        }
    } else {
        Some(StanzaContent::text(&cpim.body))
    };

    debug!(signing = ?signing, errors = errors.len(), "Envelope opened");
    Opened {
        content,
        signing,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_checks_recipient_uid() {
        let alice = PersonalKey::generate("alice@example.org");
        // same key material, different uid
        let carol = PersonalKey::from_seed("carol@example.org", &[5u8; 32]);
        let bob = PersonalKey::from_seed("bob@example.org", &[5u8; 32]);

        let envelope = seal_text("hi", &[carol.public_key_ring()], &alice).unwrap();
        let opened = open(&envelope, &bob, Some(&alice.public_key_ring()));
        assert_eq!(opened.text(), Some("hi"));
        assert_eq!(opened.errors, BTreeSet::from([CoderError::InvalidRecipient]));
    }

    #[test]
    fn test_open_rejects_recipient_uid_containing_mine() {
        let alice = PersonalKey::generate("alice@example.org");
        let robob = PersonalKey::from_seed("robob@example.org", &[7u8; 32]);
        let bob = PersonalKey::from_seed("bob@example.org", &[7u8; 32]);

        let envelope = seal_text("hi", &[robob.public_key_ring()], &alice).unwrap();
        let opened = open(&envelope, &bob, Some(&alice.public_key_ring()));
        assert_eq!(opened.text(), Some("hi"));
        assert_eq!(opened.errors, BTreeSet::from([CoderError::InvalidRecipient]));
    }

    #[test]
    fn test_open_checks_sender_uid() {
        let alice = PersonalKey::from_seed("alice@example.org", &[6u8; 32]);
        let renamed = PersonalKey::from_seed("mallory@example.org", &[6u8; 32]);
        let bob = PersonalKey::generate("bob@example.org");

        let envelope = seal_text("hi", &[bob.public_key_ring()], &renamed).unwrap();
        let opened = open(&envelope, &bob, Some(&alice.public_key_ring()));
        assert_eq!(opened.signing, Signing::Verified);
        assert_eq!(opened.errors, BTreeSet::from([CoderError::InvalidSender]));
    }

    #[test]
    fn test_stanza_body_extracted() {
        let alice = PersonalKey::generate("alice@example.org");
        let bob = PersonalKey::generate("bob@example.org");
        let content = StanzaContent {
            body: "see attached".to_string(),
            attachment_url: Some("https://files.example.org/x.png".to_string()),
        };

        let envelope = seal_stanza(&content, &[bob.public_key_ring()], &alice).unwrap();
        let opened = open(&envelope, &bob, Some(&alice.public_key_ring()));
        assert_eq!(opened.content, Some(content));
        assert!(opened.errors.is_empty());
    }

    #[test]
    fn test_non_cpim_plaintext_is_invalid_data() {
        let alice = PersonalKey::generate("alice@example.org");
        let bob = PersonalKey::generate("bob@example.org");

        let envelope = encrypt(b"raw bytes", &[bob.public_key_ring()], Some(&alice)).unwrap();
        let opened = open(&envelope, &bob, Some(&alice.public_key_ring()));
        assert!(opened.content.is_none());
        assert_eq!(opened.errors, BTreeSet::from([CoderError::InvalidData]));
    }
}
