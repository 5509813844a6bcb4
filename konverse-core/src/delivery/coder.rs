// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message-level encryption and decryption.
//!
//! Applies envelope results onto messages and attachments. Cryptographic
//! failures never abort: they are recorded on the coder status.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::crypto::{CoderError, CoderStatus, Encryption};
use crate::envelope::{self, EncodeError, StanzaContent};
use crate::identity::{KeyDirectory, PersonalKey, PublicKeyRing};
use crate::model::{Attachment, Body, Message};

use super::error::DeliveryError;
use super::transport::{OutgoingEnvelope, Payload};

/// Envelopes for every recipient of an outgoing message, plus the errors
/// met while building them.
#[derive(Debug, Default)]
pub struct Encoded {
    pub envelopes: Vec<OutgoingEnvelope>,
    pub errors: BTreeSet<CoderError>,
}

/// Encrypts an outgoing message separately for each recipient not yet
/// handed to the transport.
///
/// Recipients whose key is missing or unusable are skipped and flagged.
pub fn encrypt_message(
    message: &Message,
    my_key: Option<&PersonalKey>,
    keys: &dyn KeyDirectory,
) -> Encoded {
    let mut encoded = Encoded::default();
    let Some(my_key) = my_key else {
        warn!(xmpp_id = message.xmpp_id(), "Can't encrypt, personal key not loaded");
        encoded.errors.insert(CoderError::MyKeyUnavailable);
        return encoded;
    };

    let content = StanzaContent {
        body: message.content().text().to_string(),
        attachment_url: message.content().attachment().map(|a| a.url.clone()),
    };

    for transmission in message.unsent_transmissions() {
        let Some(key) = keys.lookup_public_key(transmission.contact()) else {
            warn!(contact = %transmission.contact(), "No public key for recipient");
            encoded.errors.insert(CoderError::KeyUnavailable);
            continue;
        };

        let recipients = [key];
        let sealed = if content.attachment_url.is_some() {
            envelope::seal_stanza(&content, &recipients, my_key)
        } else {
            envelope::seal_text(&content.body, &recipients, my_key)
        };

        match sealed {
            Ok(data) => encoded.envelopes.push(OutgoingEnvelope {
                xmpp_id: message.xmpp_id().to_string(),
                recipient: transmission.address().clone(),
                payload: Payload::Encrypted(data),
                attachment_url: None,
            }),
            Err(EncodeError::InvalidKey(reason)) => {
                warn!(contact = %transmission.contact(), reason = %reason, "Invalid recipient key");
                encoded.errors.insert(CoderError::InvalidKey);
            }
            Err(e) => {
                warn!(contact = %transmission.contact(), error = %e, "Encryption failed");
                encoded.errors.insert(CoderError::UnknownError);
            }
        }
    }

    debug!(
        xmpp_id = message.xmpp_id(),
        envelopes = encoded.envelopes.len(),
        errors = encoded.errors.len(),
        "Encrypted message"
    );
    encoded
}

/// Decrypts an incoming message in place and returns the security errors.
///
/// Messages that are not encrypted are left alone.
pub fn decrypt_message(
    message: &mut Message,
    my_key: Option<&PersonalKey>,
    keys: &dyn KeyDirectory,
) -> BTreeSet<CoderError> {
    let Some(data) = message.content().encrypted_data().map(<[u8]>::to_vec) else {
        debug!(xmpp_id = message.xmpp_id(), "Message not encrypted");
        return BTreeSet::new();
    };

    let Some(my_key) = my_key else {
        warn!(xmpp_id = message.xmpp_id(), "Can't decrypt, personal key not loaded");
        let errors = BTreeSet::from([CoderError::MyKeyUnavailable]);
        message.set_decryption_failed(message.coder_status().signing(), errors.clone());
        return errors;
    };

    let sender_key = message
        .sender()
        .and_then(|sender| keys.lookup_public_key(&sender.to_bare()));
    let opened = envelope::open(&data, my_key, sender_key.as_ref());
    let errors = opened.errors.clone();

    match opened.content {
        Some(content) => {
            let attachment = content
                .attachment_url
                .as_deref()
                .map(|url| Attachment::remote(url, CoderStatus::encrypted()));
            let body = Body {
                text: content.body,
                attachment,
            };
            message.set_decrypted_content(body, opened.signing, opened.errors);
        }
        None => message.set_decryption_failed(opened.signing, opened.errors),
    }

    if errors.is_empty() {
        info!(xmpp_id = message.xmpp_id(), "Decrypted message");
    } else {
        warn!(xmpp_id = message.xmpp_id(), ?errors, "Decrypted message with errors");
    }
    errors
}

/// `<dir>/<stem><suffix>.<ext>` next to `encrypted`.
pub fn decrypted_path(encrypted: &Path, suffix: &str) -> PathBuf {
    let stem = encrypted
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match encrypted.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    encrypted.with_file_name(name)
}

/// Decrypts the downloaded attachment of `message` into a sibling file.
///
/// Returns the decrypted file, or `None` if the attachment was not
/// encrypted or could not be recovered (details in its coder status). An
/// existing output file is left alone and returned.
pub fn decrypt_attachment(
    message: &mut Message,
    my_key: Option<&PersonalKey>,
    keys: &dyn KeyDirectory,
    suffix: &str,
) -> Result<Option<PathBuf>, DeliveryError> {
    let attachment = message.content().attachment().ok_or(DeliveryError::NoAttachment)?;
    if attachment.coder_status.encryption() != Encryption::Encrypted {
        debug!(xmpp_id = message.xmpp_id(), "Attachment not encrypted");
        return Ok(None);
    }
    let input = attachment.file_name.clone().ok_or(DeliveryError::NotDownloaded)?;

    let output = decrypted_path(&input, suffix);
    if output.exists() {
        info!(path = %output.display(), "Decrypted attachment already exists");
        return Ok(Some(output));
    }

    let Some(my_key) = my_key else {
        message.update_attachment(|a| {
            a.coder_status
                .set_security_errors(BTreeSet::from([CoderError::MyKeyUnavailable]))
        });
        return Ok(None);
    };

    let data = fs::read(&input)?;
    let sender_key = message
        .sender()
        .and_then(|sender| keys.lookup_public_key(&sender.to_bare()));

    let mut writer = BufWriter::new(fs::File::create(&output)?);
    let mut result = envelope::decrypt_to(&data, my_key, sender_key.as_ref(), &mut writer);
    if let Err(e) = writer.flush() {
        warn!(error = %e, "Could not write decrypted attachment");
        result.errors.insert(CoderError::UnknownError);
        result.recovered = false;
    }
    drop(writer);

    if !result.recovered {
        if let Err(e) = fs::remove_file(&output) {
            warn!(error = %e, path = %output.display(), "Could not remove partial attachment");
        }
    }
    let length = fs::metadata(&output).map(|m| m.len()).ok();

    message.update_attachment(|a| {
        if result.recovered {
            a.coder_status.set_decrypted();
            a.file_name = Some(output.clone());
            if let Some(length) = length {
                a.length = length;
            }
        }
        if let Err(e) = a.coder_status.set_signing(result.signing) {
            warn!(error = %e, "Attachment signing transition rejected");
        }
        a.coder_status.set_security_errors(result.errors.clone());
    });

    Ok(result.recovered.then_some(output))
}

/// Encrypts a file for upload; the output is written atomically.
///
/// Returns the size of the encrypted file.
pub fn encrypt_attachment_file(
    input: &Path,
    output: &Path,
    recipients: &[PublicKeyRing],
    my_key: &PersonalKey,
) -> Result<u64, DeliveryError> {
    let data = fs::read(input)?;
    let encrypted = envelope::encrypt(&data, recipients, Some(my_key))?;

    let temp_path = output.with_extension("tmp");
    fs::write(&temp_path, &encrypted)?;
    fs::rename(&temp_path, output)?;
    Ok(encrypted.len() as u64)
}
