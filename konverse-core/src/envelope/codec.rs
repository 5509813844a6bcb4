// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Envelope Codec
//!
//! Encrypt: compress, one-pass sign, encrypt once with a random session key,
//! then wrap the session key for every recipient (ephemeral X25519 + HKDF +
//! XChaCha20-Poly1305). The data stream is XChaCha20 followed by a SHA-256
//! modification detection code.
//!
//! Decrypt never fails with a Rust error: problems are reported as
//! [`CoderError`]s alongside whatever plaintext could be recovered.

use std::collections::BTreeSet;
use std::io::{Read, Write};

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::XChaCha20;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use ring::digest::{Context, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use tracing::{debug, warn};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::packet::{
    decode_literal, encode_literal, write_packet, OnePassSignaturePacket, PacketReader,
    SessionKeyPacket, SignaturePacket, Tag, COMPRESSION_DEFLATE,
};
use crate::crypto::{CoderError, Signing, StreamingSigner, HKDF};
use crate::identity::{PersonalKey, PublicKeyRing};

/// Chunk size for streaming literal data to the output.
const BUFFER_SIZE: usize = 1 << 8;
const NONCE_SIZE: usize = 24;
const MDC_SIZE: usize = 32;
const MDC_HEADER: [u8; 5] = [Tag::Mdc as u8, 0, 0, 0, MDC_SIZE as u8];
const KEY_WRAP_INFO: &[u8] = b"Konverse_Session_Key_Wrap";
/// Upper bound on the inflated packet stream of one envelope.
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024 * 1024;

/// Errors building an envelope.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("No recipients")]
    NoRecipients,
    #[error("Invalid recipient key: {0}")]
    InvalidKey(String),
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
    #[error("Encryption failed")]
    EncryptionFailed,
}

/// Options for [`encrypt_with`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Append a modification detection code to the data stream.
    pub integrity_protected: bool,
    /// Creation time written into literal and signature packets (unix seconds).
    pub created_at: u64,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            integrity_protected: true,
            created_at: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Encrypts `plaintext` for every recipient, signing with `sign_with` if given.
pub fn encrypt(
    plaintext: &[u8],
    recipients: &[PublicKeyRing],
    sign_with: Option<&PersonalKey>,
) -> Result<Vec<u8>, EncodeError> {
    encrypt_with(plaintext, recipients, sign_with, &EncodeOptions::default())
}

/// [`encrypt`] with explicit options.
pub fn encrypt_with(
    plaintext: &[u8],
    recipients: &[PublicKeyRing],
    sign_with: Option<&PersonalKey>,
    options: &EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    if recipients.is_empty() {
        return Err(EncodeError::NoRecipients);
    }

    // signed literal data
    let mut inner = Vec::with_capacity(plaintext.len() + 128);
    if let Some(key) = sign_with {
        let ops = OnePassSignaturePacket {
            issuer: key.signing_key_id(),
        };
        write_packet(&mut inner, Tag::OnePassSignature, &ops.encode());
    }
    write_packet(
        &mut inner,
        Tag::Literal,
        &encode_literal(options.created_at, plaintext),
    );
    if let Some(key) = sign_with {
        let mut signer = StreamingSigner::new();
        signer.update(plaintext);
        let signature = SignaturePacket {
            issuer: key.signing_key_id(),
            created_at: options.created_at,
            signature: signer.sign(key.signing_keypair(), options.created_at),
        };
        write_packet(&mut inner, Tag::Signature, &signature.encode());
    }

    // compression
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&inner)?;
    let mut compressed = vec![COMPRESSION_DEFLATE];
    compressed.extend_from_slice(&encoder.finish()?);

    let mut stream = Vec::with_capacity(compressed.len() + 64);
    write_packet(&mut stream, Tag::Compressed, &compressed);

    // encryption
    let rng = SystemRandom::new();
    let mut session_key = Zeroizing::new([0u8; 32]);
    rng.fill(&mut session_key[..])
        .map_err(|_| EncodeError::EncryptionFailed)?;
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill(&mut nonce)
        .map_err(|_| EncodeError::EncryptionFailed)?;

    if options.integrity_protected {
        let mdc = mdc_digest(&nonce, &stream);
        stream.extend_from_slice(&MDC_HEADER);
        stream.extend_from_slice(&mdc);
    }
    apply_keystream(&session_key, &nonce, &mut stream);

    let mut envelope = Vec::new();
    for recipient in recipients {
        let packet = wrap_session_key(&rng, &session_key, recipient)?;
        write_packet(&mut envelope, Tag::SessionKey, &packet.encode());
    }

    let mut data_body = Vec::with_capacity(NONCE_SIZE + stream.len());
    data_body.extend_from_slice(&nonce);
    data_body.extend_from_slice(&stream);
    let data_tag = if options.integrity_protected {
        Tag::IntegrityProtectedData
    } else {
        Tag::EncryptedData
    };
    write_packet(&mut envelope, data_tag, &data_body);

    debug!(
        recipients = recipients.len(),
        signed = sign_with.is_some(),
        size = envelope.len(),
        "Envelope encrypted"
    );
    Ok(envelope)
}

fn apply_keystream(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], data: &mut [u8]) {
    let mut cipher = XChaCha20::new(key.into(), nonce.into());
    cipher.apply_keystream(data);
}

fn mdc_digest(nonce: &[u8], data: &[u8]) -> [u8; MDC_SIZE] {
    let mut context = Context::new(&SHA256);
    context.update(nonce);
    context.update(data);
    context.update(&MDC_HEADER);
    let mut out = [0u8; MDC_SIZE];
    out.copy_from_slice(context.finish().as_ref());
    out
}

fn wrapping_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);
    Zeroizing::new(HKDF::derive_key(Some(&salt), shared, KEY_WRAP_INFO))
}

fn wrap_session_key(
    rng: &SystemRandom,
    session_key: &[u8; 32],
    recipient: &PublicKeyRing,
) -> Result<SessionKeyPacket, EncodeError> {
    let mut seed = Zeroizing::new([0u8; 32]);
    rng.fill(&mut seed[..])
        .map_err(|_| EncodeError::EncryptionFailed)?;
    let ephemeral = StaticSecret::from(*seed);
    let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();

    let shared = ephemeral.diffie_hellman(&X25519PublicKey::from(*recipient.encryption_key()));
    if !shared.was_contributory() {
        return Err(EncodeError::InvalidKey(recipient.user_id().to_string()));
    }
    let key = wrapping_key(shared.as_bytes(), &ephemeral_public, recipient.encryption_key());

    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill(&mut nonce)
        .map_err(|_| EncodeError::EncryptionFailed)?;

    let key_id = recipient.key_id();
    let cipher = XChaCha20Poly1305::new((&*key).into());
    let wrapped_key = cipher
        .encrypt(
            (&nonce).into(),
            Payload {
                msg: session_key,
                aad: key_id.as_bytes(),
            },
        )
        .map_err(|_| EncodeError::EncryptionFailed)?;

    Ok(SessionKeyPacket {
        key_id,
        ephemeral_public,
        nonce,
        wrapped_key,
    })
}

fn unwrap_session_key(packet: &SessionKeyPacket, my_key: &PersonalKey) -> Option<Zeroizing<[u8; 32]>> {
    let secret = my_key.encryption_secret();
    let shared = secret.diffie_hellman(&X25519PublicKey::from(packet.ephemeral_public));
    if !shared.was_contributory() {
        return None;
    }
    let key = wrapping_key(shared.as_bytes(), &packet.ephemeral_public, &my_key.encryption_public());

    let cipher = XChaCha20Poly1305::new((&*key).into());
    let plain = Zeroizing::new(
        cipher
            .decrypt(
                (&packet.nonce).into(),
                Payload {
                    msg: &packet.wrapped_key,
                    aad: packet.key_id.as_bytes(),
                },
            )
            .ok()?,
    );

    let mut session_key = Zeroizing::new([0u8; 32]);
    if plain.len() != 32 {
        return None;
    }
    session_key.copy_from_slice(&plain);
    Some(session_key)
}

/// Result of decrypting an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decryption {
    /// Signing state found in the envelope.
    pub signing: Signing,
    /// Every problem found. Empty on a clean decode.
    pub errors: BTreeSet<CoderError>,
    /// Whether the literal data was reached and fully written out.
    pub recovered: bool,
}

impl Decryption {
    fn new() -> Self {
        Decryption {
            signing: Signing::Unknown,
            errors: BTreeSet::new(),
            recovered: false,
        }
    }

    fn fail(mut self, error: CoderError) -> Self {
        self.errors.insert(error);
        self
    }
}

/// Decrypts `envelope` into a buffer.
pub fn decrypt(
    envelope: &[u8],
    my_key: &PersonalKey,
    sender: Option<&PublicKeyRing>,
) -> (Vec<u8>, Decryption) {
    let mut plaintext = Vec::new();
    let result = decrypt_to(envelope, my_key, sender, &mut plaintext);
    (plaintext, result)
}

/// Decrypts `envelope`, streaming the plaintext into `output`.
///
/// Structural failures return immediately with what was found so far.
/// Signature and integrity failures are recorded and decoding continues.
pub fn decrypt_to<W: Write>(
    envelope: &[u8],
    my_key: &PersonalKey,
    sender: Option<&PublicKeyRing>,
    output: &mut W,
) -> Decryption {
    let result = Decryption::new();

    // outer structure
    let mut reader = PacketReader::new(envelope);
    if reader.peek_tag() == Some(Tag::Marker) && reader.next_packet().is_err() {
        return result.fail(CoderError::InvalidData);
    }

    let mut session_keys = Vec::new();
    let data = loop {
        match reader.next_packet() {
            Ok(Some(p)) if p.tag == Tag::SessionKey => match SessionKeyPacket::decode(p.body) {
                Ok(packet) => session_keys.push(packet),
                Err(e) => {
                    warn!(error = %e, "Can't parse session key packet");
                    return result.fail(CoderError::InvalidData);
                }
            },
            Ok(Some(p)) if matches!(p.tag, Tag::IntegrityProtectedData | Tag::EncryptedData) => {
                break p;
            }
            Ok(other) => {
                warn!(tag = ?other.map(|p| p.tag), "Can't find encrypted data list");
                return result.fail(CoderError::InvalidData);
            }
            Err(e) => {
                warn!(error = %e, "Can't find encrypted data list");
                return result.fail(CoderError::InvalidData);
            }
        }
    };
    if session_keys.is_empty() || data.body.len() < NONCE_SIZE {
        warn!("Encrypted data list is empty");
        return result.fail(CoderError::InvalidData);
    }

    // key match
    let my_key_id = my_key.key_id();
    let Some(packet) = session_keys.iter().find(|p| p.key_id == my_key_id) else {
        warn!(key_id = %my_key_id, "Private key for message not found");
        return result.fail(CoderError::InvalidPrivateKey);
    };
    let Some(session_key) = unwrap_session_key(packet, my_key) else {
        warn!("Can't unwrap session key");
        return result.fail(CoderError::InvalidPrivateKey);
    };

    // data stream
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&data.body[..NONCE_SIZE]);
    let mut stream = data.body[NONCE_SIZE..].to_vec();
    apply_keystream(&session_key, &nonce, &mut stream);

    let mut result = result;
    let stream_len = if data.tag == Tag::IntegrityProtectedData {
        match check_integrity(&nonce, &stream) {
            Some(len) => len,
            None => {
                warn!("Integrity check failed");
                result.errors.insert(CoderError::InvalidIntegrity);
                stream.len().saturating_sub(MDC_HEADER.len() + MDC_SIZE)
            }
        }
    } else {
        warn!("Data is not integrity protected");
        result.errors.insert(CoderError::NoIntegrity);
        stream.len()
    };

    let mut plain_reader = PacketReader::new(&stream[..stream_len]);
    let compressed = match plain_reader.next_packet() {
        Ok(Some(p)) if p.tag == Tag::Compressed => p.body,
        _ => {
            warn!("Compressed data packet expected");
            return result.fail(CoderError::InvalidData);
        }
    };

    let inner = match decompress(compressed, MAX_DECOMPRESSED_SIZE) {
        Some(inner) => inner,
        None => {
            warn!("Can't decompress data");
            return result.fail(CoderError::InvalidData);
        }
    };

    decode_signed_literal(&inner, sender, output, result)
}

/// Verifies the MDC trailer; returns the length of the protected data.
fn check_integrity(nonce: &[u8], stream: &[u8]) -> Option<usize> {
    let trailer = MDC_HEADER.len() + MDC_SIZE;
    let data_len = stream.len().checked_sub(trailer)?;
    let (data, mdc) = stream.split_at(data_len);
    if mdc[..MDC_HEADER.len()] != MDC_HEADER {
        return None;
    }
    let expected = mdc_digest(nonce, data);
    ring::constant_time::verify_slices_are_equal(&expected, &mdc[MDC_HEADER.len()..])
        .ok()
        .map(|_| data_len)
}

/// Inflates a compressed packet body. `None` past `limit` bytes.
fn decompress(body: &[u8], limit: u64) -> Option<Vec<u8>> {
    let (&algorithm, data) = body.split_first()?;
    if algorithm != COMPRESSION_DEFLATE {
        return None;
    }
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .ok()?;
    if out.len() as u64 > limit {
        warn!(limit, "Decompressed data exceeds limit");
        return None;
    }
    Some(out)
}

fn decode_signed_literal<W: Write>(
    inner: &[u8],
    sender: Option<&PublicKeyRing>,
    output: &mut W,
    mut result: Decryption,
) -> Decryption {
    let mut reader = PacketReader::new(inner);

    let mut verifier = None;
    let mut first = reader.next_packet();
    if let Ok(Some(p)) = first {
        if p.tag == Tag::OnePassSignature {
            result.signing = Signing::Signed;
            match (OnePassSignaturePacket::decode(p.body), sender) {
                (Err(_), _) => {
                    warn!("Invalid one-pass signature packet");
                    result.errors.insert(CoderError::InvalidSignatureData);
                }
                (Ok(ops), Some(key)) => verifier = Some((ops, key, StreamingSigner::new())),
                (Ok(_), None) => {
                    debug!("No sender key, signature can't be verified");
                    result.errors.insert(CoderError::KeyUnavailable);
                }
            }
            first = reader.next_packet();
        } else {
            result.signing = Signing::None;
        }
    }

    let literal = match first {
        Ok(Some(p)) if p.tag == Tag::Literal => p.body,
        _ => {
            warn!("Literal data packet expected");
            return result.fail(CoderError::InvalidData);
        }
    };
    let data = match decode_literal(literal) {
        Ok(data) => data,
        Err(_) => return result.fail(CoderError::InvalidData),
    };

    for chunk in data.chunks(BUFFER_SIZE) {
        if let Err(e) = output.write_all(chunk) {
            warn!(error = %e, "Can't write plaintext");
            return result.fail(CoderError::UnknownError);
        }
        if let Some((_, _, signer)) = verifier.as_mut() {
            signer.update(chunk);
        }
    }
    result.recovered = true;

    if let Some((ops, key, signer)) = verifier {
        let signature = match reader.next_packet() {
            Ok(Some(p)) if p.tag == Tag::Signature => SignaturePacket::decode(p.body).ok(),
            _ => None,
        };
        match signature {
            None => {
                warn!("Invalid signature packet");
                result.errors.insert(CoderError::InvalidSignatureData);
            }
            Some(sig) => {
                let issuer_matches =
                    sig.issuer == ops.issuer && sig.issuer == key.signing_key_id();
                if issuer_matches && signer.verify(key.signing_key(), sig.created_at, &sig.signature) {
                    result.signing = Signing::Verified;
                } else {
                    warn!("Signature verification failed");
                    result.errors.insert(CoderError::InvalidSignature);
                }
            }
        }
    }

    result
}
