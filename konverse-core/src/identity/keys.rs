// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key Material
//!
//! The local [`PersonalKey`] (Ed25519 signing key + X25519 encryption subkey)
//! and the [`PublicKeyRing`] known for each contact.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::digest::{digest, SHA256};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::{PublicKey, SigningKeyPair, HKDF};

const SIGNING_SEED_INFO: &[u8] = b"Konverse_Signing_Seed";
const ENCRYPTION_SEED_INFO: &[u8] = b"Konverse_Encryption_Seed";

/// Key material errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Malformed key ring: {0}")]
    Malformed(String),
    #[error("Invalid encoding: {0}")]
    Encoding(String),
}

/// Short identifier of a public key: the first 8 bytes of its SHA-256.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; 8]);

impl KeyId {
    pub fn of(public_key: &[u8]) -> Self {
        let hash = digest(&SHA256, public_key);
        let mut id = [0u8; 8];
        id.copy_from_slice(&hash.as_ref()[..8]);
        KeyId(id)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        KeyId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", hex::encode_upper(self.0))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// The local user's key pair.
///
/// Loaded once at startup and never mutated; replaced wholesale on account
/// re-import.
pub struct PersonalKey {
    user_id: String,
    signing: SigningKeyPair,
    encryption: StaticSecret,
}

impl fmt::Debug for PersonalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalKey")
            .field("user_id", &self.user_id)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl PersonalKey {
    /// Generates a fresh key for `user_id`.
    pub fn generate(user_id: &str) -> Self {
        let rng = ring::rand::SystemRandom::new();
        let mut seed = ring::rand::generate::<[u8; 32]>(&rng)
            .expect("System RNG should not fail")
            .expose();
        let key = Self::from_seed(user_id, &seed);
        seed.zeroize();
        key
    }

    /// Derives both subkeys from a master seed.
    pub fn from_seed(user_id: &str, master_seed: &[u8; 32]) -> Self {
        let mut signing_seed = HKDF::derive_key(None, master_seed, SIGNING_SEED_INFO);
        let encryption_seed = HKDF::derive_key(None, master_seed, ENCRYPTION_SEED_INFO);

        let signing = SigningKeyPair::from_seed(&signing_seed);
        signing_seed.zeroize();

        PersonalKey {
            user_id: user_id.to_string(),
            signing,
            encryption: StaticSecret::from(encryption_seed),
        }
    }

    /// User ID bound into every envelope sent or received with this key.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn signing_keypair(&self) -> &SigningKeyPair {
        &self.signing
    }

    pub(crate) fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption
    }

    pub fn encryption_public(&self) -> [u8; 32] {
        X25519PublicKey::from(&self.encryption).to_bytes()
    }

    /// Id of the encryption subkey, used to address envelopes.
    pub fn key_id(&self) -> KeyId {
        KeyId::of(&self.encryption_public())
    }

    /// Id of the signing key, written into signatures.
    pub fn signing_key_id(&self) -> KeyId {
        KeyId::of(self.signing.public_key().as_bytes())
    }

    pub fn fingerprint(&self) -> String {
        self.public_key_ring().fingerprint()
    }

    /// The public half, as contacts see it.
    pub fn public_key_ring(&self) -> PublicKeyRing {
        PublicKeyRing::new(
            &self.user_id,
            self.signing.public_key(),
            self.encryption_public(),
        )
    }
}

/// A contact's public keys: master signing key and encryption subkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRing {
    user_id: String,
    signing_key: PublicKey,
    encryption_key: [u8; 32],
}

impl PublicKeyRing {
    pub fn new(user_id: &str, signing_key: PublicKey, encryption_key: [u8; 32]) -> Self {
        PublicKeyRing {
            user_id: user_id.to_string(),
            signing_key,
            encryption_key,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn signing_key(&self) -> &PublicKey {
        &self.signing_key
    }

    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    pub fn key_id(&self) -> KeyId {
        KeyId::of(&self.encryption_key)
    }

    pub fn signing_key_id(&self) -> KeyId {
        KeyId::of(self.signing_key.as_bytes())
    }

    /// 40 hex digits over both public keys.
    pub fn fingerprint(&self) -> String {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(self.signing_key.as_bytes());
        data.extend_from_slice(&self.encryption_key);
        hex::encode_upper(&digest(&SHA256, &data).as_ref()[..20])
    }

    /// Binary form: `uid_len (u16 BE) || uid || signing (32) || encryption (32)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let uid = self.user_id.as_bytes();
        let mut out = Vec::with_capacity(2 + uid.len() + 64);
        out.extend_from_slice(&(uid.len() as u16).to_be_bytes());
        out.extend_from_slice(uid);
        out.extend_from_slice(self.signing_key.as_bytes());
        out.extend_from_slice(&self.encryption_key);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, KeyError> {
        if data.len() < 2 {
            return Err(KeyError::Malformed("truncated header".into()));
        }
        let uid_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        let rest = &data[2..];
        if rest.len() != uid_len + 64 {
            return Err(KeyError::Malformed(format!(
                "expected {} bytes, got {}",
                uid_len + 64,
                rest.len()
            )));
        }

        let user_id = std::str::from_utf8(&rest[..uid_len])
            .map_err(|e| KeyError::Malformed(e.to_string()))?;
        let mut signing = [0u8; 32];
        signing.copy_from_slice(&rest[uid_len..uid_len + 32]);
        let mut encryption = [0u8; 32];
        encryption.copy_from_slice(&rest[uid_len + 32..]);

        Ok(PublicKeyRing::new(
            user_id,
            PublicKey::from_bytes(signing),
            encryption,
        ))
    }

    /// Base64 text form for exchange with the key server.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let data = BASE64
            .decode(text.trim())
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::from_bytes(&data)
    }
}
