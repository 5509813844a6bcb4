// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ed25519 Signatures
//!
//! Signing keypairs for envelope authentication. Envelope signatures are made
//! over a SHA-256 digest so the signed data can be hashed incrementally while
//! it is streamed out of the decompressor.

use ring::digest::{Context, Digest, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair as RingKeyPair, UnparsedPublicKey, ED25519};
use zeroize::Zeroize;

/// Ed25519 signing keypair.
///
/// The seed is zeroed on drop.
pub struct SigningKeyPair {
    keypair: Ed25519KeyPair,
    seed: [u8; 32],
}

impl Drop for SigningKeyPair {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key", &self.public_key().fingerprint())
            .field("seed", &"[REDACTED]")
            .finish()
    }
}

impl SigningKeyPair {
    /// Generates a new random keypair.
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let seed = ring::rand::generate::<[u8; 32]>(&rng)
            .expect("System RNG should not fail")
            .expose();

        Self::from_seed(&seed)
    }

    /// Creates a keypair from a 32-byte seed. Same seed, same keypair.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let keypair =
            Ed25519KeyPair::from_seed_unchecked(seed).expect("Any 32-byte seed is valid for Ed25519");

        SigningKeyPair {
            keypair,
            seed: *seed,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.keypair.public_key().as_ref());
        PublicKey { bytes }
    }

    /// Signs a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(self.keypair.sign(message).as_ref());
        Signature { bytes }
    }
}

/// Ed25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PublicKey {
    bytes: [u8; 32],
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Hex encoding of the key, for display.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verifies a signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        UnparsedPublicKey::new(&ED25519, &self.bytes)
            .verify(message, &signature.bytes)
            .is_ok()
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; 64],
}

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature { bytes }
    }

    /// Parses a signature from a slice, `None` unless it is exactly 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 64] = bytes.try_into().ok()?;
        Some(Signature { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

/// Incremental hash of signed data.
///
/// Data is fed as it becomes available; the final digest is bound to the
/// signature creation time through a fixed trailer.
pub struct StreamingSigner {
    context: Context,
}

impl Default for StreamingSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSigner {
    pub fn new() -> Self {
        StreamingSigner {
            context: Context::new(&SHA256),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.context.update(data);
    }

    fn finish(self, created_at: u64) -> Digest {
        let mut context = self.context;
        context.update(b"KSIG");
        context.update(&created_at.to_be_bytes());
        context.finish()
    }

    /// Signs the accumulated data.
    pub fn sign(self, keypair: &SigningKeyPair, created_at: u64) -> Signature {
        let digest = self.finish(created_at);
        keypair.sign(digest.as_ref())
    }

    /// Verifies `signature` over the accumulated data.
    pub fn verify(self, public_key: &PublicKey, created_at: u64, signature: &Signature) -> bool {
        let digest = self.finish(created_at);
        public_key.verify(digest.as_ref(), signature)
    }
}
