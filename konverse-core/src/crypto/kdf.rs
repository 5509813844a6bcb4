// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HKDF-SHA256 (RFC 5869)
//!
//! Derives subkeys from a master seed and key-wrapping keys from X25519
//! shared secrets.

use ring::hkdf::{Salt, HKDF_SHA256};

/// HKDF-SHA256 key derivation.
pub struct HKDF;

impl HKDF {
    /// Derives a 32-byte key. A missing salt is treated as 32 zero bytes.
    pub fn derive_key(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> [u8; 32] {
        let zero_salt = [0u8; 32];
        let salt = Salt::new(HKDF_SHA256, salt.unwrap_or(&zero_salt));
        let prk = salt.extract(ikm);
        let info = [info];

        let mut key = [0u8; 32];
        // 32 bytes is the digest length, always a valid output length
        prk.expand(&info, HKDF_SHA256)
            .and_then(|okm| okm.fill(&mut key))
            .expect("32-byte HKDF output is valid");
        key
    }
}
