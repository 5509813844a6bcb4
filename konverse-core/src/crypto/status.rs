// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Coder Status
//!
//! Tracks encryption and signing progress plus the security errors found for
//! one artifact (a message body or an attachment).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Encryption state of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encryption {
    /// Never encrypted.
    None,
    /// Ciphertext, not yet decrypted.
    Encrypted,
    /// Was encrypted, plaintext recovered.
    Decrypted,
    /// Outgoing plaintext waiting to be encrypted.
    ToEncrypt,
}

/// Signing state of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signing {
    /// Not signed.
    None,
    /// Not known yet (still encrypted).
    Unknown,
    /// Signed, signature not (successfully) verified.
    Signed,
    /// Signed and verified against the sender's key.
    Verified,
}

/// Security errors recorded on a [`CoderStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoderError {
    /// Unexpected failure.
    UnknownError,
    /// The local personal key is not loaded.
    MyKeyUnavailable,
    /// The contact's public key is not available.
    KeyUnavailable,
    /// The contact's public key is malformed or unusable.
    InvalidKey,
    /// The envelope was not encrypted for the local key.
    InvalidPrivateKey,
    /// Malformed envelope.
    InvalidData,
    /// The encrypted container is not integrity protected.
    NoIntegrity,
    /// Integrity check failed.
    InvalidIntegrity,
    /// Malformed signature packet.
    InvalidSignatureData,
    /// Signature does not match the sender's key.
    InvalidSignature,
    /// The CPIM header does not name the local user as recipient.
    InvalidRecipient,
    /// The CPIM header does not name the expected sender.
    InvalidSender,
}

impl CoderError {
    pub const ALL: [CoderError; 12] = [
        CoderError::UnknownError,
        CoderError::MyKeyUnavailable,
        CoderError::KeyUnavailable,
        CoderError::InvalidKey,
        CoderError::InvalidPrivateKey,
        CoderError::InvalidData,
        CoderError::NoIntegrity,
        CoderError::InvalidIntegrity,
        CoderError::InvalidSignatureData,
        CoderError::InvalidSignature,
        CoderError::InvalidRecipient,
        CoderError::InvalidSender,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Errors that mean the contact's key should be requested again.
    pub fn wants_key_refresh(self) -> bool {
        matches!(
            self,
            CoderError::KeyUnavailable | CoderError::InvalidSignature | CoderError::InvalidSender
        )
    }
}

/// Packs an error set into a bit mask for storage.
pub fn errors_to_mask(errors: &BTreeSet<CoderError>) -> u32 {
    errors.iter().fold(0, |mask, e| mask | e.bit())
}

/// Unpacks a stored bit mask. Unknown bits are ignored.
pub fn errors_from_mask(mask: u32) -> BTreeSet<CoderError> {
    CoderError::ALL
        .iter()
        .copied()
        .filter(|e| mask & e.bit() != 0)
        .collect()
}

/// Rejected signing transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Illegal signing transition: {from:?} -> {to:?}")]
pub struct SigningTransitionError {
    pub from: Signing,
    pub to: Signing,
}

/// Encryption/signing progress and errors for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderStatus {
    encryption: Encryption,
    signing: Signing,
    errors: BTreeSet<CoderError>,
}

impl CoderStatus {
    /// Restores a status from stored values.
    pub fn new(encryption: Encryption, signing: Signing, errors: BTreeSet<CoderError>) -> Self {
        CoderStatus {
            encryption,
            signing,
            errors,
        }
    }

    /// Plain, unsigned content.
    pub fn insecure() -> Self {
        Self::new(Encryption::None, Signing::None, BTreeSet::new())
    }

    /// Received ciphertext.
    pub fn encrypted() -> Self {
        Self::new(Encryption::Encrypted, Signing::Unknown, BTreeSet::new())
    }

    /// Outgoing content that should be encrypted before sending.
    pub fn to_encrypt() -> Self {
        Self::new(Encryption::ToEncrypt, Signing::Unknown, BTreeSet::new())
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    pub fn signing(&self) -> Signing {
        self.signing
    }

    pub fn errors(&self) -> &BTreeSet<CoderError> {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption == Encryption::Encrypted
    }

    /// Whether the artifact was transferred encrypted.
    pub fn was_encrypted(&self) -> bool {
        matches!(self.encryption, Encryption::Encrypted | Encryption::Decrypted)
    }

    /// Decrypted, verified and without errors.
    pub fn is_secure(&self) -> bool {
        self.encryption == Encryption::Decrypted
            && self.signing == Signing::Verified
            && self.errors.is_empty()
    }

    /// Marks ciphertext as decrypted.
    ///
    /// Only legal from `Encrypted`; anything else is a caller bug.
    pub fn set_decrypted(&mut self) {
        debug_assert_eq!(
            self.encryption,
            Encryption::Encrypted,
            "set_decrypted called on non-encrypted status"
        );
        if self.encryption != Encryption::Encrypted {
            warn!(encryption = ?self.encryption, "Ignoring set_decrypted");
            return;
        }
        self.encryption = Encryption::Decrypted;
    }

    /// Marks outgoing content as encrypted. Only legal from `ToEncrypt`.
    pub fn set_encrypted(&mut self) {
        debug_assert_eq!(
            self.encryption,
            Encryption::ToEncrypt,
            "set_encrypted called on status not waiting for encryption"
        );
        if self.encryption != Encryption::ToEncrypt {
            warn!(encryption = ?self.encryption, "Ignoring set_encrypted");
            return;
        }
        self.encryption = Encryption::Encrypted;
    }

    /// Advances the signing state.
    ///
    /// `None` and `Signed` are only reachable from `Unknown`, `Verified` only
    /// from `Signed` or `Unknown`. Setting the current value is a no-op.
    pub fn set_signing(&mut self, signing: Signing) -> Result<(), SigningTransitionError> {
        if signing == self.signing {
            return Ok(());
        }

        let legal = match signing {
            Signing::None | Signing::Signed => self.signing == Signing::Unknown,
            Signing::Verified => matches!(self.signing, Signing::Signed | Signing::Unknown),
            Signing::Unknown => false,
        };

        if !legal {
            return Err(SigningTransitionError {
                from: self.signing,
                to: signing,
            });
        }

        self.signing = signing;
        Ok(())
    }

    /// Replaces the error set.
    pub fn set_security_errors(&mut self, errors: BTreeSet<CoderError>) {
        self.errors = errors;
    }
}

impl fmt::Display for CoderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "encryption={:?} signing={:?} errors={:?}",
            self.encryption, self.signing, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(CoderStatus::insecure().encryption(), Encryption::None);
        assert_eq!(CoderStatus::insecure().signing(), Signing::None);
        assert_eq!(CoderStatus::encrypted().signing(), Signing::Unknown);
        assert_eq!(CoderStatus::to_encrypt().encryption(), Encryption::ToEncrypt);
    }

    #[test]
    fn test_set_decrypted_from_encrypted() {
        let mut status = CoderStatus::encrypted();
        status.set_decrypted();
        assert_eq!(status.encryption(), Encryption::Decrypted);
        assert!(status.was_encrypted());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "set_decrypted")]
    fn test_set_decrypted_from_plain_panics_in_debug() {
        CoderStatus::insecure().set_decrypted();
    }

    #[test]
    fn test_signing_verified_then_signed_rejected() {
        let mut status = CoderStatus::encrypted();
        status.set_signing(Signing::Signed).unwrap();
        status.set_signing(Signing::Verified).unwrap();

        let err = status.set_signing(Signing::Signed).unwrap_err();
        assert_eq!(err.from, Signing::Verified);
        assert_eq!(status.signing(), Signing::Verified);
    }

    #[test]
    fn test_same_signing_is_noop() {
        let mut status = CoderStatus::insecure();
        assert!(status.set_signing(Signing::None).is_ok());
    }

    #[test]
    fn test_security_errors_replace() {
        let mut status = CoderStatus::encrypted();
        status.set_security_errors([CoderError::InvalidData].into());
        status.set_security_errors([CoderError::InvalidSender].into());
        assert_eq!(status.errors(), &BTreeSet::from([CoderError::InvalidSender]));
    }

    #[test]
    fn test_is_secure() {
        let mut status = CoderStatus::encrypted();
        status.set_decrypted();
        status.set_signing(Signing::Verified).unwrap();
        assert!(status.is_secure());

        status.set_security_errors([CoderError::InvalidRecipient].into());
        assert!(!status.is_secure());
    }

    #[test]
    fn test_error_mask_roundtrip() {
        let errors = BTreeSet::from([CoderError::NoIntegrity, CoderError::InvalidSender]);
        assert_eq!(errors_from_mask(errors_to_mask(&errors)), errors);
        assert!(errors_from_mask(0).is_empty());
    }
}
