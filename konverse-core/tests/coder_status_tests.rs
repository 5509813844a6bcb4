// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Coder Status Property Tests

mod common;

use std::collections::BTreeSet;

use common::strategies::*;
use konverse_core::crypto::{errors_from_mask, errors_to_mask};
use konverse_core::{CoderError, CoderStatus, Encryption, Signing};
use proptest::prelude::*;

fn encryption_strategy() -> impl Strategy<Value = Encryption> {
    prop_oneof![
        Just(Encryption::None),
        Just(Encryption::Encrypted),
        Just(Encryption::Decrypted),
        Just(Encryption::ToEncrypt),
    ]
}

proptest! {
    #[test]
    fn prop_verified_only_from_signed_or_unknown(from in signing_strategy()) {
        let mut status = CoderStatus::new(Encryption::Decrypted, from, BTreeSet::new());
        let result = status.set_signing(Signing::Verified);

        let legal = matches!(from, Signing::Signed | Signing::Unknown | Signing::Verified);
        prop_assert_eq!(result.is_ok(), legal);
        prop_assert_eq!(status.signing(), if legal { Signing::Verified } else { from });
    }

    #[test]
    fn prop_rejected_transition_keeps_state(
        from in signing_strategy(),
        to in signing_strategy(),
        errors in error_set_strategy(),
    ) {
        let mut status = CoderStatus::new(Encryption::Encrypted, from, errors.clone());
        if status.set_signing(to).is_err() {
            prop_assert_eq!(status.signing(), from);
        } else {
            prop_assert_eq!(status.signing(), to);
        }
        prop_assert_eq!(status.errors(), &errors);
    }

    #[test]
    fn prop_signing_never_returns_to_unknown(path in prop::collection::vec(signing_strategy(), 1..8)) {
        let mut status = CoderStatus::encrypted();
        let mut left_unknown = false;
        for signing in path {
            let _ = status.set_signing(signing);
            left_unknown |= status.signing() != Signing::Unknown;
            if left_unknown {
                prop_assert_ne!(status.signing(), Signing::Unknown);
            }
        }
    }

    #[test]
    fn prop_secure_requires_clean_verified_decryption(
        encryption in encryption_strategy(),
        signing in signing_strategy(),
        errors in error_set_strategy(),
    ) {
        let status = CoderStatus::new(encryption, signing, errors.clone());
        let expected = encryption == Encryption::Decrypted
            && signing == Signing::Verified
            && errors.is_empty();
        prop_assert_eq!(status.is_secure(), expected);
    }

    #[test]
    fn prop_error_mask_preserves_set(errors in error_set_strategy()) {
        prop_assert_eq!(errors_from_mask(errors_to_mask(&errors)), errors);
    }
}

#[test]
fn test_outgoing_lifecycle() {
    let mut status = CoderStatus::to_encrypt();
    assert!(!status.is_encrypted());

    status.set_encrypted();
    status.set_signing(Signing::Signed).unwrap();
    assert_eq!(status.encryption(), Encryption::Encrypted);
    assert_eq!(status.signing(), Signing::Signed);
}

#[test]
fn test_incoming_lifecycle() {
    let mut status = CoderStatus::encrypted();
    assert_eq!(status.signing(), Signing::Unknown);

    status.set_decrypted();
    status.set_signing(Signing::Verified).unwrap();
    assert!(status.is_secure());
    assert!(status.was_encrypted());

    status.set_security_errors(BTreeSet::from([CoderError::InvalidSender]));
    assert!(!status.is_secure());
    assert!(status.has_errors());
}

#[test]
fn test_key_refresh_errors() {
    let refresh: Vec<_> = CoderError::ALL
        .iter()
        .copied()
        .filter(|e| e.wants_key_refresh())
        .collect();
    assert_eq!(
        refresh,
        vec![
            CoderError::KeyUnavailable,
            CoderError::InvalidSignature,
            CoderError::InvalidSender
        ]
    );
}
