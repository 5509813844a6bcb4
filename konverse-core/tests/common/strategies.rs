// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies
//!
//! Reusable strategies for the property tests.

use std::collections::BTreeSet;

use konverse_core::{CoderError, Signing};
use proptest::prelude::*;

// ============================================================
// Payload Strategies
// ============================================================

/// Arbitrary plaintext, empty included.
pub fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// Message text without the characters the stanza layer escapes.
pub fn body_text_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?]{0,200}"
}

/// Number of envelope recipients.
pub fn recipient_count_strategy() -> impl Strategy<Value = usize> {
    1usize..5
}

// ============================================================
// Coder Status Strategies
// ============================================================

pub fn signing_strategy() -> impl Strategy<Value = Signing> {
    prop_oneof![
        Just(Signing::None),
        Just(Signing::Unknown),
        Just(Signing::Signed),
        Just(Signing::Verified),
    ]
}

pub fn coder_error_strategy() -> impl Strategy<Value = CoderError> {
    prop::sample::select(CoderError::ALL.to_vec())
}

pub fn error_set_strategy() -> impl Strategy<Value = BTreeSet<CoderError>> {
    prop::collection::btree_set(coder_error_strategy(), 0..CoderError::ALL.len())
}

// ============================================================
// Address Strategies
// ============================================================

/// (local, domain, resource) parts of an address.
pub fn jid_parts_strategy() -> impl Strategy<Value = (String, String, String)> {
    ("[a-z][a-z0-9]{0,11}", "[a-z]{2,10}\\.[a-z]{2,4}", "[a-zA-Z0-9]{1,8}")
}
