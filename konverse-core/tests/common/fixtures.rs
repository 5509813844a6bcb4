// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Fixtures
//!
//! Deterministic keys and addresses for the three standard parties.

use konverse_core::{Jid, PersonalKey};

pub const ALICE: &str = "alice@example.org";
pub const BOB: &str = "bob@example.org";
pub const CAROL: &str = "carol@example.org";

/// Alice is the local user in most tests.
pub fn alice_key() -> PersonalKey {
    PersonalKey::from_seed(ALICE, &[1u8; 32])
}

pub fn bob_key() -> PersonalKey {
    PersonalKey::from_seed(BOB, &[2u8; 32])
}

pub fn carol_key() -> PersonalKey {
    PersonalKey::from_seed(CAROL, &[3u8; 32])
}

pub fn alice() -> Jid {
    Jid::parse(ALICE)
}

pub fn bob() -> Jid {
    Jid::parse(BOB)
}

pub fn carol() -> Jid {
    Jid::parse(CAROL)
}

/// Bob's address with a client resource, as it appears on incoming stanzas.
pub fn bob_phone() -> Jid {
    Jid::parse("bob@example.org/phone")
}
