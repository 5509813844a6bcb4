// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Identity Module
//!
//! Network addresses and the key material bound to them.

mod directory;
mod jid;
mod keys;

pub use directory::{KeyDirectory, MemoryKeyDirectory};
pub use jid::Jid;
pub use keys::{KeyError, KeyId, PersonalKey, PublicKeyRing};
