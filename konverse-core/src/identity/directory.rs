// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key directory: contact address -> public key ring.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Jid, PublicKeyRing};

/// Looks up contacts' public keys.
///
/// Keys are owned by bare addresses; lookups ignore the resource.
pub trait KeyDirectory: Send + Sync {
    fn lookup_public_key(&self, jid: &Jid) -> Option<PublicKeyRing>;
}

/// In-memory key directory.
#[derive(Default)]
pub struct MemoryKeyDirectory {
    keys: RwLock<HashMap<Jid, PublicKeyRing>>,
}

impl MemoryKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the key for the bare form of `jid`, replacing any previous one.
    pub fn insert(&self, jid: &Jid, key: PublicKeyRing) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(jid.to_bare(), key);
    }

    pub fn remove(&self, jid: &Jid) -> Option<PublicKeyRing> {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.remove(jid)
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyDirectory for MemoryKeyDirectory {
    fn lookup_public_key(&self, jid: &Jid) -> Option<PublicKeyRing> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(jid).cloned()
    }
}
