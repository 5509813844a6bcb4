// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contacts and chat membership.

use serde::{Deserialize, Serialize};

use crate::identity::{Jid, PublicKeyRing};

/// A contact as seen by the delivery core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    jid: Jid,
    name: String,
    #[serde(default)]
    is_me: bool,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    blocked: bool,
    /// The user wants messages to this contact encrypted.
    #[serde(default)]
    encrypted: bool,
    /// Fingerprint of the contact's public key, if one is known.
    #[serde(default)]
    key_fingerprint: Option<String>,
}

impl Contact {
    pub fn new(jid: Jid, name: &str) -> Self {
        Contact {
            jid: jid.to_bare(),
            name: name.to_string(),
            is_me: false,
            deleted: false,
            blocked: false,
            encrypted: false,
            key_fingerprint: None,
        }
    }

    /// The local user's own contact entry.
    pub fn me(jid: Jid) -> Self {
        Contact {
            is_me: true,
            ..Contact::new(jid, "")
        }
    }

    /// Records the contact's public key and enables encryption.
    pub fn with_key(mut self, key: &PublicKeyRing) -> Self {
        self.key_fingerprint = Some(key.fingerprint());
        self.encrypted = true;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encrypted = enabled;
        self
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_me(&self) -> bool {
        self.is_me
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn wants_encryption(&self) -> bool {
        self.encrypted
    }

    pub fn has_key(&self) -> bool {
        self.key_fingerprint.is_some()
    }

    pub fn key_fingerprint(&self) -> Option<&str> {
        self.key_fingerprint.as_deref()
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub fn set_key(&mut self, key: Option<&PublicKeyRing>) {
        self.key_fingerprint = key.map(|k| k.fingerprint());
    }

    /// Whether messages can be addressed to this contact.
    pub fn is_valid(&self) -> bool {
        !self.is_me && !self.deleted && !self.blocked && self.jid.is_valid()
    }
}

/// Role of a member in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

/// A contact together with its role in one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub(crate) id: i64,
    pub contact: Contact,
    pub role: Role,
}

impl Member {
    pub fn new(contact: Contact, role: Role) -> Self {
        Member {
            id: crate::storage::INVALID_ID,
            contact,
            role,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PersonalKey;

    #[test]
    fn test_validity() {
        let mut bob = Contact::new(Jid::parse("bob@example.org/phone"), "Bob");
        assert_eq!(bob.jid().resource(), None);
        assert!(bob.is_valid());

        bob.set_blocked(true);
        assert!(!bob.is_valid());

        assert!(!Contact::me(Jid::parse("alice@example.org")).is_valid());
    }

    #[test]
    fn test_with_key_enables_encryption() {
        let key = PersonalKey::generate("Bob <bob@example.org>").public_key_ring();
        let bob = Contact::new(Jid::parse("bob@example.org"), "Bob").with_key(&key);
        assert!(bob.has_key());
        assert!(bob.wants_encryption());
        assert_eq!(bob.key_fingerprint(), Some(key.fingerprint().as_str()));
    }

    #[test]
    fn test_contact_json_roundtrip() {
        let bob = Contact::new(Jid::parse("bob@example.org"), "Bob").with_encryption(true);
        let json = serde_json::to_string(&bob).unwrap();
        assert_eq!(serde_json::from_str::<Contact>(&json).unwrap(), bob);
    }
}
