// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network addresses (`local@domain/resource`).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A chat network address.
///
/// Equality and hashing compare local part and domain case-insensitively and
/// ignore the resource, so a full address equals its bare form.
#[derive(Debug, Clone)]
pub struct Jid {
    local: String,
    domain: String,
    resource: String,
}

impl Jid {
    /// Parses an address. Never fails; use [`Jid::is_valid`] to check the result.
    pub fn parse(address: &str) -> Self {
        let address = address.trim();
        let (rest, resource) = match address.split_once('/') {
            Some((rest, resource)) => (rest, resource),
            None => (address, ""),
        };
        let (local, domain) = match rest.split_once('@') {
            Some((local, domain)) => (local, domain),
            None => ("", rest),
        };

        Jid {
            local: local.to_string(),
            domain: domain.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Builds a bare address from its parts.
    pub fn bare_from(local: &str, domain: &str) -> Self {
        Jid {
            local: local.to_string(),
            domain: domain.to_string(),
            resource: String::new(),
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        (!self.resource.is_empty()).then_some(self.resource.as_str())
    }

    /// Has a local part, a domain and a resource.
    pub fn is_full(&self) -> bool {
        !self.local.is_empty() && !self.resource.is_empty()
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_empty()
    }

    /// Has a non-empty local part and a domain without whitespace or extra `@`.
    pub fn is_valid(&self) -> bool {
        let well_formed = |s: &str| !s.is_empty() && !s.contains(char::is_whitespace) && !s.contains('@');
        well_formed(&self.local) && well_formed(&self.domain)
    }

    /// The address without resource.
    pub fn to_bare(&self) -> Jid {
        Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: String::new(),
        }
    }

    /// String form of the bare address.
    pub fn bare_string(&self) -> String {
        if self.local.is_empty() {
            self.domain.clone()
        } else {
            format!("{}@{}", self.local, self.domain)
        }
    }
}

impl PartialEq for Jid {
    fn eq(&self, other: &Self) -> bool {
        self.local.eq_ignore_ascii_case(&other.local) && self.domain.eq_ignore_ascii_case(&other.domain)
    }
}

impl Eq for Jid {}

impl Hash for Jid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local.to_ascii_lowercase().hash(state);
        self.domain.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bare_string())?;
        if !self.resource.is_empty() {
            write!(f, "/{}", self.resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Jid::parse(s))
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Jid::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let jid = Jid::parse("Alice@Example.org/desktop");
        assert_eq!(jid.local(), "Alice");
        assert_eq!(jid.domain(), "Example.org");
        assert_eq!(jid.resource(), Some("desktop"));
        assert!(jid.is_full());
        assert!(jid.is_valid());
    }

    #[test]
    fn test_parse_domain_only() {
        let jid = Jid::parse("example.org");
        assert_eq!(jid.local(), "");
        assert!(!jid.is_valid());
        assert_eq!(jid.to_string(), "example.org");
    }

    #[test]
    fn test_equality_ignores_case_and_resource() {
        let a = Jid::parse("alice@example.org/phone");
        let b = Jid::parse("ALICE@example.ORG");
        assert_eq!(a, b);
        assert_ne!(a, Jid::parse("bob@example.org"));
    }

    #[test]
    fn test_to_bare_drops_resource() {
        let jid = Jid::parse("alice@example.org/phone").to_bare();
        assert!(jid.is_bare());
        assert_eq!(jid.to_string(), "alice@example.org");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(!Jid::parse("").is_valid());
        assert!(!Jid::parse("a b@example.org").is_valid());
        assert!(!Jid::parse("a@b@example.org").is_valid());
    }
}
