// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mailbox addresses. */

use std::fmt::{Display, Formatter};

/// A mailbox: an optional display name plus an RFC 5322 addr-spec.
///
/// Only the addr-spec participates in certificate resolution; the display
/// name rides along for the MIME layer. Full address parsing and
/// serialization is the MIME layer's job, so none happens here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mailbox {
    name: Option<String>,
    address: String,
}

impl Mailbox {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        Self {
            name: name.map(|n| n.to_string()),
            address: address.to_string(),
        }
    }

    /// The display name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The addr-spec. This is what certificates are matched against.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether this mailbox's addr-spec matches `other`, case-insensitively.
    ///
    /// Address-specs are matched whole. Case-insensitive comparison of the
    /// local part is not strictly RFC-conformant but matches what every
    /// deployed mail client does when pairing certificates with senders.
    pub fn address_matches(&self, other: &str) -> bool {
        self.address.eq_ignore_ascii_case(other)
    }
}

impl From<&str> for Mailbox {
    fn from(address: &str) -> Self {
        Self::new(None, address)
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_matching_ignores_case() {
        let mbox = Mailbox::new(Some("Alice"), "Alice@Example.COM");
        assert!(mbox.address_matches("alice@example.com"));
        assert!(!mbox.address_matches("bob@example.com"));
    }

    #[test]
    fn display_forms() {
        assert_eq!(
            Mailbox::new(Some("Alice"), "alice@example.com").to_string(),
            "Alice <alice@example.com>"
        );
        assert_eq!(Mailbox::from("bob@example.com").to_string(), "bob@example.com");
    }
}
