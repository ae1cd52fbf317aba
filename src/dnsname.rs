// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Normalized DNS names and routing-policy set keys.
//!
//! Every name handled by the engine is stored in one canonical form:
//! lower-case, fully qualified, without the trailing dot. Provider adapters
//! convert to and from their native spellings (trailing dots, escaped
//! wildcard labels) at the edge, so the planner and cache never compare
//! mixed representations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully-qualified domain name in canonical form.
///
/// Canonical form is lower-case with no trailing dot. Construction always
/// normalizes, so two `DnsName`s compare equal iff they name the same node.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DnsName(String);

impl DnsName {
    /// Create a normalized name from any spelling.
    ///
    /// Trailing dots are stripped, ASCII upper-case letters are folded, and
    /// the Route 53 wildcard escape `\052` is mapped back to `*`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut s = name.trim_end_matches('.').to_ascii_lowercase();
        if s.contains("\\052") {
            s = s.replace("\\052", "*");
        }
        DnsName(s)
    }

    /// The canonical textual form (no trailing dot).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The provider wire form with a trailing dot.
    #[must_use]
    pub fn to_fqdn(&self) -> String {
        format!("{}.", self.0)
    }

    /// Whether the first label is the wildcard label `*`.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == "*" || self.0.starts_with("*.")
    }

    /// Strip a leading wildcard label, if present.
    #[must_use]
    pub fn without_wildcard(&self) -> DnsName {
        match self.0.strip_prefix("*.") {
            Some(rest) => DnsName(rest.to_string()),
            None => self.clone(),
        }
    }

    /// Whether `self` equals `domain` or lies underneath it.
    #[must_use]
    pub fn is_under(&self, domain: &DnsName) -> bool {
        self == domain || self.0.ends_with(&format!(".{}", domain.0))
    }

    /// Prepend a label prefix to the first label of the name.
    ///
    /// A wildcard keeps its position: `*.x` becomes `*.<prefix>x`.
    #[must_use]
    pub fn with_label_prefix(&self, prefix: &str) -> DnsName {
        if let Some(rest) = self.0.strip_prefix("*.") {
            DnsName(format!("*.{prefix}{rest}"))
        } else {
            DnsName(format!("{prefix}{}", self.0))
        }
    }
}

impl fmt::Display for DnsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DnsName {
    fn from(s: &str) -> Self {
        DnsName::new(s)
    }
}

/// Key of a record set within a zone: a name plus an optional routing-policy
/// set identifier.
///
/// The identifier is empty for records that do not participate in a routing
/// policy; otherwise it is a provider-opaque tag grouping sibling sets under
/// the same policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DnsSetName {
    /// Canonical DNS name
    pub name: DnsName,
    /// Routing-policy set identifier; empty when the set has no policy
    #[serde(default)]
    pub set_identifier: String,
}

impl DnsSetName {
    /// Key without a set identifier.
    #[must_use]
    pub fn plain(name: DnsName) -> Self {
        DnsSetName {
            name,
            set_identifier: String::new(),
        }
    }

    /// Key carrying a routing-policy set identifier.
    #[must_use]
    pub fn with_identifier(name: DnsName, set_identifier: &str) -> Self {
        DnsSetName {
            name,
            set_identifier: set_identifier.to_string(),
        }
    }

    /// Same name, different set identifier.
    #[must_use]
    pub fn rename(&self, name: DnsName) -> Self {
        DnsSetName {
            name,
            set_identifier: self.set_identifier.clone(),
        }
    }
}

impl fmt::Display for DnsSetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.set_identifier.is_empty() {
            f.write_str(self.name.as_str())
        } else {
            write!(f, "{}#{}", self.name, self.set_identifier)
        }
    }
}

#[cfg(test)]
#[path = "dnsname_tests.rs"]
mod dnsname_tests;
