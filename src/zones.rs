// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Hosted zone descriptors and zone selection.
//!
//! A [`HostedZone`] describes one authoritative zone in a provider account.
//! Zones are discovered through [`crate::provider::DnsHandler::get_zones`]
//! and retained while at least one Provider resource selects them. The
//! `forwarded` list names subdomains delegated away via NS records; desired
//! names under a forwarded subdomain must not be written into this zone.

use crate::dnsname::DnsName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider-scoped zone identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        ZoneId(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One authoritative DNS zone in an external provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    /// Provider kind string, e.g. `aws-route53`
    pub provider_type: String,
    /// Provider-specific zone id
    pub id: ZoneId,
    /// Base domain of the zone, normalized
    pub domain: DnsName,
    /// Opaque provider key (account id, project, server name)
    pub key: String,
    /// Subdomains delegated away via NS records. Optional metadata; an
    /// empty list is valid. Never contains `domain` itself.
    #[serde(default)]
    pub forwarded: Vec<DnsName>,
    /// Whether the zone is private to the provider account
    #[serde(default)]
    pub private: bool,
}

impl HostedZone {
    #[must_use]
    pub fn new(provider_type: &str, id: ZoneId, domain: DnsName, key: &str) -> Self {
        HostedZone {
            provider_type: provider_type.to_string(),
            id,
            domain,
            key: key.to_string(),
            forwarded: Vec::new(),
            private: false,
        }
    }

    /// Record delegated subdomains, dropping the base domain if present.
    pub fn set_forwarded(&mut self, mut forwarded: Vec<DnsName>) {
        forwarded.retain(|sub| *sub != self.domain);
        self.forwarded = forwarded;
    }

    /// Whether a desired name belongs in this zone: under the base domain
    /// and not under any forwarded subdomain.
    #[must_use]
    pub fn covers(&self, name: &DnsName) -> bool {
        if !name.is_under(&self.domain) {
            return false;
        }
        !self.forwarded.iter().any(|sub| name.is_under(sub))
    }

    /// The forwarded subdomain shadowing a name, if any.
    #[must_use]
    pub fn forwarded_to(&self, name: &DnsName) -> Option<&DnsName> {
        self.forwarded.iter().find(|sub| name.is_under(sub))
    }
}

/// Select the zone responsible for a name: the longest base domain that
/// covers it wins, so a child zone shadows its parent.
#[must_use]
pub fn find_zone_for<'a>(zones: &'a [HostedZone], name: &DnsName) -> Option<&'a HostedZone> {
    zones
        .iter()
        .filter(|zone| zone.covers(name))
        .max_by_key(|zone| zone.domain.as_str().len())
}

#[cfg(test)]
#[path = "zones_tests.rs"]
mod zones_tests;
