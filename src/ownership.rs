// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ownership protocol carried in META TXT records.
//!
//! Each managed DNS name has a companion TXT record at
//! `<prefix><name>` holding `key=value` attributes. The `owner` attribute is
//! the authoritative ownership field: an engine only touches sets whose
//! owner matches its configured identity, adopts unowned sets, and refuses
//! foreign ones. Ownership writes always travel in the same batch as the
//! record-set change they describe, so observers never see a mismatched
//! ownership/record pair.

use crate::constants::{ATTR_OWNER, ATTR_PREFIX, DEFAULT_META_PREFIX};
use crate::dnsname::{DnsName, DnsSetName};
use crate::records::{quote_txt, unquote_txt, DnsSet};
use std::collections::BTreeMap;

/// Outcome of comparing a set's recorded owner with our identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnershipState {
    /// Owned by this process; changes proceed.
    Owned,
    /// No owner recorded; the set may be adopted.
    Unowned,
    /// Owned by another process; the set is never modified.
    Foreign { owner: String },
}

/// Classify a cached set against the engine identity.
#[must_use]
pub fn classify(existing: Option<&DnsSet>, identity: &str) -> OwnershipState {
    match existing.and_then(DnsSet::owner) {
        None => OwnershipState::Unowned,
        Some(owner) if owner == identity => OwnershipState::Owned,
        Some(owner) => OwnershipState::Foreign {
            owner: owner.to_string(),
        },
    }
}

/// Parse META TXT wire values into an attribute map.
///
/// Values are double-quoted on the wire; each holds space-separated
/// `key=value` pairs. Malformed fragments are skipped.
#[must_use]
pub fn parse_meta_values<'a, I>(values: I) -> BTreeMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut attributes = BTreeMap::new();
    for value in values {
        for pair in unquote_txt(value).split_whitespace() {
            if let Some((key, val)) = pair.split_once('=') {
                if !key.is_empty() {
                    attributes.insert(key.to_string(), val.to_string());
                }
            }
        }
    }
    attributes
}

/// Render an attribute map to the double-quoted META TXT wire value.
#[must_use]
pub fn format_meta_value(attributes: &BTreeMap<String, String>) -> String {
    let body = attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    quote_txt(&body)
}

/// Attributes for a freshly adopted or rewritten META record.
#[must_use]
pub fn meta_attributes(identity: &str, prefix: &str) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    attributes.insert(ATTR_OWNER.to_string(), identity.to_string());
    if prefix != DEFAULT_META_PREFIX {
        attributes.insert(ATTR_PREFIX.to_string(), prefix.to_string());
    }
    attributes
}

/// The META record prefix recorded for a set, falling back to the default.
#[must_use]
pub fn meta_prefix_of(set: &DnsSet) -> &str {
    set.attributes
        .get(ATTR_PREFIX)
        .map_or(DEFAULT_META_PREFIX, String::as_str)
}

/// Compute the name of the META record companion for a managed name.
///
/// The prefix is prepended to the first label; a wildcard keeps its
/// position (`*.x` maps to `*.<prefix>x`). When the managed name is the
/// zone's base domain, plain prefixing would land the record outside the
/// zone, so the prefix gains a `base.` label instead (`example.com` with
/// prefix `comment-` maps to `comment-base.example.com`).
#[must_use]
pub fn meta_record_name(name: &DnsSetName, zone_domain: &DnsName, prefix: &str) -> DnsSetName {
    let mapped = if name.name == *zone_domain {
        let collapsed = prefix.trim_end_matches('-');
        DnsName::new(&format!("{collapsed}-base.{}", name.name))
    } else {
        name.name.with_label_prefix(prefix)
    };
    name.rename(mapped)
}

/// Invert [`meta_record_name`]: the managed name a META wire name belongs
/// to, or `None` when the wire name does not carry the prefix.
#[must_use]
pub fn meta_owner_name(
    wire_name: &DnsSetName,
    zone_domain: &DnsName,
    prefix: &str,
) -> Option<DnsSetName> {
    let collapsed = prefix.trim_end_matches('-');
    let base_meta = DnsName::new(&format!("{collapsed}-base.{zone_domain}"));
    if wire_name.name == base_meta {
        return Some(wire_name.rename(zone_domain.clone()));
    }
    let raw = wire_name.name.as_str();
    let owner = if let Some(rest) = raw.strip_prefix("*.") {
        let stripped = rest.strip_prefix(prefix)?;
        DnsName::new(&format!("*.{stripped}"))
    } else {
        DnsName::new(raw.strip_prefix(prefix)?)
    };
    if owner.as_str().is_empty() {
        return None;
    }
    Some(wire_name.rename(owner))
}

#[cfg(test)]
#[path = "ownership_tests.rs"]
mod ownership_tests;
