// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Uniform record model shared by all provider adapters.
//!
//! Providers keep their native record shapes as the canonical in-memory form
//! and expose them through the [`RawRecord`] trait. Ingesting raw records
//! into a [`ZoneState`] materializes the derived [`DnsSet`] view that the
//! change planner consumes. The reverse index on `(name, type, value)`
//! makes the per-record delta computation O(1) per desired record.

use crate::dnsname::{DnsName, DnsSetName};
use crate::routing::RoutingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Record types handled by the engine.
///
/// `AliasA`/`AliasAaaa` model AWS ALIAS targets for the IPv4 and IPv6
/// stacks. `Meta` is an engine-internal pseudo-type carried on the wire as
/// a TXT record under a configurable name prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    TXT,
    /// AWS alias resolving to A records
    AliasA,
    /// AWS alias resolving to AAAA records
    AliasAaaa,
    NS,
    /// Ownership / bookkeeping attributes, stored as a prefixed TXT record
    Meta,
}

impl RecordType {
    /// Parse a provider record type string; `None` for unsupported types.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::AAAA),
            "CNAME" => Some(RecordType::CNAME),
            "TXT" => Some(RecordType::TXT),
            "ALIAS" | "ALIAS_A" => Some(RecordType::AliasA),
            "ALIAS_AAAA" => Some(RecordType::AliasAaaa),
            "NS" => Some(RecordType::NS),
            _ => None,
        }
    }

    /// Whether the provider owns the TTL for this type.
    #[must_use]
    pub fn is_alias(self) -> bool {
        matches!(self, RecordType::AliasA | RecordType::AliasAaaa)
    }

    /// The record type written to the provider wire.
    ///
    /// `Meta` travels as TXT; aliases keep their alias spelling so the AWS
    /// executor can tell the two stacks apart.
    #[must_use]
    pub fn wire_type(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::TXT | RecordType::Meta => "TXT",
            RecordType::AliasA => "ALIAS_A",
            RecordType::AliasAaaa => "ALIAS_AAAA",
            RecordType::NS => "NS",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_type())
    }
}

/// Canonicalize a TXT value to its double-quoted wire form.
#[must_use]
pub fn quote_txt(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        value.to_string()
    } else {
        format!("\"{value}\"")
    }
}

/// Strip the double quotes from a TXT wire value.
#[must_use]
pub fn unquote_txt(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// A single record value. Immutable once stored in a [`RecordSet`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    pub value: String,
}

impl Record {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Record {
            value: value.into(),
        }
    }
}

/// The records of one type under one set name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub rtype: RecordType,
    pub ttl: u32,
    /// Set for alias records, where the provider owns the TTL
    #[serde(default)]
    pub ignore_ttl: bool,
    pub records: Vec<Record>,
}

impl RecordSet {
    #[must_use]
    pub fn new(rtype: RecordType, ttl: u32) -> Self {
        RecordSet {
            rtype,
            ttl,
            ignore_ttl: rtype.is_alias(),
            records: Vec::new(),
        }
    }

    /// Build a set from plain values, canonicalizing TXT quoting.
    #[must_use]
    pub fn from_values<I, S>(rtype: RecordType, ttl: u32, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = RecordSet::new(rtype, ttl);
        for v in values {
            set.add(v.as_ref());
        }
        set
    }

    /// Append a value, canonicalizing TXT quoting.
    pub fn add(&mut self, value: &str) {
        let value = if matches!(self.rtype, RecordType::TXT | RecordType::Meta) {
            quote_txt(value)
        } else {
            value.to_string()
        };
        self.records.push(Record::new(value));
    }

    /// The record values in insertion order.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.value.as_str()).collect()
    }

    /// Whether both sets carry the same values, ignoring order.
    #[must_use]
    pub fn same_values(&self, other: &RecordSet) -> bool {
        if self.records.len() != other.records.len() {
            return false;
        }
        let mine: HashSet<&str> = self.records.iter().map(|r| r.value.as_str()).collect();
        other.records.iter().all(|r| mine.contains(r.value.as_str()))
    }

    /// Whether replacing `self` with `desired` requires a provider write.
    #[must_use]
    pub fn differs_from(&self, desired: &RecordSet) -> bool {
        if !self.same_values(desired) {
            return true;
        }
        if self.ignore_ttl || desired.ignore_ttl {
            return false;
        }
        self.ttl != desired.ttl
    }
}

/// All record sets sharing a single [`DnsSetName`], plus routing policy and
/// free-form attributes extracted from the META record.
///
/// Invariant: at most one [`RecordSet`] per [`RecordType`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSet {
    pub name: DnsSetName,
    pub sets: BTreeMap<RecordType, RecordSet>,
    #[serde(default)]
    pub routing_policy: Option<RoutingPolicy>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl DnsSet {
    #[must_use]
    pub fn new(name: DnsSetName) -> Self {
        DnsSet {
            name,
            sets: BTreeMap::new(),
            routing_policy: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Insert or replace the record set for its type.
    pub fn put(&mut self, set: RecordSet) {
        self.sets.insert(set.rtype, set);
    }

    #[must_use]
    pub fn get(&self, rtype: RecordType) -> Option<&RecordSet> {
        self.sets.get(&rtype)
    }

    /// The owner identity recorded in the attributes, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.attributes
            .get(crate::constants::ATTR_OWNER)
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Uniform operations every provider-native record shape implements.
///
/// `value()` for TXT records must return the canonical double-quoted form;
/// [`quote_txt`] does this for free-form provider output.
pub trait RawRecord {
    /// Record type, or `None` when the engine does not handle the type.
    fn rtype(&self) -> Option<RecordType>;
    /// Provider-assigned identifier, where the provider has one.
    fn id(&self) -> String;
    /// Record name in any spelling; normalized during ingest.
    fn dns_name(&self) -> DnsName;
    /// Routing-policy set identifier; empty when absent.
    fn set_identifier(&self) -> String;
    /// Single record value in wire form.
    fn value(&self) -> String;
    fn ttl(&self) -> u32;
    fn set_ttl(&mut self, ttl: u32);
    /// Clone through the trait object.
    fn copy(&self) -> Box<dyn RawRecord + Send>;
}

/// The cached view of one zone: all record sets keyed by set name, plus a
/// reverse index for O(1) membership checks during planning.
#[derive(Clone, Debug, Default)]
pub struct ZoneState {
    sets: BTreeMap<DnsSetName, DnsSet>,
    index: HashSet<(DnsSetName, RecordType, String)>,
}

impl ZoneState {
    #[must_use]
    pub fn new() -> Self {
        ZoneState::default()
    }

    /// Ingest one raw provider record. Unsupported types are dropped
    /// silently.
    pub fn add_record(&mut self, record: &dyn RawRecord) {
        let Some(rtype) = record.rtype() else {
            return;
        };
        self.add_value(
            DnsSetName {
                name: record.dns_name(),
                set_identifier: record.set_identifier(),
            },
            rtype,
            record.ttl(),
            &record.value(),
        );
    }

    /// Ingest one value directly; used by adapters whose APIs already
    /// deliver grouped record sets.
    pub fn add_value(&mut self, name: DnsSetName, rtype: RecordType, ttl: u32, value: &str) {
        let set = self
            .sets
            .entry(name.clone())
            .or_insert_with(|| DnsSet::new(name.clone()));
        let rs = set
            .sets
            .entry(rtype)
            .or_insert_with(|| RecordSet::new(rtype, ttl));
        rs.add(value);
        let stored = rs.records.last().map(|r| r.value.clone()).unwrap_or_default();
        self.index.insert((name, rtype, stored));
    }

    /// Attach a routing policy to an already ingested set.
    pub fn set_routing_policy(&mut self, name: &DnsSetName, policy: RoutingPolicy) {
        if let Some(set) = self.sets.get_mut(name) {
            set.routing_policy = Some(policy);
        }
    }

    /// Recognize META companion records among the ingested TXT sets.
    ///
    /// A TXT set whose values parse to attributes containing `owner` is a
    /// META record; it is re-typed and moved under the managed name derived
    /// by stripping the recorded (or default) prefix. TXT sets that don't
    /// reverse-map stay plain TXT. Providers call this after raw ingestion,
    /// before [`ZoneState::calculate_dns_sets`].
    pub fn extract_meta_sets(&mut self, zone_domain: &DnsName) {
        let mut moves: Vec<(DnsSetName, DnsSetName, RecordSet)> = Vec::new();
        for (wire_name, set) in &self.sets {
            let Some(txt) = set.sets.get(&RecordType::TXT) else {
                continue;
            };
            let attributes = crate::ownership::parse_meta_values(
                txt.records.iter().map(|r| r.value.as_str()),
            );
            if !attributes.contains_key(crate::constants::ATTR_OWNER) {
                continue;
            }
            let prefix = attributes
                .get(crate::constants::ATTR_PREFIX)
                .map_or(crate::constants::DEFAULT_META_PREFIX, String::as_str);
            if let Some(owner_name) =
                crate::ownership::meta_owner_name(wire_name, zone_domain, prefix)
            {
                let mut meta = txt.clone();
                meta.rtype = RecordType::Meta;
                moves.push((wire_name.clone(), owner_name, meta));
            }
        }
        for (wire_name, owner_name, meta) in moves {
            self.remove_set(&wire_name, RecordType::TXT);
            self.put_set(owner_name, RecordType::Meta, meta);
        }
    }

    /// Finalize the derived view after all records have been ingested.
    ///
    /// META TXT payloads are parsed into set attributes so ownership checks
    /// read structured data rather than raw TXT strings. Returns the number
    /// of materialized sets.
    pub fn calculate_dns_sets(&mut self) -> usize {
        for set in self.sets.values_mut() {
            if let Some(meta) = set.sets.get(&RecordType::Meta) {
                let attributes = crate::ownership::parse_meta_values(
                    meta.records.iter().map(|r| r.value.as_str()),
                );
                set.attributes.extend(attributes);
            }
        }
        self.sets.len()
    }

    /// Replace or insert a whole set (cache delta-apply path).
    pub fn put_set(&mut self, name: DnsSetName, rtype: RecordType, rs: RecordSet) {
        self.index.retain(|(n, t, _)| !(n == &name && *t == rtype));
        for r in &rs.records {
            self.index.insert((name.clone(), rtype, r.value.clone()));
        }
        let set = self
            .sets
            .entry(name.clone())
            .or_insert_with(|| DnsSet::new(name.clone()));
        set.sets.insert(rtype, rs);
        if rtype == RecordType::Meta {
            if let Some(meta) = set.sets.get(&RecordType::Meta) {
                let attributes = crate::ownership::parse_meta_values(
                    meta.records.iter().map(|r| r.value.as_str()),
                );
                set.attributes = attributes;
            }
        }
    }

    /// Remove one typed set (cache delta-apply path). Empty [`DnsSet`]s are
    /// dropped entirely.
    pub fn remove_set(&mut self, name: &DnsSetName, rtype: RecordType) {
        self.index.retain(|(n, t, _)| !(n == name && *t == rtype));
        if let Some(set) = self.sets.get_mut(name) {
            set.sets.remove(&rtype);
            if rtype == RecordType::Meta {
                set.attributes.clear();
            }
            if set.is_empty() {
                self.sets.remove(name);
            }
        }
    }

    /// O(1) lookup whether a concrete record value exists.
    #[must_use]
    pub fn has_record(&self, name: &DnsSetName, rtype: RecordType, value: &str) -> bool {
        self.index
            .contains(&(name.clone(), rtype, value.to_string()))
    }

    #[must_use]
    pub fn get(&self, name: &DnsSetName) -> Option<&DnsSet> {
        self.sets.get(name)
    }

    pub fn sets(&self) -> impl Iterator<Item = (&DnsSetName, &DnsSet)> {
        self.sets.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Names of NS-delegated proper subdomains, used to populate
    /// [`crate::zones::HostedZone::forwarded`].
    #[must_use]
    pub fn forwarded_subdomains(&self, base: &DnsName) -> Vec<DnsName> {
        self.sets
            .iter()
            .filter(|(name, set)| {
                set.sets.contains_key(&RecordType::NS)
                    && name.name != *base
                    && name.name.is_under(base)
            })
            .map(|(name, _)| name.name.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod records_tests;
