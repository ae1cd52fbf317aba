// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired-state resource kinds published by the external object store.
//!
//! The watch/informer layer against the API server is an external
//! collaborator; the engine consumes the three resource kinds as plain
//! data: *Provider* (credentials + zone selection + rate-limit and batching
//! config), *Entry* (a desired DNS name with targets), and
//! *HostedZonePolicy* (per-zone overrides). Each [`Entry`] carries a
//! completion handle through planning and execution so the external layer
//! can observe the terminal state.

use crate::constants::{
    CLASS_ANNOTATION, DEFAULT_CLASS, DEFAULT_RECORD_TTL_SECS, IP_STACK_ANNOTATION,
};
use crate::alias::IpStack;
use crate::dnsname::DnsName;
use crate::errors::ProviderError;
use crate::routing::RoutingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Rate limiter configuration of a Provider resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub qps: f64,
    pub burst: u32,
}

fn default_true() -> bool {
    true
}

/// A Provider resource: credentials, zone selection, and executor tuning
/// for one provider account.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Resource name, unique per engine instance
    pub name: String,
    /// Provider kind string, e.g. `aws-route53`
    #[serde(rename = "type")]
    pub kind: String,
    /// Credential properties; keys are provider-specific (see the
    /// credential table in the documentation)
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    /// Token bucket settings; engine defaults apply when absent
    #[serde(default)]
    pub rate_limits: Option<RateLimitConfig>,
    /// Change requests per batch, clamped to 1..=50
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Retries for retryable provider calls
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Zone ids or domains this provider should manage; empty means all
    #[serde(default)]
    pub include_zones: Vec<String>,
    /// Zone ids or domains to skip
    #[serde(default)]
    pub exclude_zones: Vec<String>,
}

impl ProviderConfig {
    /// Fetch a credential property.
    #[must_use]
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }

    /// Fetch a required credential property.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] naming the missing key.
    pub fn required_credential(&self, key: &str) -> Result<&str, ProviderError> {
        self.credential(key).ok_or_else(|| ProviderError::Fatal {
            message: format!("provider '{}' is missing credential '{key}'", self.name),
        })
    }

    /// Whether this provider selects the given zone.
    #[must_use]
    pub fn selects_zone(&self, zone_id: &str, domain: &str) -> bool {
        let matches = |needle: &String| needle == zone_id || needle == domain;
        if self.exclude_zones.iter().any(matches) {
            return false;
        }
        self.include_zones.is_empty() || self.include_zones.iter().any(matches)
    }
}

/// Per-zone overrides resolved at plan time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedZonePolicy {
    /// Zone id or base domain the policy applies to
    pub zone: String,
    /// Lower bound applied to entry TTLs
    #[serde(default)]
    pub ttl_min: Option<u32>,
    /// Upper bound applied to entry TTLs
    #[serde(default)]
    pub ttl_max: Option<u32>,
    /// Batch size override for this zone
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl HostedZonePolicy {
    /// Whether the policy targets the given zone.
    #[must_use]
    pub fn applies_to(&self, zone_id: &str, domain: &str) -> bool {
        self.zone == zone_id || self.zone == domain
    }

    /// Clamp a TTL into the policy's bounds.
    #[must_use]
    pub fn clamp_ttl(&self, ttl: u32) -> u32 {
        let ttl = self.ttl_min.map_or(ttl, |min| ttl.max(min));
        self.ttl_max.map_or(ttl, |max| ttl.min(max))
    }
}

/// Select the first policy applying to a zone.
#[must_use]
pub fn policy_for<'a>(
    policies: &'a [HostedZonePolicy],
    zone_id: &str,
    domain: &str,
) -> Option<&'a HostedZonePolicy> {
    policies.iter().find(|p| p.applies_to(zone_id, domain))
}

/// An Entry resource: one desired DNS name with its targets.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// The desired DNS name
    pub dns_name: DnsName,
    /// Address or hostname targets (A / AAAA / CNAME)
    #[serde(default)]
    pub targets: Vec<String>,
    /// TXT values
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Routing policy; requires `set_identifier` and vice versa
    #[serde(default)]
    pub routing_policy: Option<RoutingPolicy>,
    #[serde(default)]
    pub set_identifier: Option<String>,
    /// Owner identity overriding the engine identity
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Marked stale by the external layer; existing records are preserved
    /// unchanged
    #[serde(default)]
    pub stale: bool,
    /// Completion handle; attached by the intake layer
    #[serde(skip)]
    pub done: Option<Arc<EntryDone>>,
}

impl Entry {
    /// The engine class this entry is addressed to.
    #[must_use]
    pub fn class(&self) -> &str {
        self.annotations
            .get(CLASS_ANNOTATION)
            .map_or(DEFAULT_CLASS, String::as_str)
    }

    /// The alias address families requested via annotation.
    #[must_use]
    pub fn ip_stack(&self) -> IpStack {
        self.annotations
            .get(IP_STACK_ANNOTATION)
            .map_or(IpStack::default(), |v| IpStack::parse(v))
    }

    /// Effective TTL before per-zone policy clamping.
    #[must_use]
    pub fn effective_ttl(&self) -> u32 {
        self.ttl.unwrap_or(DEFAULT_RECORD_TTL_SECS)
    }

    /// Owner identity, falling back to the engine identity.
    #[must_use]
    pub fn owner_or<'a>(&'a self, identity: &'a str) -> &'a str {
        self.owner.as_deref().unwrap_or(identity)
    }
}

/// Terminal state of one entry's reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EntryPhase {
    /// Not yet decided
    #[default]
    Pending,
    /// All change requests for the entry were applied
    Applied,
    /// A retryable failure; the zone will be reconciled again
    Failed(String),
    /// The entry can never be written; no retry
    Invalid(String),
}

/// Completion handle shared between an entry and its change requests.
///
/// Thread-safe: executors report from worker tasks. An entry that was
/// already marked `Invalid` keeps that verdict; later batch-level failures
/// do not downgrade it.
#[derive(Debug, Default)]
pub struct EntryDone {
    phase: Mutex<EntryPhase>,
}

impl EntryDone {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(EntryDone::default())
    }

    #[must_use]
    pub fn phase(&self) -> EntryPhase {
        self.phase.lock().expect("entry phase lock").clone()
    }

    pub fn succeeded(&self) {
        let mut phase = self.phase.lock().expect("entry phase lock");
        if matches!(*phase, EntryPhase::Pending) {
            *phase = EntryPhase::Applied;
        }
    }

    pub fn failed(&self, err: &ProviderError) {
        let mut phase = self.phase.lock().expect("entry phase lock");
        if !matches!(*phase, EntryPhase::Invalid(_)) {
            *phase = EntryPhase::Failed(err.to_string());
        }
    }

    pub fn set_invalid(&self, err: &ProviderError) {
        let mut phase = self.phase.lock().expect("entry phase lock");
        *phase = EntryPhase::Invalid(err.to_string());
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
