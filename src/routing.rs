// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provider-independent routing policies.
//!
//! A routing policy selects among multiple record sets sharing one DNS name.
//! The engine validates policies generically here; each executor translates
//! them into its provider's native encoding (Route 53 per-record fields,
//! Google per-name policy item arrays) and back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Supported routing policy kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    Weighted,
    Latency,
    Geolocation,
    IpBased,
    Failover,
}

impl PolicyKind {
    /// Parameter keys that must be present for this kind.
    #[must_use]
    pub fn required_parameters(self) -> &'static [&'static str] {
        match self {
            PolicyKind::Weighted => &["weight"],
            PolicyKind::Latency => &["region"],
            PolicyKind::Geolocation => &["location"],
            PolicyKind::IpBased => &["collection", "location"],
            PolicyKind::Failover => &["failoverRecordType"],
        }
    }

    /// Parameter keys that may be present in addition.
    #[must_use]
    pub fn optional_parameters(self) -> &'static [&'static str] {
        match self {
            PolicyKind::Weighted | PolicyKind::Latency | PolicyKind::Geolocation => {
                &["healthCheckID"]
            }
            PolicyKind::IpBased => &["healthCheckID"],
            PolicyKind::Failover => &["disableEvaluateTargetHealth", "healthCheckID"],
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyKind::Weighted => "weighted",
            PolicyKind::Latency => "latency",
            PolicyKind::Geolocation => "geolocation",
            PolicyKind::IpBased => "ip-based",
            PolicyKind::Failover => "failover",
        };
        f.write_str(s)
    }
}

/// A routing policy: a kind plus string parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl RoutingPolicy {
    #[must_use]
    pub fn new(kind: PolicyKind) -> Self {
        RoutingPolicy {
            kind,
            parameters: BTreeMap::new(),
        }
    }

    /// Builder-style parameter insertion.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Validate the parameter set against the kind's contract.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation: a missing required key,
    /// an unknown key, or a malformed well-known value.
    pub fn validate(&self) -> Result<(), String> {
        for key in self.kind.required_parameters() {
            if !self.parameters.contains_key(*key) {
                return Err(format!(
                    "{} routing policy requires parameter '{key}'",
                    self.kind
                ));
            }
        }
        for key in self.parameters.keys() {
            let known = self.kind.required_parameters().contains(&key.as_str())
                || self.kind.optional_parameters().contains(&key.as_str());
            if !known {
                return Err(format!(
                    "unknown parameter '{key}' for {} routing policy",
                    self.kind
                ));
            }
        }
        match self.kind {
            PolicyKind::Weighted => {
                let weight = self.parameter("weight").unwrap_or_default();
                match weight.parse::<i64>() {
                    Ok(w) if w >= 0 => {}
                    _ => {
                        return Err(format!(
                            "weighted routing policy weight '{weight}' must be a non-negative integer"
                        ));
                    }
                }
            }
            PolicyKind::Failover => {
                let kind = self.parameter("failoverRecordType").unwrap_or_default();
                if !matches!(kind.to_ascii_uppercase().as_str(), "PRIMARY" | "SECONDARY") {
                    return Err(format!(
                        "failover routing policy failoverRecordType '{kind}' must be PRIMARY or SECONDARY"
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Parsed weight for weighted policies.
    #[must_use]
    pub fn weight(&self) -> Option<i64> {
        if self.kind != PolicyKind::Weighted {
            return None;
        }
        self.parameter("weight").and_then(|w| w.parse().ok())
    }
}

/// Parse a weighted-round-robin item index from a set identifier.
///
/// Google encodes weighted policy membership positionally, so the set
/// identifier must be a small integer. Returns `None` outside `0..=max`.
#[must_use]
pub fn wrr_index(set_identifier: &str, max: usize) -> Option<usize> {
    let idx: usize = set_identifier.parse().ok()?;
    (idx <= max).then_some(idx)
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod routing_tests;
