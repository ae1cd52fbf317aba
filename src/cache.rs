// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-zone caching of provider state.
//!
//! Two modes exist: *zones-only* caches just the hosted zone list and
//! refetches zone state on every plan; *zone-state* additionally caches the
//! record state per zone. Cached entries carry a fetch timestamp and expire
//! after a TTL. A cache entry is only ever in one of two states, fresh or
//! invalid: after any failed write the zone state reverts to "unknown" so
//! no partially-applied delta can survive.

use crate::dnsname::DnsSetName;
use crate::errors::ProviderError;
use crate::metrics;
use crate::ownership::meta_owner_name;
use crate::plan::{ChangeAction, ChangeRequest};
use crate::records::{RecordType, ZoneState};
use crate::zones::{HostedZone, ZoneId};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Cache operating mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    /// Cache the hosted zone list only
    ZonesOnly,
    /// Cache zone list and per-zone record state
    ZoneState,
}

#[derive(Debug)]
struct Cached<T> {
    value: T,
    fetched: Instant,
}

impl<T> Cached<T> {
    fn fresh(value: T) -> Self {
        Cached {
            value,
            fetched: Instant::now(),
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.fetched.elapsed() >= ttl
    }
}

/// Per-provider-account cache of hosted zones and zone states.
pub struct ZoneCache {
    mode: CacheMode,
    zones_ttl: Duration,
    state_ttl: Duration,
    zones: Mutex<Option<Cached<Vec<HostedZone>>>>,
    states: Mutex<HashMap<ZoneId, Cached<ZoneState>>>,
}

impl ZoneCache {
    #[must_use]
    pub fn new(mode: CacheMode) -> Self {
        ZoneCache {
            mode,
            zones_ttl: Duration::from_secs(crate::constants::ZONE_LIST_CACHE_TTL_SECS),
            state_ttl: Duration::from_secs(crate::constants::ZONE_STATE_CACHE_TTL_SECS),
            zones: Mutex::new(None),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Override the TTLs, mainly for tests.
    #[must_use]
    pub fn with_ttls(mut self, zones_ttl: Duration, state_ttl: Duration) -> Self {
        self.zones_ttl = zones_ttl;
        self.state_ttl = state_ttl;
        self
    }

    #[must_use]
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Return the cached zone list or run the loader.
    ///
    /// # Errors
    ///
    /// Propagates the loader error; the cache keeps its previous content in
    /// that case.
    pub async fn get_zones<F, Fut>(&self, load: F) -> Result<Vec<HostedZone>, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<HostedZone>, ProviderError>>,
    {
        let mut zones = self.zones.lock().await;
        if let Some(cached) = zones.as_ref() {
            if !cached.expired(self.zones_ttl) {
                return Ok(cached.value.clone());
            }
        }
        let loaded = load().await?;
        debug!(count = loaded.len(), "hosted zone list refreshed");
        *zones = Some(Cached::fresh(loaded.clone()));
        Ok(loaded)
    }

    /// Return the cached state of a zone or run the loader.
    ///
    /// In zones-only mode the loader runs on every call.
    ///
    /// # Errors
    ///
    /// Propagates the loader error.
    pub async fn get_zone_state<F, Fut>(
        &self,
        zone: &ZoneId,
        load: F,
    ) -> Result<ZoneState, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ZoneState, ProviderError>>,
    {
        if self.mode == CacheMode::ZonesOnly {
            return load().await;
        }
        let mut states = self.states.lock().await;
        if let Some(cached) = states.get(zone) {
            if !cached.expired(self.state_ttl) {
                return Ok(cached.value.clone());
            }
            metrics::record_cache_invalidation(zone.as_str(), "expired");
        }
        let loaded = load().await?;
        debug!(zone = %zone, sets = loaded.len(), "zone state refreshed");
        states.insert(zone.clone(), Cached::fresh(loaded.clone()));
        Ok(loaded)
    }

    /// Fold executed change requests into the cached state.
    ///
    /// On success every request is delta-applied; on failure the zone state
    /// is invalidated so the next access refetches. There is never a
    /// partially-applied delta: requests that were reported failed at the
    /// batch level arrive here under `Err` and drop the whole zone entry.
    pub async fn apply_requests(
        &self,
        result: Result<(), &ProviderError>,
        zone: &HostedZone,
        requests: &[ChangeRequest],
    ) {
        if self.mode == CacheMode::ZonesOnly {
            return;
        }
        let mut states = self.states.lock().await;
        match result {
            Err(err) => {
                info!(zone = %zone.id, error = %err, "invalidating zone state after failed write");
                metrics::record_cache_invalidation(zone.id.as_str(), "write_failed");
                states.remove(&zone.id);
            }
            Ok(()) => {
                let Some(cached) = states.get_mut(&zone.id) else {
                    return;
                };
                for request in requests {
                    apply_one(&mut cached.value, zone, request);
                }
            }
        }
    }

    /// Invalidate a zone after an externally detected conflict.
    ///
    /// Returns `true` when the invalidation was newly effective, so callers
    /// can suppress repeated retries for the same conflict.
    pub async fn report_zone_state_conflict(&self, zone: &ZoneId, err: &ProviderError) -> bool {
        let mut states = self.states.lock().await;
        let invalidated = states.remove(zone).is_some();
        if invalidated {
            info!(zone = %zone, error = %err, "zone state invalidated after conflict");
            metrics::record_cache_invalidation(zone.as_str(), "conflict");
        }
        invalidated
    }

    /// Drop all cached state, e.g. after provider reconfiguration.
    pub async fn clear(&self) {
        self.zones.lock().await.take();
        self.states.lock().await.clear();
    }
}

/// Delta-apply one change request to a cached zone state.
///
/// META requests carry the prefixed wire name; they are mapped back to the
/// managed name so the cached view matches what a fresh load would build.
fn apply_one(state: &mut ZoneState, zone: &HostedZone, request: &ChangeRequest) {
    let name = logical_name(zone, request);
    match request.action {
        ChangeAction::Create | ChangeAction::Update => {
            if let Some(addition) = &request.addition {
                state.put_set(name.clone(), request.rtype, addition.clone());
                if let Some(policy) = &request.routing_policy {
                    state.set_routing_policy(&name, policy.clone());
                }
            }
        }
        ChangeAction::Delete => {
            state.remove_set(&name, request.rtype);
        }
    }
}

fn logical_name(zone: &HostedZone, request: &ChangeRequest) -> DnsSetName {
    if request.rtype != RecordType::Meta {
        return request.name.clone();
    }
    let values: Vec<&str> = request
        .payload()
        .records
        .iter()
        .map(|r| r.value.as_str())
        .collect();
    let attributes = crate::ownership::parse_meta_values(values.into_iter());
    let prefix = attributes
        .get(crate::constants::ATTR_PREFIX)
        .map_or(crate::constants::DEFAULT_META_PREFIX, String::as_str);
    meta_owner_name(&request.name, &zone.domain, prefix).unwrap_or_else(|| request.name.clone())
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
