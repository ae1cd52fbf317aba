// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the zonesync engine.
//!
//! This module provides metrics collection with the namespace prefix
//! `zonesync_` covering provider API traffic, reconciliation outcomes, and
//! cache behavior.
//!
//! # Metrics Categories
//!
//! - **Provider Request Metrics** - Per-zone and account-wide API calls
//! - **Reconciliation Metrics** - Reconcile outcomes and durations
//! - **Change Metrics** - Applied / failed change requests
//! - **Cache Metrics** - Zone state invalidation events

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all zonesync metrics
const METRICS_NAMESPACE: &str = "zonesync";

/// Request type label for zone listing
pub const REQ_LIST_ZONES: &str = "list_zones";
/// Request type label for paginated zone listing continuations
pub const REQ_LIST_ZONE_PAGES: &str = "list_zone_pages";
/// Request type label for record listing
pub const REQ_LIST_RECORDS: &str = "list_records";
/// Request type label for paginated record listing continuations
pub const REQ_LIST_RECORD_PAGES: &str = "list_record_pages";
/// Request type label for record creation
pub const REQ_CREATE: &str = "create_record";
/// Request type label for record update
pub const REQ_UPDATE: &str = "update_record";
/// Request type label for record deletion
pub const REQ_DELETE: &str = "delete_record";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Provider API requests not tied to a single zone (zone listing)
///
/// Labels:
/// - `provider`: Provider kind (e.g. `aws-route53`)
/// - `request_type`: Operation (`list_zones`, `list_zone_pages`)
pub static GENERIC_REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_generic_requests_total"),
        "Provider API requests not attributable to a single zone",
    );
    let counter = CounterVec::new(opts, &["provider", "request_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Provider API requests per zone
///
/// Labels:
/// - `zone`: Provider-specific zone id
/// - `request_type`: Operation (`list_records`, `create_record`, ...)
pub static ZONE_REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_zone_requests_total"),
        "Provider API requests per zone and request type",
    );
    let counter = CounterVec::new(opts, &["zone", "request_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of zone reconciliations by outcome
///
/// Labels:
/// - `provider`: Provider kind
/// - `status`: Outcome (`success`, `error`, `throttled`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of zone reconciliations by provider and status",
    );
    let counter = CounterVec::new(opts, &["provider", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of zone reconciliations in seconds
///
/// Labels:
/// - `provider`: Provider kind
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of zone reconciliations in seconds by provider",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["provider"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Applied and failed change requests
///
/// Labels:
/// - `provider`: Provider kind
/// - `action`: Change action (`create`, `update`, `delete`)
/// - `status`: Outcome (`applied`, `failed`, `invalid`)
pub static CHANGE_REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_change_requests_total"),
        "Change requests by provider, action and outcome",
    );
    let counter = CounterVec::new(opts, &["provider", "action", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Zone cache invalidations
///
/// Labels:
/// - `zone`: Provider-specific zone id
/// - `reason`: Why the cached state was discarded (`write_failed`, `conflict`, `expired`)
pub static CACHE_INVALIDATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_cache_invalidations_total"),
        "Zone state cache invalidations by zone and reason",
    );
    let counter = CounterVec::new(opts, &["zone", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record provider API requests not tied to a single zone.
///
/// # Arguments
/// * `provider` - Provider kind
/// * `request_type` - One of the `REQ_*` constants
/// * `count` - Number of requests issued
pub fn add_generic_requests(provider: &str, request_type: &str, count: u64) {
    GENERIC_REQUESTS_TOTAL
        .with_label_values(&[provider, request_type])
        .inc_by(count as f64);
}

/// Record provider API requests against a zone.
///
/// # Arguments
/// * `zone` - Provider-specific zone id
/// * `request_type` - One of the `REQ_*` constants
/// * `count` - Number of requests issued
pub fn add_zone_requests(zone: &str, request_type: &str, count: u64) {
    ZONE_REQUESTS_TOTAL
        .with_label_values(&[zone, request_type])
        .inc_by(count as f64);
}

/// Record a successful zone reconciliation
pub fn record_reconciliation_success(provider: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[provider, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[provider])
        .observe(duration.as_secs_f64());
}

/// Record a failed zone reconciliation
pub fn record_reconciliation_error(provider: &str, duration: Duration, throttled: bool) {
    let status = if throttled { "throttled" } else { "error" };
    RECONCILIATION_TOTAL
        .with_label_values(&[provider, status])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[provider])
        .observe(duration.as_secs_f64());
}

/// Record a change request outcome
pub fn record_change(provider: &str, action: &str, status: &str) {
    CHANGE_REQUESTS_TOTAL
        .with_label_values(&[provider, action, status])
        .inc();
}

/// Record a zone cache invalidation
pub fn record_cache_invalidation(zone: &str, reason: &str) {
    CACHE_INVALIDATIONS_TOTAL
        .with_label_values(&[zone, reason])
        .inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Returns
/// Prometheus-formatted metrics as a String
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
