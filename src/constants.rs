// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the zonesync engine.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Engine Identity Constants
// ============================================================================

/// Annotation selecting which engine instance acts on a resource
pub const CLASS_ANNOTATION: &str = "dns.gardener.cloud/class";

/// Annotation controlling alias mapping for CNAME targets
pub const IP_STACK_ANNOTATION: &str = "dns.gardener.cloud/ip-stack";

/// Default engine class when a resource carries no class annotation
pub const DEFAULT_CLASS: &str = "gardendns";

// ============================================================================
// Ownership / META Record Constants
// ============================================================================

/// Default name prefix for META TXT records
pub const DEFAULT_META_PREFIX: &str = "comment-";

/// META attribute carrying the owner identity
pub const ATTR_OWNER: &str = "owner";

/// META attribute carrying a non-default record name prefix
pub const ATTR_PREFIX: &str = "prefix";

/// META attribute carrying introspection data for mapped CNAME targets
pub const ATTR_CNAMES: &str = "cnames";

// ============================================================================
// DNS Protocol Constants
// ============================================================================

/// Default TTL for managed records (5 minutes)
pub const DEFAULT_RECORD_TTL_SECS: u32 = 300;

/// TSIG fudge time in seconds (allows for clock skew)
pub const TSIG_FUDGE_TIME_SECS: u64 = 300;

/// Standard DNS port for dynamic updates
pub const DNS_PORT: u16 = 53;

// ============================================================================
// Executor Constants
// ============================================================================

/// Default number of change requests per provider batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Smallest permitted batch size
pub const MIN_BATCH_SIZE: usize = 1;

/// Largest permitted batch size
pub const MAX_BATCH_SIZE: usize = 50;

/// Default per-call HTTP timeout (60 seconds)
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Retries absorbed inside Route 53 record-list pagination before giving up
pub const AWS_PAGINATION_MAX_RETRIES: u32 = 7;

/// Base sleep before a pagination retry; grows by one second per attempt
pub const AWS_PAGINATION_RETRY_BASE_SECS: u64 = 5;

/// Page size for Alibaba record enumeration
pub const ALIBABA_PAGE_SIZE: u32 = 100;

// ============================================================================
// Scheduler Constants
// ============================================================================

/// Default worker pool size per provider
pub const DEFAULT_PROCESSORS: usize = 10;

/// Initial per-zone requeue interval after a failure (1 second)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;

/// Growth applied to the per-zone requeue interval on repeated failure
pub const BACKOFF_GROWTH_FACTOR: f64 = 1.1;

/// Additive growth per failure on top of the multiplicative factor (1 second)
pub const BACKOFF_GROWTH_ADD_SECS: u64 = 1;

/// Cap on the per-zone requeue interval, expressed as a multiple of the minimum
pub const BACKOFF_MAX_FACTOR: u32 = 20;

// ============================================================================
// Rate Limiter Constants
// ============================================================================

/// Default sustained request rate against a provider API
pub const DEFAULT_RATE_LIMITER_QPS: f64 = 10.0;

/// Default burst allowance on top of the sustained rate
pub const DEFAULT_RATE_LIMITER_BURST: u32 = 20;

// ============================================================================
// Cache Constants
// ============================================================================

/// How long a cached zone list stays fresh (2 minutes)
pub const ZONE_LIST_CACHE_TTL_SECS: u64 = 120;

/// How long a cached zone state stays fresh (10 minutes)
pub const ZONE_STATE_CACHE_TTL_SECS: u64 = 600;

// ============================================================================
// Routing Policy Catalog Constants
// ============================================================================

/// Refresh period for the AWS geo-location catalog (24 hours)
pub const GEO_CATALOG_REFRESH_SECS: u64 = 24 * 60 * 60;

/// Early-retry period when a geo-location lookup missed (30 minutes)
pub const GEO_CATALOG_MISS_RETRY_SECS: u64 = 30 * 60;

/// Refresh period for the AWS CIDR-collection catalog (1 hour)
pub const CIDR_CATALOG_REFRESH_SECS: u64 = 60 * 60;

/// Early-retry period when a CIDR-collection lookup missed (15 minutes)
pub const CIDR_CATALOG_MISS_RETRY_SECS: u64 = 15 * 60;

/// Largest index accepted for Google weighted-round-robin items
pub const GOOGLE_WRR_MAX_INDEX: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Bind address for the metrics/health HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";

/// Port for the metrics/health HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path serving Prometheus metrics
pub const METRICS_SERVER_PATH: &str = "/metrics";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
