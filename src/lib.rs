// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # zonesync - DNS zone reconciliation engine
//!
//! zonesync keeps authoritative DNS zones hosted at external providers
//! (AWS Route 53, Google Cloud DNS, Alibaba, Cloudflare, Netlify,
//! Infoblox, PowerDNS, RFC 2136 servers) aligned with a declarative set
//! of desired DNS entries.
//!
//! ## Overview
//!
//! The engine consumes three resource kinds published by an external
//! object store: *Provider* (credentials + tuning), *Entry* (a desired DNS
//! name) and *HostedZonePolicy* (per-zone overrides). For every zone it
//! plans the minimal set of record changes, gates them on a TXT-based
//! ownership protocol, batches and executes them against the provider
//! API, and keeps a per-zone state cache coherent with what was written.
//!
//! ## Modules
//!
//! - [`records`] - Uniform record model and zone state
//! - [`plan`] - Change planner (diff, ownership, batching)
//! - [`cache`] - Per-zone state cache with controlled invalidation
//! - [`provider`] - Provider handler contract and the executors
//! - [`scheduler`] - Per-zone single-flight reconcile loop and worker pool
//! - [`routing`] - Provider-independent routing policies
//! - [`ownership`] - META TXT ownership protocol
//! - [`alias`] - AWS load-balancer hostname recognition
//!
//! ## Example
//!
//! ```rust
//! use zonesync::dnsname::DnsName;
//! use zonesync::resources::Entry;
//!
//! let entry = Entry {
//!     dns_name: DnsName::new("app.example.com"),
//!     targets: vec!["1.2.3.4".to_string()],
//!     ttl: Some(300),
//!     ..Entry::default()
//! };
//! assert_eq!(entry.class(), "gardendns");
//! ```

pub mod alias;
pub mod cache;
pub mod constants;
pub mod dnsname;
pub mod errors;
pub mod metrics;
pub mod ownership;
pub mod plan;
pub mod provider;
pub mod ratelimit;
pub mod records;
pub mod resources;
pub mod routing;
pub mod scheduler;
pub mod zones;
