// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provider handler contract and registry.
//!
//! Each provider account is served by one [`DnsHandler`]: it lists hosted
//! zones, loads zone state, and executes planned change batches. Handlers
//! own a token-bucket [`RateLimiter`] shared across all zones of the
//! account; every outbound API call passes [`HandlerContext::pre_call`]
//! first so rate limiting and request metrics stay accurate per handler.
//!
//! Providers with set semantics (AWS, Google) implement
//! [`DnsHandler::execute_requests`] natively; record-level providers
//! (Cloudflare, Netlify, Infoblox, PowerDNS, RFC2136) override the
//! dedicated-record operations and route batches through
//! [`execute_requests_record_level`].

pub mod alibaba;
pub mod aws;
pub mod cloudflare;
pub mod google;
pub mod infoblox;
pub mod netlify;
pub mod powerdns;
pub mod rfc2136;

use crate::dnsname::DnsSetName;
use crate::errors::ProviderError;
use crate::metrics;
use crate::plan::{ChangeAction, ChangeRequest};
use crate::ratelimit::RateLimiter;
use crate::records::{RecordSet, RecordType, ZoneState};
use crate::resources::ProviderConfig;
use crate::zones::{HostedZone, ZoneId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The provider kinds the engine can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    AwsRoute53,
    GoogleCloudDns,
    AlibabaDns,
    Cloudflare,
    Netlify,
    Infoblox,
    PowerDns,
    Rfc2136,
}

impl ProviderKind {
    /// Parse the Provider resource `type` string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aws-route53" => Some(ProviderKind::AwsRoute53),
            "google-clouddns" => Some(ProviderKind::GoogleCloudDns),
            "alicloud-dns" => Some(ProviderKind::AlibabaDns),
            "cloudflare-dns" => Some(ProviderKind::Cloudflare),
            "netlify-dns" => Some(ProviderKind::Netlify),
            "infoblox-dns" => Some(ProviderKind::Infoblox),
            "powerdns" => Some(ProviderKind::PowerDns),
            "rfc2136" => Some(ProviderKind::Rfc2136),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::AwsRoute53 => "aws-route53",
            ProviderKind::GoogleCloudDns => "google-clouddns",
            ProviderKind::AlibabaDns => "alicloud-dns",
            ProviderKind::Cloudflare => "cloudflare-dns",
            ProviderKind::Netlify => "netlify-dns",
            ProviderKind::Infoblox => "infoblox-dns",
            ProviderKind::PowerDns => "powerdns",
            ProviderKind::Rfc2136 => "rfc2136",
        }
    }

    /// Whether CNAME targets may be rewritten to provider-native aliases.
    #[must_use]
    pub fn supports_alias(self) -> bool {
        matches!(self, ProviderKind::AwsRoute53)
    }

    /// Whether routing policies can be encoded for this provider.
    #[must_use]
    pub fn supports_routing(self) -> bool {
        matches!(
            self,
            ProviderKind::AwsRoute53 | ProviderKind::GoogleCloudDns | ProviderKind::AlibabaDns
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared plumbing injected into every handler.
pub struct HandlerContext {
    pub provider_name: String,
    pub kind: ProviderKind,
    pub rate_limiter: Arc<RateLimiter>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout: Duration,
    http: reqwest::Client,
}

impl HandlerContext {
    /// Build the context from a Provider resource.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when the HTTP client cannot be
    /// constructed.
    pub fn new(kind: ProviderKind, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let rate_limiter = match &config.rate_limits {
            Some(rl) if rl.enabled => Arc::new(RateLimiter::new(rl.qps, rl.burst)),
            Some(_) => Arc::new(RateLimiter::unlimited()),
            None => Arc::new(RateLimiter::new(
                crate::constants::DEFAULT_RATE_LIMITER_QPS,
                crate::constants::DEFAULT_RATE_LIMITER_BURST,
            )),
        };
        let batch_size = config
            .batch_size
            .unwrap_or(crate::constants::DEFAULT_BATCH_SIZE)
            .clamp(
                crate::constants::MIN_BATCH_SIZE,
                crate::constants::MAX_BATCH_SIZE,
            );
        let timeout = Duration::from_secs(crate::constants::DEFAULT_CALL_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("zonesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Fatal {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(HandlerContext {
            provider_name: config.name.clone(),
            kind,
            rate_limiter,
            batch_size,
            max_retries: config.max_retries.unwrap_or(3),
            timeout,
            http,
        })
    }

    /// The shared HTTP client for REST-driven providers.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Gate and account one zone-scoped API call. Must run immediately
    /// before the request.
    pub async fn pre_call(&self, zone: &ZoneId, request_type: &str) {
        self.rate_limiter.accept().await;
        metrics::add_zone_requests(zone.as_str(), request_type, 1);
    }

    /// Gate and account one account-wide API call (zone listing).
    pub async fn pre_generic_call(&self, request_type: &str) {
        self.rate_limiter.accept().await;
        metrics::add_generic_requests(self.kind.as_str(), request_type, 1);
    }
}

/// Operations every provider handler exposes to the engine core.
#[async_trait]
pub trait DnsHandler: Send + Sync {
    /// The provider kind this handler drives.
    fn provider_type(&self) -> ProviderKind;

    /// Shared handler plumbing (rate limiter, batch size, metrics hooks).
    fn context(&self) -> &HandlerContext;

    /// List the hosted zones of the account.
    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError>;

    /// Load the full record state of one zone.
    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError>;

    /// Execute one planned batch. The batch respects the handler's batch
    /// size and orders deletions before additions.
    async fn execute_requests(
        &self,
        zone: &HostedZone,
        requests: &[ChangeRequest],
    ) -> Result<(), ProviderError>;

    /// Targeted read of a single record set, used for ownership probes.
    ///
    /// The default implementation loads the zone state and filters; set
    /// capable providers override it with a server-side filter.
    async fn get_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        rtype: RecordType,
    ) -> Result<Option<RecordSet>, ProviderError> {
        let state = self.get_zone_state(zone).await?;
        Ok(state.get(name).and_then(|set| set.get(rtype)).cloned())
    }

    /// Dedicated-record create/update for providers without set semantics.
    async fn create_or_update_record_set(
        &self,
        _zone: &HostedZone,
        _name: &DnsSetName,
        _old: Option<&RecordSet>,
        _new: &RecordSet,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Fatal {
            message: format!(
                "{} does not implement dedicated record operations",
                self.provider_type()
            ),
        })
    }

    /// Dedicated-record delete for providers without set semantics.
    async fn delete_record_set(
        &self,
        _zone: &HostedZone,
        _name: &DnsSetName,
        _set: &RecordSet,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Fatal {
            message: format!(
                "{} does not implement dedicated record operations",
                self.provider_type()
            ),
        })
    }

    /// Release handler resources. Called when the provider resource is
    /// removed.
    fn release(&self) {}
}

/// Route one batch through the dedicated-record operations.
///
/// The first failing call aborts the batch; the caller treats the whole
/// batch as failed, which invalidates the zone cache and notifies every
/// request's completion handle.
pub async fn execute_requests_record_level<H>(
    handler: &H,
    zone: &HostedZone,
    requests: &[ChangeRequest],
) -> Result<(), ProviderError>
where
    H: DnsHandler + ?Sized,
{
    for request in requests {
        match request.action {
            ChangeAction::Delete => {
                let set = request.deletion.as_ref().ok_or_else(|| ProviderError::Invalid {
                    name: request.name.name.to_string(),
                    reason: "delete request without deletion set".to_string(),
                })?;
                handler.delete_record_set(zone, &request.name, set).await?;
            }
            ChangeAction::Create | ChangeAction::Update => {
                let new = request.addition.as_ref().ok_or_else(|| ProviderError::Invalid {
                    name: request.name.name.to_string(),
                    reason: "create/update request without addition set".to_string(),
                })?;
                handler
                    .create_or_update_record_set(zone, &request.name, request.deletion.as_ref(), new)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Build a handler from a Provider resource.
///
/// # Errors
///
/// Returns [`ProviderError::Fatal`] for unknown kinds or invalid
/// credentials; the provider is marked in error state and not reconciled
/// until its configuration changes.
pub async fn build_handler(
    config: &ProviderConfig,
) -> Result<Arc<dyn DnsHandler>, ProviderError> {
    let kind = ProviderKind::parse(&config.kind).ok_or_else(|| ProviderError::Fatal {
        message: format!("unknown provider type '{}'", config.kind),
    })?;
    let ctx = HandlerContext::new(kind, config)?;
    let handler: Arc<dyn DnsHandler> = match kind {
        ProviderKind::AwsRoute53 => Arc::new(aws::Route53Handler::new(ctx, config).await?),
        ProviderKind::GoogleCloudDns => Arc::new(google::CloudDnsHandler::new(ctx, config)?),
        ProviderKind::AlibabaDns => Arc::new(alibaba::AlibabaHandler::new(ctx, config)?),
        ProviderKind::Cloudflare => Arc::new(cloudflare::CloudflareHandler::new(ctx, config)?),
        ProviderKind::Netlify => Arc::new(netlify::NetlifyHandler::new(ctx, config)?),
        ProviderKind::Infoblox => Arc::new(infoblox::InfobloxHandler::new(ctx, config)?),
        ProviderKind::PowerDns => Arc::new(powerdns::PowerDnsHandler::new(ctx, config)?),
        ProviderKind::Rfc2136 => Arc::new(rfc2136::Rfc2136Handler::new(ctx, config)?),
    };
    Ok(handler)
}
