// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! AWS Route 53 handler.
//!
//! Change requests translate into `ChangeBatch` submissions of at most the
//! configured batch size. Throttling is classified separately from other
//! failures so the scheduler can back off harder, and record listing
//! absorbs throttling mid-pagination, since losing a partial page would
//! force the whole list to restart.
//!
//! Routing policies map onto per-record fields (`Weight`, `Region`,
//! `GeoLocation`, `Failover`, `CidrRoutingConfig`). Geo locations and CIDR
//! collections are validated against provider catalogs cached behind a
//! mutex with periodic refresh.

use crate::alias::recognize_alias_target;
use crate::constants::{
    AWS_PAGINATION_MAX_RETRIES, AWS_PAGINATION_RETRY_BASE_SECS, CIDR_CATALOG_MISS_RETRY_SECS,
    CIDR_CATALOG_REFRESH_SECS, GEO_CATALOG_MISS_RETRY_SECS, GEO_CATALOG_REFRESH_SECS,
};
use crate::dnsname::{DnsName, DnsSetName};
use crate::errors::ProviderError;
use crate::metrics;
use crate::plan::{ChangeAction as PlanAction, ChangeRequest};
use crate::provider::{DnsHandler, HandlerContext, ProviderKind};
use crate::records::{RecordSet, RecordType, ZoneState};
use crate::resources::ProviderConfig;
use crate::routing::{PolicyKind, RoutingPolicy};
use crate::zones::{HostedZone, ZoneId};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_route53::error::BuildError;
use aws_sdk_route53::types::{
    AliasTarget, Change, ChangeAction, ChangeBatch, CidrRoutingConfig, GeoLocation,
    ResourceRecord, ResourceRecordSet, ResourceRecordSetFailover, ResourceRecordSetRegion, RrType,
};
use aws_sdk_route53::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Route 53 handler for one AWS account.
pub struct Route53Handler {
    ctx: HandlerContext,
    client: Client,
    geo_catalog: Mutex<GeoCatalog>,
    cidr_catalog: Mutex<CidrCatalog>,
}

impl Route53Handler {
    /// Build the handler from Provider credentials.
    ///
    /// Static keys (`AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, optional
    /// `AWS_SESSION_TOKEN`) or the default credentials chain
    /// (`AWS_USE_CREDENTIALS_CHAIN=true`) are supported; `AWS_REGION`
    /// selects the signing region.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when neither credential form is
    /// configured.
    pub async fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = config.credential("AWS_REGION") {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let use_chain = config
            .credential("AWS_USE_CREDENTIALS_CHAIN")
            .is_some_and(|v| v == "true");
        if !use_chain {
            let access_key = config.required_credential("AWS_ACCESS_KEY_ID")?;
            let secret_key = config.required_credential("AWS_SECRET_ACCESS_KEY")?;
            let session_token = config
                .credential("AWS_SESSION_TOKEN")
                .map(ToString::to_string);
            loader = loader.credentials_provider(Credentials::from_keys(
                access_key,
                secret_key,
                session_token,
            ));
        }
        let sdk_config = loader.load().await;
        Ok(Route53Handler {
            ctx,
            client: Client::new(&sdk_config),
            geo_catalog: Mutex::new(GeoCatalog::new()),
            cidr_catalog: Mutex::new(CidrCatalog::new()),
        })
    }

    /// Paginated record listing that absorbs throttling mid-page.
    ///
    /// Up to seven retries per page with a 5..=11s backoff; anything else
    /// would drop the pages already fetched.
    async fn list_record_sets(
        &self,
        zone: &HostedZone,
        start_name: Option<String>,
        start_type: Option<RrType>,
        single_page: bool,
    ) -> Result<Vec<ResourceRecordSet>, ProviderError> {
        let mut records = Vec::new();
        let mut next_name = start_name;
        let mut next_type = start_type;
        let mut next_identifier: Option<String> = None;
        let mut first_page = true;

        loop {
            let request_type = if first_page {
                metrics::REQ_LIST_RECORDS
            } else {
                metrics::REQ_LIST_RECORD_PAGES
            };
            let mut retries = 0u32;
            let output = loop {
                self.ctx.pre_call(&zone.id, request_type).await;
                let mut call = self
                    .client
                    .list_resource_record_sets()
                    .hosted_zone_id(zone.id.as_str());
                if let Some(name) = &next_name {
                    call = call.start_record_name(name);
                }
                if let Some(rtype) = &next_type {
                    call = call.start_record_type(rtype.clone());
                }
                if let Some(identifier) = &next_identifier {
                    call = call.start_record_identifier(identifier);
                }
                match call.send().await {
                    Ok(output) => break output,
                    Err(err) => {
                        let classified = classify_sdk_error(&err, zone.domain.as_str());
                        if classified.is_throttled() && retries < AWS_PAGINATION_MAX_RETRIES {
                            let delay = Duration::from_secs(
                                AWS_PAGINATION_RETRY_BASE_SECS + u64::from(retries),
                            );
                            warn!(
                                zone = %zone.id,
                                retry = retries + 1,
                                delay = ?delay,
                                "record listing throttled mid-pagination, absorbing"
                            );
                            tokio::time::sleep(delay).await;
                            retries += 1;
                            continue;
                        }
                        return Err(classified);
                    }
                }
            };

            records.extend_from_slice(output.resource_record_sets());
            if !output.is_truncated() || single_page {
                return Ok(records);
            }
            next_name = output.next_record_name().map(ToString::to_string);
            next_type = output.next_record_type().cloned();
            next_identifier = output.next_record_identifier().map(ToString::to_string);
            first_page = false;
        }
    }

    /// Translate one change request into a Route 53 change.
    async fn to_change(&self, request: &ChangeRequest) -> Result<Change, ProviderError> {
        let action = match request.action {
            PlanAction::Create => ChangeAction::Create,
            PlanAction::Update => ChangeAction::Upsert,
            PlanAction::Delete => ChangeAction::Delete,
        };
        let set = request.payload();
        let mut builder = ResourceRecordSet::builder()
            .name(request.name.name.to_fqdn())
            .r#type(wire_rr_type(set.rtype));

        if !request.name.set_identifier.is_empty() {
            builder = builder.set_identifier(&request.name.set_identifier);
        }

        if set.rtype.is_alias() {
            let target = set.records.first().ok_or_else(|| ProviderError::Invalid {
                name: request.name.name.to_string(),
                reason: "alias record set without target".to_string(),
            })?;
            let target_name = DnsName::new(&target.value);
            let alias = recognize_alias_target(&target_name).ok_or_else(|| {
                ProviderError::Invalid {
                    name: request.name.name.to_string(),
                    reason: format!("corrupted alias target '{}'", target.value),
                }
            })?;
            builder = builder.alias_target(
                AliasTarget::builder()
                    .hosted_zone_id(alias.hosted_zone_id)
                    .dns_name(target_name.to_fqdn())
                    .evaluate_target_health(false)
                    .build()
                    .map_err(map_build_err)?,
            );
        } else {
            builder = builder.ttl(i64::from(set.ttl));
            for record in &set.records {
                builder = builder.resource_records(
                    ResourceRecord::builder()
                        .value(&record.value)
                        .build()
                        .map_err(map_build_err)?,
                );
            }
        }

        if let Some(policy) = &request.routing_policy {
            builder = self.encode_policy(builder, &request.name, policy).await?;
        }

        Change::builder()
            .action(action)
            .resource_record_set(builder.build().map_err(map_build_err)?)
            .build()
            .map_err(map_build_err)
    }

    /// Encode a routing policy onto the record set builder.
    async fn encode_policy(
        &self,
        mut builder: aws_sdk_route53::types::builders::ResourceRecordSetBuilder,
        name: &DnsSetName,
        policy: &RoutingPolicy,
    ) -> Result<aws_sdk_route53::types::builders::ResourceRecordSetBuilder, ProviderError> {
        if let Some(health_check) = policy.parameter("healthCheckID") {
            builder = builder.health_check_id(health_check);
        }
        match policy.kind {
            PolicyKind::Weighted => {
                let weight = policy.weight().ok_or_else(|| ProviderError::Invalid {
                    name: name.name.to_string(),
                    reason: "weighted routing policy without numeric weight".to_string(),
                })?;
                builder = builder.weight(weight);
            }
            PolicyKind::Latency => {
                let region = policy.parameter("region").unwrap_or_default();
                builder = builder.region(ResourceRecordSetRegion::from(region));
            }
            PolicyKind::Geolocation => {
                let location = policy.parameter("location").unwrap_or_default();
                let geo = {
                    let mut catalog = self.geo_catalog.lock().await;
                    catalog.lookup(&self.ctx, &self.client, location).await?
                };
                let geo = geo.ok_or_else(|| ProviderError::Invalid {
                    name: name.name.to_string(),
                    reason: format!("unknown geo location '{location}'"),
                })?;
                builder = builder.geo_location(geo);
            }
            PolicyKind::IpBased => {
                let collection = policy.parameter("collection").unwrap_or_default();
                let location = policy.parameter("location").unwrap_or_default();
                let collection_id = {
                    let mut catalog = self.cidr_catalog.lock().await;
                    catalog
                        .collection_id(&self.ctx, &self.client, collection)
                        .await?
                };
                let collection_id = collection_id.ok_or_else(|| ProviderError::Invalid {
                    name: name.name.to_string(),
                    reason: format!("unknown CIDR collection '{collection}'"),
                })?;
                builder = builder.cidr_routing_config(
                    CidrRoutingConfig::builder()
                        .collection_id(collection_id)
                        .location_name(location)
                        .build()
                        .map_err(map_build_err)?,
                );
            }
            PolicyKind::Failover => {
                let failover = policy
                    .parameter("failoverRecordType")
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                builder = builder.failover(match failover.as_str() {
                    "SECONDARY" => ResourceRecordSetFailover::Secondary,
                    _ => ResourceRecordSetFailover::Primary,
                });
            }
        }
        Ok(builder)
    }
}

#[async_trait]
impl DnsHandler for Route53Handler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::AwsRoute53
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        let mut zones = Vec::new();
        let mut marker: Option<String> = None;
        let mut first_page = true;
        loop {
            let request_type = if first_page {
                metrics::REQ_LIST_ZONES
            } else {
                metrics::REQ_LIST_ZONE_PAGES
            };
            self.ctx.pre_generic_call(request_type).await;
            let mut call = self.client.list_hosted_zones();
            if let Some(marker) = &marker {
                call = call.marker(marker);
            }
            let output = call
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e, "list_hosted_zones"))?;
            for hz in output.hosted_zones() {
                let id = hz.id().trim_start_matches("/hostedzone/").to_string();
                let mut zone = HostedZone::new(
                    ProviderKind::AwsRoute53.as_str(),
                    ZoneId::new(id),
                    DnsName::new(hz.name()),
                    &self.ctx.provider_name,
                );
                zone.private = hz.config().is_some_and(|c| c.private_zone());
                zones.push(zone);
            }
            if !output.is_truncated() {
                return Ok(zones);
            }
            marker = output.next_marker().map(ToString::to_string);
            first_page = false;
        }
    }

    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError> {
        let records = self.list_record_sets(zone, None, None, false).await?;
        let mut state = ZoneState::new();
        for rrs in &records {
            ingest_record_set(&mut state, rrs);
        }
        state.extract_meta_sets(&zone.domain);
        let sets = state.calculate_dns_sets();
        debug!(zone = %zone.id, sets, "loaded zone state");
        Ok(state)
    }

    async fn execute_requests(
        &self,
        zone: &HostedZone,
        requests: &[ChangeRequest],
    ) -> Result<(), ProviderError> {
        if requests.is_empty() {
            return Ok(());
        }
        let mut changes = Vec::with_capacity(requests.len());
        for request in requests {
            changes.push(self.to_change(request).await?);
            let request_type = match request.action {
                PlanAction::Create => metrics::REQ_CREATE,
                PlanAction::Update => metrics::REQ_UPDATE,
                PlanAction::Delete => metrics::REQ_DELETE,
            };
            metrics::add_zone_requests(zone.id.as_str(), request_type, 1);
        }
        let batch = ChangeBatch::builder()
            .set_changes(Some(changes))
            .build()
            .map_err(map_build_err)?;

        self.ctx.rate_limiter.accept().await;
        self.client
            .change_resource_record_sets()
            .hosted_zone_id(zone.id.as_str())
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, zone.domain.as_str()))?;
        info!(zone = %zone.id, changes = requests.len(), "change batch applied");
        Ok(())
    }

    async fn get_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        rtype: RecordType,
    ) -> Result<Option<RecordSet>, ProviderError> {
        let records = self
            .list_record_sets(
                zone,
                Some(name.name.to_fqdn()),
                Some(wire_rr_type(rtype)),
                true,
            )
            .await?;
        let mut state = ZoneState::new();
        for rrs in &records {
            if DnsName::new(rrs.name()) != name.name {
                continue;
            }
            ingest_record_set(&mut state, rrs);
        }
        if rtype == RecordType::Meta {
            state.extract_meta_sets(&zone.domain);
        }
        state.calculate_dns_sets();
        Ok(state.get(name).and_then(|set| set.get(rtype)).cloned())
    }
}

/// Ingest one provider record set into the uniform model.
pub(crate) fn ingest_record_set(state: &mut ZoneState, rrs: &ResourceRecordSet) {
    let name = DnsSetName {
        name: DnsName::new(rrs.name()),
        set_identifier: rrs.set_identifier().unwrap_or_default().to_string(),
    };
    if let Some(alias) = rrs.alias_target() {
        let rtype = match rrs.r#type() {
            RrType::Aaaa => RecordType::AliasAaaa,
            _ => RecordType::AliasA,
        };
        state.add_value(name.clone(), rtype, 0, DnsName::new(alias.dns_name()).as_str());
    } else {
        let Some(rtype) = RecordType::parse(rrs.r#type().as_str()) else {
            return;
        };
        let ttl = u32::try_from(rrs.ttl().unwrap_or(0)).unwrap_or(0);
        for record in rrs.resource_records() {
            state.add_value(name.clone(), rtype, ttl, record.value());
        }
    }
    if let Some(policy) = extract_policy(rrs) {
        state.set_routing_policy(&name, policy);
    }
}

/// Decode the routing policy of a provider record set.
///
/// Unknown encodings yield `None` and are treated as "no policy".
pub(crate) fn extract_policy(rrs: &ResourceRecordSet) -> Option<RoutingPolicy> {
    let mut policy = if let Some(weight) = rrs.weight() {
        RoutingPolicy::new(PolicyKind::Weighted).with("weight", weight.to_string())
    } else if let Some(region) = rrs.region() {
        RoutingPolicy::new(PolicyKind::Latency).with("region", region.as_str())
    } else if let Some(geo) = rrs.geo_location() {
        let location = if let Some(sub) = geo.subdivision_code() {
            format!("{}/{sub}", geo.country_code().unwrap_or_default())
        } else if let Some(country) = geo.country_code() {
            country.to_string()
        } else if let Some(continent) = geo.continent_code() {
            continent.to_string()
        } else {
            return None;
        };
        RoutingPolicy::new(PolicyKind::Geolocation).with("location", location)
    } else if let Some(failover) = rrs.failover() {
        RoutingPolicy::new(PolicyKind::Failover).with("failoverRecordType", failover.as_str())
    } else {
        return None;
    };
    if let Some(health_check) = rrs.health_check_id() {
        policy = policy.with("healthCheckID", health_check);
    }
    Some(policy)
}

fn wire_rr_type(rtype: RecordType) -> RrType {
    match rtype {
        RecordType::A | RecordType::AliasA => RrType::A,
        RecordType::AAAA | RecordType::AliasAaaa => RrType::Aaaa,
        RecordType::CNAME => RrType::Cname,
        RecordType::TXT | RecordType::Meta => RrType::Txt,
        RecordType::NS => RrType::Ns,
    }
}

fn map_build_err(err: BuildError) -> ProviderError {
    ProviderError::Fatal {
        message: format!("failed to build Route 53 request: {err}"),
    }
}

/// Classify an SDK error into the engine taxonomy.
///
/// Throttling comes back under several codes (`Throttling`,
/// `Rate exceeded`, `PriorRequestNotComplete`); everything is matched on
/// the rendered error because the SDK nests the service error.
fn classify_sdk_error(err: &dyn std::fmt::Debug, name: &str) -> ProviderError {
    let rendered = format!("{err:?}");
    if rendered.contains("Throttling")
        || rendered.contains("Rate exceeded")
        || rendered.contains("PriorRequestNotComplete")
    {
        ProviderError::Throttled { message: rendered }
    } else if rendered.contains("already exists") {
        ProviderError::Conflict {
            name: name.to_string(),
            message: rendered,
        }
    } else if rendered.contains("AccessDenied") || rendered.contains("InvalidClientTokenId") {
        ProviderError::Fatal { message: rendered }
    } else if rendered.contains("InvalidChangeBatch") || rendered.contains("InvalidInput") {
        ProviderError::Invalid {
            name: name.to_string(),
            reason: rendered,
        }
    } else {
        ProviderError::Transient { message: rendered }
    }
}

// ============================================================================
// Provider-side routing catalogs
// ============================================================================

/// Catalog freshness bookkeeping shared by the geo and CIDR caches.
///
/// A successful refresh defers the next one by the full period (the miss
/// retry window when the looked-up key was absent); a failed refresh
/// defers by half a period so a broken catalog API is not hammered.
struct CatalogClock {
    next_refresh: Option<Instant>,
    period: Duration,
    miss_retry: Duration,
}

impl CatalogClock {
    fn new(period: Duration, miss_retry: Duration) -> Self {
        CatalogClock {
            next_refresh: None,
            period,
            miss_retry,
        }
    }

    fn needs_refresh(&self) -> bool {
        self.next_refresh.is_none_or(|at| Instant::now() >= at)
    }

    fn refreshed(&mut self, miss: bool) {
        let window = if miss { self.miss_retry } else { self.period };
        self.next_refresh = Some(Instant::now() + window);
    }

    fn refresh_failed(&mut self) {
        self.next_refresh = Some(Instant::now() + self.period / 2);
    }
}

/// Geo-location catalog: location strings to Route 53 `GeoLocation`.
struct GeoCatalog {
    clock: CatalogClock,
    /// keys: continent codes, country codes, `CC/subdivision`
    entries: HashMap<String, GeoLocation>,
}

impl GeoCatalog {
    fn new() -> Self {
        GeoCatalog {
            clock: CatalogClock::new(
                Duration::from_secs(GEO_CATALOG_REFRESH_SECS),
                Duration::from_secs(GEO_CATALOG_MISS_RETRY_SECS),
            ),
            entries: HashMap::new(),
        }
    }

    async fn lookup(
        &mut self,
        ctx: &HandlerContext,
        client: &Client,
        location: &str,
    ) -> Result<Option<GeoLocation>, ProviderError> {
        let key = location.to_ascii_uppercase();
        if !self.entries.contains_key(&key) && self.clock.needs_refresh() {
            match self.refresh(ctx, client).await {
                Ok(()) => {
                    let miss = !self.entries.contains_key(&key);
                    self.clock.refreshed(miss);
                }
                Err(err) => {
                    self.clock.refresh_failed();
                    return Err(err);
                }
            }
        }
        Ok(self.entries.get(&key).cloned())
    }

    async fn refresh(
        &mut self,
        ctx: &HandlerContext,
        client: &Client,
    ) -> Result<(), ProviderError> {
        debug!("refreshing geo location catalog");
        let mut entries = HashMap::new();
        let mut next_continent: Option<String> = None;
        let mut next_country: Option<String> = None;
        let mut next_subdivision: Option<String> = None;
        loop {
            ctx.pre_generic_call(metrics::REQ_LIST_ZONE_PAGES).await;
            let mut call = client.list_geo_locations();
            if let Some(code) = &next_continent {
                call = call.start_continent_code(code);
            }
            if let Some(code) = &next_country {
                call = call.start_country_code(code);
            }
            if let Some(code) = &next_subdivision {
                call = call.start_subdivision_code(code);
            }
            let output = call
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e, "list_geo_locations"))?;
            for detail in output.geo_location_details_list() {
                if let Some(continent) = detail.continent_code() {
                    entries.insert(
                        continent.to_ascii_uppercase(),
                        GeoLocation::builder().continent_code(continent).build(),
                    );
                }
                if let Some(country) = detail.country_code() {
                    match detail.subdivision_code() {
                        Some(subdivision) => {
                            entries.insert(
                                format!("{}/{}", country, subdivision).to_ascii_uppercase(),
                                GeoLocation::builder()
                                    .country_code(country)
                                    .subdivision_code(subdivision)
                                    .build(),
                            );
                        }
                        None => {
                            entries.insert(
                                country.to_ascii_uppercase(),
                                GeoLocation::builder().country_code(country).build(),
                            );
                        }
                    }
                }
            }
            if !output.is_truncated() {
                break;
            }
            next_continent = output.next_continent_code().map(ToString::to_string);
            next_country = output.next_country_code().map(ToString::to_string);
            next_subdivision = output.next_subdivision_code().map(ToString::to_string);
        }
        info!(locations = entries.len(), "geo location catalog refreshed");
        self.entries = entries;
        Ok(())
    }
}

/// CIDR collection catalog: collection names to ids.
struct CidrCatalog {
    clock: CatalogClock,
    collections: HashMap<String, String>,
}

impl CidrCatalog {
    fn new() -> Self {
        CidrCatalog {
            clock: CatalogClock::new(
                Duration::from_secs(CIDR_CATALOG_REFRESH_SECS),
                Duration::from_secs(CIDR_CATALOG_MISS_RETRY_SECS),
            ),
            collections: HashMap::new(),
        }
    }

    async fn collection_id(
        &mut self,
        ctx: &HandlerContext,
        client: &Client,
        name: &str,
    ) -> Result<Option<String>, ProviderError> {
        if !self.collections.contains_key(name) && self.clock.needs_refresh() {
            match self.refresh(ctx, client).await {
                Ok(()) => {
                    let miss = !self.collections.contains_key(name);
                    self.clock.refreshed(miss);
                }
                Err(err) => {
                    self.clock.refresh_failed();
                    return Err(err);
                }
            }
        }
        Ok(self.collections.get(name).cloned())
    }

    async fn refresh(
        &mut self,
        ctx: &HandlerContext,
        client: &Client,
    ) -> Result<(), ProviderError> {
        debug!("refreshing CIDR collection catalog");
        let mut collections = HashMap::new();
        let mut next_token: Option<String> = None;
        loop {
            ctx.pre_generic_call(metrics::REQ_LIST_ZONE_PAGES).await;
            let mut call = client.list_cidr_collections();
            if let Some(token) = &next_token {
                call = call.next_token(token);
            }
            let output = call
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e, "list_cidr_collections"))?;
            for collection in output.cidr_collections() {
                if let (Some(name), Some(id)) = (collection.name(), collection.id()) {
                    collections.insert(name.to_string(), id.to_string());
                }
            }
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        info!(collections = collections.len(), "CIDR collection catalog refreshed");
        self.collections = collections;
        Ok(())
    }
}

#[cfg(test)]
#[path = "aws_tests.rs"]
mod aws_tests;
