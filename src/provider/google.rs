// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Google Cloud DNS handler.
//!
//! Record sets are managed through the REST v1 API; one planned batch maps
//! to a single `Change{additions, deletions}` submission. Weighted and geo
//! routing policies are not per-record on Google: the policy items of a
//! name/type live in one RRSet, so the executor fetches the current set,
//! merges the batch's policy requests into its item array, and submits a
//! replace. Deleted weighted items become type-specific placeholder records
//! to preserve array indexing; a policy whose items are all placeholders is
//! deleted outright.
//!
//! Authentication uses the service account JSON: an RS256-signed JWT is
//! exchanged at the account's token endpoint and cached until expiry.

use crate::constants::GOOGLE_WRR_MAX_INDEX;
use crate::dnsname::{DnsName, DnsSetName};
use crate::errors::ProviderError;
use crate::metrics;
use crate::plan::{ChangeAction, ChangeRequest};
use crate::provider::{DnsHandler, HandlerContext, ProviderKind};
use crate::records::{RecordSet, RecordType, ZoneState};
use crate::resources::ProviderConfig;
use crate::routing::{wrr_index, PolicyKind, RoutingPolicy};
use crate::zones::{HostedZone, ZoneId};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const DNS_API_BASE: &str = "https://dns.googleapis.com/dns/v1/projects";
const DNS_SCOPE: &str = "https://www.googleapis.com/auth/ndev.clouddns.readwrite";

/// Placeholder rrdata keeping a deleted weighted item's index occupied.
#[must_use]
pub fn placeholder_rrdata(rtype: RecordType) -> &'static str {
    match rtype {
        RecordType::AAAA => "100::",
        RecordType::CNAME => "placeholder.invalid.",
        RecordType::TXT | RecordType::Meta => "\"__placeholder__\"",
        _ => "233.252.0.1",
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ManagedZonesResponse {
    #[serde(default, rename = "managedZones")]
    managed_zones: Vec<ManagedZone>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManagedZone {
    name: String,
    #[serde(rename = "dnsName")]
    dns_name: String,
    #[serde(default, rename = "privateVisibilityConfig")]
    private_visibility: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RrsetsResponse {
    #[serde(default)]
    rrsets: Vec<Rrset>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Rrset {
    name: String,
    #[serde(rename = "type")]
    rtype: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rrdatas: Vec<String>,
    #[serde(
        default,
        rename = "routingPolicy",
        skip_serializing_if = "Option::is_none"
    )]
    routing_policy: Option<WirePolicy>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WirePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wrr: Option<WrrPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geo: Option<GeoPolicy>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct WrrPolicy {
    #[serde(default)]
    items: Vec<WrrItem>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct WrrItem {
    #[serde(default)]
    weight: f64,
    #[serde(default)]
    rrdatas: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct GeoPolicy {
    #[serde(default)]
    items: Vec<GeoItem>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct GeoItem {
    #[serde(default)]
    location: String,
    #[serde(default)]
    rrdatas: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChangeBody {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    additions: Vec<Rrset>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    deletions: Vec<Rrset>,
}

// ============================================================================
// Service account auth
// ============================================================================

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct TokenCache {
    token: Option<(String, Instant)>,
}

/// Google Cloud DNS handler for one project.
pub struct CloudDnsHandler {
    ctx: HandlerContext,
    project: String,
    account: ServiceAccount,
    key: Option<ring::signature::RsaKeyPair>,
    base: String,
    token: Mutex<TokenCache>,
}

impl CloudDnsHandler {
    /// Build the handler from the `serviceaccount.json` credential.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when the service account JSON or
    /// its private key cannot be parsed.
    pub fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let raw = config.required_credential("serviceaccount.json")?;
        let account: ServiceAccount =
            serde_json::from_str(raw).map_err(|e| ProviderError::Fatal {
                message: format!("invalid serviceaccount.json: {e}"),
            })?;
        let project = config
            .credential("project")
            .map(ToString::to_string)
            .or_else(|| account.project_id.clone())
            .ok_or_else(|| ProviderError::Fatal {
                message: "service account carries no project id".to_string(),
            })?;
        let key = Some(parse_rsa_key(&account.private_key)?);
        Ok(CloudDnsHandler {
            ctx,
            project,
            account,
            key,
            base: DNS_API_BASE.to_string(),
            token: Mutex::new(TokenCache { token: None }),
        })
    }

    /// Handler against a mock API endpoint with a pre-seeded bearer token,
    /// bypassing the service-account assertion flow.
    #[cfg(test)]
    pub(crate) fn for_tests(ctx: HandlerContext, project: &str, base: &str) -> Self {
        CloudDnsHandler {
            ctx,
            project: project.to_string(),
            account: ServiceAccount {
                client_email: "test@test-project.iam.gserviceaccount.com".to_string(),
                private_key: String::new(),
                project_id: Some(project.to_string()),
                token_uri: String::new(),
            },
            key: None,
            base: base.trim_end_matches('/').to_string(),
            token: Mutex::new(TokenCache {
                token: Some((
                    "test-token".to_string(),
                    Instant::now() + Duration::from_secs(3600),
                )),
            }),
        }
    }

    /// A bearer token for the DNS scope, cached until shortly before
    /// expiry.
    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cache = self.token.lock().await;
        if let Some((token, valid_until)) = &cache.token {
            if Instant::now() < *valid_until {
                return Ok(token.clone());
            }
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let claims = serde_json::json!({
            "iss": self.account.client_email,
            "scope": DNS_SCOPE,
            "aud": self.account.token_uri,
            "iat": now,
            "exp": now + 3600,
        });
        let claims = URL_SAFE_NO_PAD.encode(claims.to_string());
        let message = format!("{header}.{claims}");

        let key = self.key.as_ref().ok_or_else(|| ProviderError::Fatal {
            message: "service account key unavailable".to_string(),
        })?;
        let rng = ring::rand::SystemRandom::new();
        let mut signature = vec![0u8; key.public().modulus_len()];
        key.sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &rng,
            message.as_bytes(),
            &mut signature,
        )
        .map_err(|_| ProviderError::Fatal {
            message: "failed to sign service account assertion".to_string(),
        })?;
        let assertion = format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature));

        let response = self
            .ctx
            .http()
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Fatal {
                message: format!("token exchange failed with HTTP {status}: {body}"),
            });
        }
        let token: TokenResponse = response.json().await?;
        let valid_until =
            Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60).max(60));
        cache.token = Some((token.access_token.clone(), valid_until));
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ProviderError> {
        let token = self.access_token().await?;
        let response = self.ctx.http().get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status.as_u16(), url, &body));
        }
        Ok(response.json().await?)
    }

    /// Current RRSet for a name/type, if present.
    async fn fetch_rrset(
        &self,
        zone: &HostedZone,
        name: &DnsName,
        rtype: RecordType,
    ) -> Result<Option<Rrset>, ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
        let url = format!(
            "{}/{}/managedZones/{}/rrsets?name={}&type={}",
            self.base,
            self.project,
            zone.id,
            urlencoding::encode(&name.to_fqdn()),
            rtype.wire_type().trim_start_matches("ALIAS_")
        );
        let response: RrsetsResponse = self.get_json(&url).await?;
        Ok(response.rrsets.into_iter().next())
    }

    async fn submit_change(
        &self,
        zone: &HostedZone,
        body: &ChangeBody,
    ) -> Result<(), ProviderError> {
        if body.additions.is_empty() && body.deletions.is_empty() {
            return Ok(());
        }
        let token = self.access_token().await?;
        self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
        let url = format!(
            "{}/{}/managedZones/{}/changes",
            self.base, self.project, zone.id
        );
        let response = self
            .ctx
            .http()
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(
                status.as_u16(),
                zone.domain.as_str(),
                &body_text,
            ));
        }
        Ok(())
    }

    /// Merge the batch's policy requests for one name/type into the
    /// current RRSet's item array and produce the replace operations.
    async fn merge_policy_requests(
        &self,
        zone: &HostedZone,
        name: &DnsName,
        rtype: RecordType,
        requests: &[&ChangeRequest],
    ) -> Result<(Vec<Rrset>, Vec<Rrset>), ProviderError> {
        let current = self.fetch_rrset(zone, name, rtype).await?;
        let kind = requests
            .iter()
            .find_map(|r| r.routing_policy.as_ref())
            .map(|p| p.kind)
            .unwrap_or(PolicyKind::Weighted);

        let merged = match kind {
            PolicyKind::Geolocation => {
                let mut items: BTreeMap<String, GeoItem> = current
                    .as_ref()
                    .and_then(|r| r.routing_policy.as_ref())
                    .and_then(|p| p.geo.as_ref())
                    .map(|geo| {
                        geo.items
                            .iter()
                            .map(|item| (item.location.clone(), item.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                for request in requests {
                    let location = request
                        .routing_policy
                        .as_ref()
                        .and_then(|p| p.parameter("location"))
                        .unwrap_or(&request.name.set_identifier)
                        .to_string();
                    match request.action {
                        ChangeAction::Delete => {
                            items.remove(&location);
                        }
                        _ => {
                            items.insert(
                                location.clone(),
                                GeoItem {
                                    location,
                                    rrdatas: request
                                        .payload()
                                        .values()
                                        .iter()
                                        .map(ToString::to_string)
                                        .collect(),
                                },
                            );
                        }
                    }
                }
                if items.is_empty() {
                    None
                } else {
                    Some(WirePolicy {
                        wrr: None,
                        geo: Some(GeoPolicy {
                            items: items.into_values().collect(),
                        }),
                    })
                }
            }
            _ => {
                let mut items: Vec<WrrItem> = current
                    .as_ref()
                    .and_then(|r| r.routing_policy.as_ref())
                    .and_then(|p| p.wrr.as_ref())
                    .map(|wrr| wrr.items.clone())
                    .unwrap_or_default();
                let placeholder = || WrrItem {
                    weight: 0.0,
                    rrdatas: vec![placeholder_rrdata(rtype).to_string()],
                };
                for request in requests {
                    let index = wrr_index(&request.name.set_identifier, GOOGLE_WRR_MAX_INDEX)
                        .ok_or_else(|| ProviderError::Invalid {
                            name: name.to_string(),
                            reason: format!(
                                "weighted set identifier '{}' is not an index in 0..={GOOGLE_WRR_MAX_INDEX}",
                                request.name.set_identifier
                            ),
                        })?;
                    while items.len() <= index {
                        items.push(placeholder());
                    }
                    match request.action {
                        ChangeAction::Delete => {
                            items[index] = placeholder();
                        }
                        _ => {
                            let weight = request
                                .routing_policy
                                .as_ref()
                                .and_then(RoutingPolicy::weight)
                                .unwrap_or(0);
                            items[index] = WrrItem {
                                weight: weight as f64,
                                rrdatas: request
                                    .payload()
                                    .values()
                                    .iter()
                                    .map(ToString::to_string)
                                    .collect(),
                            };
                        }
                    }
                }
                // trim trailing placeholders, then drop a fully-empty policy
                while items
                    .last()
                    .is_some_and(|item| item.rrdatas == vec![placeholder_rrdata(rtype).to_string()])
                {
                    items.pop();
                }
                if items.is_empty() {
                    None
                } else {
                    Some(WirePolicy {
                        wrr: Some(WrrPolicy { items }),
                        geo: None,
                    })
                }
            }
        };

        let ttl = requests
            .iter()
            .map(|r| r.payload().ttl)
            .find(|ttl| *ttl > 0)
            .or(current.as_ref().map(|r| r.ttl))
            .unwrap_or(crate::constants::DEFAULT_RECORD_TTL_SECS);

        let mut deletions = Vec::new();
        let mut additions = Vec::new();
        if let Some(current) = current {
            deletions.push(current);
        }
        if let Some(policy) = merged {
            additions.push(Rrset {
                name: name.to_fqdn(),
                rtype: wire_type(rtype).to_string(),
                ttl,
                rrdatas: Vec::new(),
                routing_policy: Some(policy),
            });
        }
        Ok((additions, deletions))
    }
}

#[async_trait]
impl DnsHandler for CloudDnsHandler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::GoogleCloudDns
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        let mut zones = Vec::new();
        let mut page_token: Option<String> = None;
        let mut first_page = true;
        loop {
            let request_type = if first_page {
                metrics::REQ_LIST_ZONES
            } else {
                metrics::REQ_LIST_ZONE_PAGES
            };
            self.ctx.pre_generic_call(request_type).await;
            let mut url = format!("{}/{}/managedZones", self.base, self.project);
            if let Some(token) = &page_token {
                url = format!("{url}?pageToken={token}");
            }
            let response: ManagedZonesResponse = self.get_json(&url).await?;
            for mz in response.managed_zones {
                let mut zone = HostedZone::new(
                    ProviderKind::GoogleCloudDns.as_str(),
                    ZoneId::new(mz.name),
                    DnsName::new(&mz.dns_name),
                    &self.project,
                );
                zone.private = mz.private_visibility.is_some();
                zones.push(zone);
            }
            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(zones),
            }
            first_page = false;
        }
    }

    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError> {
        let mut state = ZoneState::new();
        let mut page_token: Option<String> = None;
        let mut first_page = true;
        loop {
            let request_type = if first_page {
                metrics::REQ_LIST_RECORDS
            } else {
                metrics::REQ_LIST_RECORD_PAGES
            };
            self.ctx.pre_call(&zone.id, request_type).await;
            let mut url = format!(
                "{}/{}/managedZones/{}/rrsets",
                self.base, self.project, zone.id
            );
            if let Some(token) = &page_token {
                url = format!("{url}?pageToken={token}");
            }
            let response: RrsetsResponse = self.get_json(&url).await?;
            for rrset in &response.rrsets {
                ingest_rrset(&mut state, rrset);
            }
            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
            first_page = false;
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
        // policy-carrying requests merge per name/type; plain requests
        // aggregate into the batch-wide change
        let mut plain = ChangeBody {
            additions: Vec::new(),
            deletions: Vec::new(),
        };
        let mut policy_groups: BTreeMap<(DnsName, RecordType), Vec<&ChangeRequest>> =
            BTreeMap::new();

        for request in requests {
            if request.routing_policy.is_some() || !request.name.set_identifier.is_empty() {
                policy_groups
                    .entry((request.name.name.clone(), request.rtype))
                    .or_default()
                    .push(request);
                continue;
            }
            match request.action {
                ChangeAction::Create => plain.additions.push(to_rrset(request, true)),
                ChangeAction::Delete => plain.deletions.push(to_rrset(request, false)),
                ChangeAction::Update => {
                    plain.deletions.push(to_rrset(request, false));
                    plain.additions.push(to_rrset(request, true));
                }
            }
        }

        for ((name, rtype), group) in policy_groups {
            let (additions, deletions) = self
                .merge_policy_requests(zone, &name, rtype, &group)
                .await?;
            plain.additions.extend(additions);
            plain.deletions.extend(deletions);
        }

        self.submit_change(zone, &plain).await?;
        info!(zone = %zone.id, changes = requests.len(), "change applied");
        Ok(())
    }

    async fn get_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        rtype: RecordType,
    ) -> Result<Option<RecordSet>, ProviderError> {
        let fetched = self.fetch_rrset(zone, &name.name, rtype).await?;
        let Some(rrset) = fetched else {
            return Ok(None);
        };
        let mut state = ZoneState::new();
        ingest_rrset(&mut state, &rrset);
        if rtype == RecordType::Meta {
            state.extract_meta_sets(&zone.domain);
        }
        state.calculate_dns_sets();
        Ok(state.get(name).and_then(|set| set.get(rtype)).cloned())
    }
}

fn wire_type(rtype: RecordType) -> &'static str {
    match rtype {
        RecordType::A | RecordType::AliasA => "A",
        RecordType::AAAA | RecordType::AliasAaaa => "AAAA",
        RecordType::CNAME => "CNAME",
        RecordType::TXT | RecordType::Meta => "TXT",
        RecordType::NS => "NS",
    }
}

fn to_rrset(request: &ChangeRequest, addition: bool) -> Rrset {
    let set = if addition {
        request.addition.as_ref().expect("addition present")
    } else {
        request
            .deletion
            .as_ref()
            .expect("deletion present")
    };
    Rrset {
        name: request.name.name.to_fqdn(),
        rtype: wire_type(set.rtype).to_string(),
        ttl: set.ttl,
        rrdatas: set.values().iter().map(ToString::to_string).collect(),
        routing_policy: None,
    }
}

/// Ingest one RRSet, expanding policy item arrays into per-identifier sets.
fn ingest_rrset(state: &mut ZoneState, rrset: &Rrset) {
    let Some(rtype) = RecordType::parse(&rrset.rtype) else {
        return;
    };
    let name = DnsName::new(&rrset.name);
    if let Some(policy) = &rrset.routing_policy {
        if let Some(wrr) = &policy.wrr {
            for (index, item) in wrr.items.iter().enumerate() {
                if item.rrdatas == vec![placeholder_rrdata(rtype).to_string()] {
                    continue;
                }
                let set_name = DnsSetName::with_identifier(name.clone(), &index.to_string());
                for value in &item.rrdatas {
                    state.add_value(set_name.clone(), rtype, rrset.ttl, value);
                }
                state.set_routing_policy(
                    &set_name,
                    RoutingPolicy::new(PolicyKind::Weighted)
                        .with("weight", format!("{}", item.weight as i64)),
                );
            }
            return;
        }
        if let Some(geo) = &policy.geo {
            for item in &geo.items {
                let set_name = DnsSetName::with_identifier(name.clone(), &item.location);
                for value in &item.rrdatas {
                    state.add_value(set_name.clone(), rtype, rrset.ttl, value);
                }
                state.set_routing_policy(
                    &set_name,
                    RoutingPolicy::new(PolicyKind::Geolocation)
                        .with("location", item.location.clone()),
                );
            }
            return;
        }
        // unknown policy encoding: treated as "no policy"
    }
    let set_name = DnsSetName::plain(name);
    for value in &rrset.rrdatas {
        state.add_value(set_name.clone(), rtype, rrset.ttl, value);
    }
}

fn parse_rsa_key(pem: &str) -> Result<ring::signature::RsaKeyPair, ProviderError> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader).map_err(|e| {
        ProviderError::Fatal {
            message: format!("unreadable service account private key: {e}"),
        }
    })?;
    let der = keys.into_iter().next().ok_or_else(|| ProviderError::Fatal {
        message: "service account JSON contains no PKCS#8 private key".to_string(),
    })?;
    ring::signature::RsaKeyPair::from_pkcs8(&der).map_err(|e| ProviderError::Fatal {
        message: format!("invalid RSA private key: {e}"),
    })
}

#[cfg(test)]
#[path = "google_tests.rs"]
mod google_tests;
