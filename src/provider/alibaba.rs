// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Alibaba Cloud DNS handler.
//!
//! The API is record-level: every value of a record set is an individual
//! record with its own id, enumerated page by page (page size 100) and
//! written with one call per record. Weighted routing needs an extra SLB
//! weight call after the record write; when the API answers
//! `DisableDNSSLB` the SLB status is switched on for the sub-domain and
//! the weight call retried once.
//!
//! Requests are signed with the account's AccessKey pair (HMAC-SHA1 over
//! the canonicalized query, RFC 3986 encoding).

use crate::constants::ALIBABA_PAGE_SIZE;
use crate::dnsname::{DnsName, DnsSetName};
use crate::errors::ProviderError;
use crate::metrics;
use crate::plan::ChangeRequest;
use crate::provider::{
    execute_requests_record_level, DnsHandler, HandlerContext, ProviderKind,
};
use crate::records::{unquote_txt, RecordSet, RecordType, ZoneState};
use crate::resources::ProviderConfig;
use crate::routing::{PolicyKind, RoutingPolicy};
use crate::zones::{HostedZone, ZoneId};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngExt;
use serde_json::Value;
use sha1::Sha1;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

type HmacSha1 = Hmac<Sha1>;

const API_ENDPOINT: &str = "https://alidns.aliyuncs.com/";
const API_VERSION: &str = "2015-01-09";

/// Alibaba Cloud DNS handler for one account.
pub struct AlibabaHandler {
    ctx: HandlerContext,
    access_key_id: String,
    access_key_secret: String,
}

impl AlibabaHandler {
    /// Build the handler from `ACCESS_KEY_ID`/`ACCESS_KEY_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when either key is missing.
    pub fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let access_key_id = config.required_credential("ACCESS_KEY_ID")?.to_string();
        let access_key_secret = config.required_credential("ACCESS_KEY_SECRET")?.to_string();
        Ok(AlibabaHandler {
            ctx,
            access_key_id,
            access_key_secret,
        })
    }

    /// One signed API call; all Alibaba operations are GETs with query
    /// parameters.
    async fn call(&self, action: &str, params: &[(&str, String)]) -> Result<Value, ProviderError> {
        let mut query: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        query.insert("Action".to_string(), action.to_string());
        query.insert("Format".to_string(), "JSON".to_string());
        query.insert("Version".to_string(), API_VERSION.to_string());
        query.insert("AccessKeyId".to_string(), self.access_key_id.clone());
        query.insert(
            "Timestamp".to_string(),
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        query.insert("SignatureMethod".to_string(), "HMAC-SHA1".to_string());
        query.insert("SignatureVersion".to_string(), "1.0".to_string());
        query.insert(
            "SignatureNonce".to_string(),
            format!("{:032x}", rand::rng().random::<u128>()),
        );

        let canonical = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let string_to_sign = format!("GET&%2F&{}", urlencoding::encode(&canonical));
        let mut mac = HmacSha1::new_from_slice(format!("{}&", self.access_key_secret).as_bytes())
            .map_err(|_| ProviderError::Fatal {
                message: "invalid Alibaba access key secret".to_string(),
            })?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let url = format!(
            "{API_ENDPOINT}?{canonical}&Signature={}",
            urlencoding::encode(&signature)
        );
        let response = self.ctx.http().get(&url).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() || body.get("Code").is_some() {
            return Err(classify_api_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    /// Existing records for one sub-domain and type, with their ids.
    async fn sub_domain_records(
        &self,
        zone: &HostedZone,
        name: &DnsName,
        rtype: RecordType,
    ) -> Result<Vec<(String, String)>, ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
        let body = self
            .call(
                "DescribeSubDomainRecords",
                &[
                    ("SubDomain", name.to_string()),
                    ("Type", wire_type(rtype).to_string()),
                    ("PageSize", ALIBABA_PAGE_SIZE.to_string()),
                ],
            )
            .await?;
        let mut records = Vec::new();
        if let Some(list) = body.pointer("/DomainRecords/Record").and_then(Value::as_array) {
            for record in list {
                let id = record
                    .get("RecordId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let value = record
                    .get("Value")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                records.push((id, value));
            }
        }
        Ok(records)
    }

    /// Apply the weighted-routing weight to a record, switching SLB on for
    /// the sub-domain when the API demands it.
    async fn apply_slb_weight(
        &self,
        zone: &HostedZone,
        name: &DnsName,
        record_id: &str,
        weight: i64,
    ) -> Result<(), ProviderError> {
        let params = [
            ("RecordId", record_id.to_string()),
            ("Weight", weight.to_string()),
        ];
        self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
        match self.call("UpdateDNSSLBWeight", &params).await {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("DisableDNSSLB") => {
                warn!(name = %name, "SLB disabled for sub-domain, enabling and retrying");
                self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
                self.call(
                    "SetDNSSLBStatus",
                    &[("SubDomain", name.to_string()), ("Open", "true".to_string())],
                )
                .await?;
                self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
                self.call("UpdateDNSSLBWeight", &params).await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    fn record_rr(zone: &HostedZone, name: &DnsName) -> String {
        if *name == zone.domain {
            "@".to_string()
        } else {
            name.as_str()
                .trim_end_matches(zone.domain.as_str())
                .trim_end_matches('.')
                .to_string()
        }
    }
}

#[async_trait]
impl DnsHandler for AlibabaHandler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::AlibabaDns
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        let mut zones = Vec::new();
        let mut page = 1u32;
        loop {
            let request_type = if page == 1 {
                metrics::REQ_LIST_ZONES
            } else {
                metrics::REQ_LIST_ZONE_PAGES
            };
            self.ctx.pre_generic_call(request_type).await;
            let body = match self
                .call(
                    "DescribeDomains",
                    &[
                        ("PageNumber", page.to_string()),
                        ("PageSize", ALIBABA_PAGE_SIZE.to_string()),
                    ],
                )
                .await
            {
                Ok(body) => body,
                // a single inaccessible domain must not fail the listing
                Err(ProviderError::ForbiddenZone { domain, message }) => {
                    warn!(%domain, %message, "skipping forbidden domain");
                    return Ok(zones);
                }
                Err(err) => return Err(err),
            };
            let list = body
                .pointer("/Domains/Domain")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for domain in &list {
                let name = domain
                    .get("DomainName")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let id = domain
                    .get("DomainId")
                    .and_then(Value::as_str)
                    .unwrap_or(name);
                zones.push(HostedZone::new(
                    ProviderKind::AlibabaDns.as_str(),
                    ZoneId::new(id),
                    DnsName::new(name),
                    &self.ctx.provider_name,
                ));
            }
            let total = body.get("TotalCount").and_then(Value::as_u64).unwrap_or(0);
            if u64::from(page) * u64::from(ALIBABA_PAGE_SIZE) >= total || list.is_empty() {
                return Ok(zones);
            }
            page += 1;
        }
    }

    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError> {
        let mut state = ZoneState::new();
        let mut page = 1u32;
        loop {
            let request_type = if page == 1 {
                metrics::REQ_LIST_RECORDS
            } else {
                metrics::REQ_LIST_RECORD_PAGES
            };
            self.ctx.pre_call(&zone.id, request_type).await;
            let body = self
                .call(
                    "DescribeDomainRecords",
                    &[
                        ("DomainName", zone.domain.to_string()),
                        ("PageNumber", page.to_string()),
                        ("PageSize", ALIBABA_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            let list = body
                .pointer("/DomainRecords/Record")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for record in &list {
                ingest_record(&mut state, zone, record);
            }
            let total = body.get("TotalCount").and_then(Value::as_u64).unwrap_or(0);
            if u64::from(page) * u64::from(ALIBABA_PAGE_SIZE) >= total || list.is_empty() {
                break;
            }
            page += 1;
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
        execute_requests_record_level(self, zone, requests).await?;
        // weighted policies need the extra SLB weight call per record
        for request in requests {
            let Some(policy) = &request.routing_policy else {
                continue;
            };
            if policy.kind != PolicyKind::Weighted
                || request.action == crate::plan::ChangeAction::Delete
            {
                continue;
            }
            let Some(weight) = policy.weight() else {
                continue;
            };
            let records = self
                .sub_domain_records(zone, &request.name.name, request.rtype)
                .await?;
            for (record_id, _) in &records {
                self.apply_slb_weight(zone, &request.name.name, record_id, weight)
                    .await?;
            }
        }
        info!(zone = %zone.id, changes = requests.len(), "changes applied");
        Ok(())
    }

    async fn create_or_update_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        _old: Option<&RecordSet>,
        new: &RecordSet,
    ) -> Result<(), ProviderError> {
        let rr = Self::record_rr(zone, &name.name);
        let existing = self.sub_domain_records(zone, &name.name, new.rtype).await?;
        let desired: Vec<String> = new
            .values()
            .iter()
            .map(|v| unquote_txt(v).to_string())
            .collect();

        // remove records no longer desired
        for (id, value) in &existing {
            if !desired.contains(value) {
                self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
                self.call("DeleteDomainRecord", &[("RecordId", id.clone())])
                    .await?;
            }
        }

        for value in &desired {
            match existing.iter().find(|(_, v)| v == value) {
                Some((record_id, _)) => {
                    self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
                    self.call(
                        "UpdateDomainRecord",
                        &[
                            ("RecordId", record_id.clone()),
                            ("RR", rr.clone()),
                            ("Type", wire_type(new.rtype).to_string()),
                            ("Value", value.clone()),
                            ("TTL", new.ttl.max(1).to_string()),
                        ],
                    )
                    .await?;
                }
                None => {
                    self.ctx.pre_call(&zone.id, metrics::REQ_CREATE).await;
                    self.call(
                        "AddDomainRecord",
                        &[
                            ("DomainName", zone.domain.to_string()),
                            ("RR", rr.clone()),
                            ("Type", wire_type(new.rtype).to_string()),
                            ("Value", value.clone()),
                            ("TTL", new.ttl.max(1).to_string()),
                        ],
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn delete_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        set: &RecordSet,
    ) -> Result<(), ProviderError> {
        let existing = self.sub_domain_records(zone, &name.name, set.rtype).await?;
        for (id, _) in existing {
            self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
            self.call("DeleteDomainRecord", &[("RecordId", id)]).await?;
        }
        Ok(())
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

fn ingest_record(state: &mut ZoneState, zone: &HostedZone, record: &Value) {
    let Some(rtype) = record
        .get("Type")
        .and_then(Value::as_str)
        .and_then(RecordType::parse)
    else {
        return;
    };
    let rr = record.get("RR").and_then(Value::as_str).unwrap_or("@");
    let name = if rr == "@" {
        zone.domain.clone()
    } else {
        DnsName::new(&format!("{rr}.{}", zone.domain))
    };
    let ttl = record
        .get("TTL")
        .and_then(Value::as_u64)
        .and_then(|t| u32::try_from(t).ok())
        .unwrap_or(0);
    let value = record.get("Value").and_then(Value::as_str).unwrap_or_default();
    let set_name = DnsSetName::plain(name);
    state.add_value(set_name.clone(), rtype, ttl, value);
    if let Some(weight) = record.get("Weight").and_then(Value::as_i64) {
        state.set_routing_policy(
            &set_name,
            RoutingPolicy::new(PolicyKind::Weighted).with("weight", weight.to_string()),
        );
    }
}

/// Classify an Alibaba API error body.
///
/// `Forbidden.RAM` covers a single domain the account may not touch; it is
/// surfaced as a zone-level skip rather than a handler failure.
fn classify_api_error(status: u16, body: &Value) -> ProviderError {
    let code = body.get("Code").and_then(Value::as_str).unwrap_or_default();
    let message = body
        .get("Message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if code.starts_with("Throttling") {
        return ProviderError::Throttled {
            message: format!("{code}: {message}"),
        };
    }
    if code == "Forbidden.RAM" {
        return ProviderError::ForbiddenZone {
            domain: body
                .get("DomainName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            message: format!("{code}: {message}"),
        };
    }
    if code == "DomainRecordDuplicate" {
        return ProviderError::Conflict {
            name: String::new(),
            message: format!("{code}: {message}"),
        };
    }
    if code.starts_with("InvalidAccessKeyId") || code.starts_with("SignatureDoesNotMatch") {
        return ProviderError::Fatal {
            message: format!("{code}: {message}"),
        };
    }
    if !code.is_empty() && status < 500 {
        return ProviderError::Invalid {
            name: String::new(),
            reason: format!("{code}: {message}"),
        };
    }
    ProviderError::Transient {
        message: format!("HTTP {status} {code}: {message}"),
    }
}
