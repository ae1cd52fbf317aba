// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloudflare DNS handler.
//!
//! Simple record-level create/update/delete against the v4 API, token
//! authenticated. Record sets map to one record per value; a set update
//! deletes removed values, rewrites changed ones and creates the rest.

use crate::dnsname::{DnsName, DnsSetName};
use crate::errors::ProviderError;
use crate::metrics;
use crate::plan::ChangeRequest;
use crate::provider::{
    execute_requests_record_level, DnsHandler, HandlerContext, ProviderKind,
};
use crate::records::{unquote_txt, RecordSet, RecordType, ZoneState};
use crate::resources::ProviderConfig;
use crate::zones::{HostedZone, ZoneId};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    result: Option<T>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct WireZone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    id: String,
    #[serde(rename = "type")]
    rtype: String,
    name: String,
    content: String,
    #[serde(default)]
    ttl: u32,
}

/// Cloudflare handler for one API token.
pub struct CloudflareHandler {
    ctx: HandlerContext,
    token: String,
    base_url: String,
}

impl CloudflareHandler {
    /// Build the handler from `CLOUDFLARE_API_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when the token is missing.
    pub fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let token = config.required_credential("CLOUDFLARE_API_TOKEN")?.to_string();
        Ok(CloudflareHandler {
            ctx,
            token,
            base_url: API_BASE.to_string(),
        })
    }

    /// Point the handler at a mock API endpoint.
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse<T>, ProviderError> {
        let mut request = self
            .ctx
            .http()
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status.as_u16(), path, &text));
        }
        let parsed: ApiResponse<T> = response.json().await?;
        if !parsed.success {
            return Err(ProviderError::Transient {
                message: format!("API reported failure: {:?}", parsed.errors),
            });
        }
        Ok(parsed)
    }

    /// Records for one name and type, with their provider ids.
    async fn records_for(
        &self,
        zone: &HostedZone,
        name: &DnsName,
        rtype: RecordType,
    ) -> Result<Vec<WireRecord>, ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
        let path = format!(
            "/zones/{}/dns_records?name={}&type={}&per_page={PAGE_SIZE}",
            zone.id,
            urlencoding::encode(name.as_str()),
            wire_type(rtype)
        );
        let response: ApiResponse<Vec<WireRecord>> =
            self.request(reqwest::Method::GET, &path, None).await?;
        Ok(response.result.unwrap_or_default())
    }

    fn record_body(name: &DnsName, rtype: RecordType, value: &str, ttl: u32) -> serde_json::Value {
        json!({
            "type": wire_type(rtype),
            "name": name.as_str(),
            "content": if matches!(rtype, RecordType::TXT | RecordType::Meta) {
                unquote_txt(value).to_string()
            } else {
                value.to_string()
            },
            // Cloudflare uses 1 for "automatic"
            "ttl": if ttl == 0 { 1 } else { ttl },
        })
    }
}

#[async_trait]
impl DnsHandler for CloudflareHandler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Cloudflare
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
            let path = format!("/zones?page={page}&per_page=50&status=active");
            let response: ApiResponse<Vec<WireZone>> =
                self.request(reqwest::Method::GET, &path, None).await?;
            for wz in response.result.unwrap_or_default() {
                zones.push(HostedZone::new(
                    ProviderKind::Cloudflare.as_str(),
                    ZoneId::new(wz.id),
                    DnsName::new(&wz.name),
                    &self.ctx.provider_name,
                ));
            }
            let total_pages = response
                .result_info
                .map_or(1, |info| info.total_pages.max(1));
            if page >= total_pages {
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
            let path = format!(
                "/zones/{}/dns_records?page={page}&per_page={PAGE_SIZE}",
                zone.id
            );
            let response: ApiResponse<Vec<WireRecord>> =
                self.request(reqwest::Method::GET, &path, None).await?;
            let records = response.result.unwrap_or_default();
            for record in &records {
                let Some(rtype) = RecordType::parse(&record.rtype) else {
                    continue;
                };
                state.add_value(
                    DnsSetName::plain(DnsName::new(&record.name)),
                    rtype,
                    record.ttl,
                    &record.content,
                );
            }
            let total_pages = response
                .result_info
                .map_or(1, |info| info.total_pages.max(1));
            if page >= total_pages {
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
        let existing = self.records_for(zone, &name.name, new.rtype).await?;
        let desired: Vec<String> = new
            .values()
            .iter()
            .map(|v| unquote_txt(v).to_string())
            .collect();

        for record in &existing {
            if !desired.contains(&record.content) {
                self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
                let path = format!("/zones/{}/dns_records/{}", zone.id, record.id);
                let _: ApiResponse<serde_json::Value> =
                    self.request(reqwest::Method::DELETE, &path, None).await?;
            }
        }
        for value in &desired {
            match existing.iter().find(|r| &r.content == value) {
                Some(record) if record.ttl == new.ttl || new.ignore_ttl => {}
                Some(record) => {
                    self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
                    let path = format!("/zones/{}/dns_records/{}", zone.id, record.id);
                    let body = Self::record_body(&name.name, new.rtype, value, new.ttl);
                    let _: ApiResponse<serde_json::Value> =
                        self.request(reqwest::Method::PUT, &path, Some(body)).await?;
                }
                None => {
                    self.ctx.pre_call(&zone.id, metrics::REQ_CREATE).await;
                    let path = format!("/zones/{}/dns_records", zone.id);
                    let body = Self::record_body(&name.name, new.rtype, value, new.ttl);
                    let _: ApiResponse<serde_json::Value> =
                        self.request(reqwest::Method::POST, &path, Some(body)).await?;
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
        let existing = self.records_for(zone, &name.name, set.rtype).await?;
        for record in existing {
            self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
            let path = format!("/zones/{}/dns_records/{}", zone.id, record.id);
            let _: ApiResponse<serde_json::Value> =
                self.request(reqwest::Method::DELETE, &path, None).await?;
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

#[cfg(test)]
#[path = "cloudflare_tests.rs"]
mod cloudflare_tests;
