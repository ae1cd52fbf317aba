// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Netlify DNS handler.
//!
//! The API has no record update: an update is simulated by deleting the
//! existing records and creating the new ones.

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

const API_BASE: &str = "https://api.netlify.com/api/v1";

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
    hostname: String,
    value: String,
    #[serde(default)]
    ttl: u32,
}

/// Netlify handler for one auth token.
pub struct NetlifyHandler {
    ctx: HandlerContext,
    token: String,
    base_url: String,
}

impl NetlifyHandler {
    /// Build the handler from `NETLIFY_AUTH_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when the token is missing.
    pub fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let token = config.required_credential("NETLIFY_AUTH_TOKEN")?.to_string();
        Ok(NetlifyHandler {
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

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self
            .ctx
            .http()
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status.as_u16(), path, &body));
        }
        Ok(response.json().await?)
    }

    async fn zone_records(&self, zone: &HostedZone) -> Result<Vec<WireRecord>, ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
        self.get_json(&format!("/dns_zones/{}/dns_records", zone.id)).await
    }

    async fn delete_record(&self, zone: &HostedZone, record_id: &str) -> Result<(), ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
        let path = format!("/dns_zones/{}/dns_records/{record_id}", zone.id);
        let response = self
            .ctx
            .http()
            .delete(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status.as_u16(), &path, &body));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsHandler for NetlifyHandler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Netlify
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        self.ctx.pre_generic_call(metrics::REQ_LIST_ZONES).await;
        let wire_zones: Vec<WireZone> = self.get_json("/dns_zones").await?;
        Ok(wire_zones
            .into_iter()
            .map(|wz| {
                HostedZone::new(
                    ProviderKind::Netlify.as_str(),
                    ZoneId::new(wz.id),
                    DnsName::new(&wz.name),
                    &self.ctx.provider_name,
                )
            })
            .collect())
    }

    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError> {
        let records = self.zone_records(zone).await?;
        let mut state = ZoneState::new();
        for record in &records {
            let Some(rtype) = RecordType::parse(&record.rtype) else {
                continue;
            };
            state.add_value(
                DnsSetName::plain(DnsName::new(&record.hostname)),
                rtype,
                record.ttl,
                &record.value,
            );
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
        old: Option<&RecordSet>,
        new: &RecordSet,
    ) -> Result<(), ProviderError> {
        // no update on this API: replace by delete + create
        if let Some(old) = old {
            self.delete_record_set(zone, name, old).await?;
        }
        for value in new.values() {
            self.ctx.pre_call(&zone.id, metrics::REQ_CREATE).await;
            let body = json!({
                "type": wire_type(new.rtype),
                "hostname": name.name.as_str(),
                "value": if matches!(new.rtype, RecordType::TXT | RecordType::Meta) {
                    unquote_txt(value).to_string()
                } else {
                    value.to_string()
                },
                "ttl": new.ttl,
            });
            let path = format!("/dns_zones/{}/dns_records", zone.id);
            let response = self
                .ctx
                .http()
                .post(format!("{}{path}", self.base_url))
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_http_status(
                    status.as_u16(),
                    name.name.as_str(),
                    &text,
                ));
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
        let records = self.zone_records(zone).await?;
        for record in records {
            if DnsName::new(&record.hostname) == name.name
                && RecordType::parse(&record.rtype) == Some(set.rtype)
            {
                self.delete_record(zone, &record.id).await?;
            }
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
#[path = "netlify_tests.rs"]
mod netlify_tests;
