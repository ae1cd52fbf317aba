// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! PowerDNS handler.
//!
//! The authoritative server's HTTP API works on whole RRsets: a PATCH with
//! changetype `REPLACE` or `DELETE` per set, authenticated with the
//! `X-API-Key` header.

use crate::dnsname::{DnsName, DnsSetName};
use crate::errors::ProviderError;
use crate::metrics;
use crate::plan::ChangeRequest;
use crate::provider::{
    execute_requests_record_level, DnsHandler, HandlerContext, ProviderKind,
};
use crate::records::{RecordSet, RecordType, ZoneState};
use crate::resources::ProviderConfig;
use crate::zones::{HostedZone, ZoneId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct WireZone {
    id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireZoneDetail {
    #[serde(default)]
    rrsets: Vec<WireRrset>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct WireRrset {
    name: String,
    #[serde(rename = "type")]
    rtype: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    records: Vec<WireRecord>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct WireRecord {
    content: String,
    #[serde(default)]
    disabled: bool,
}

/// PowerDNS handler for one API endpoint.
pub struct PowerDnsHandler {
    ctx: HandlerContext,
    base_url: String,
    server: String,
    api_key: String,
}

impl PowerDnsHandler {
    /// Build the handler from `Server` and `ApiKey`; `VirtualHost` selects
    /// the server name (default `localhost`).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when required credentials are
    /// missing.
    pub fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let base_url = config
            .required_credential("Server")?
            .trim_end_matches('/')
            .to_string();
        let api_key = config.required_credential("ApiKey")?.to_string();
        let server = config
            .credential("VirtualHost")
            .unwrap_or("localhost")
            .to_string();
        Ok(PowerDnsHandler {
            ctx,
            base_url,
            server,
            api_key,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}/api/v1/servers/{}{path}", self.base_url, self.server);
        let response = self
            .ctx
            .http()
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status.as_u16(), path, &body));
        }
        Ok(response.json().await?)
    }

    /// PATCH one RRset change onto a zone.
    async fn patch_rrset(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        set: &RecordSet,
        changetype: &str,
    ) -> Result<(), ProviderError> {
        let rrset = json!({
            "rrsets": [{
                "name": name.name.to_fqdn(),
                "type": wire_type(set.rtype),
                "ttl": set.ttl,
                "changetype": changetype,
                "records": set
                    .values()
                    .iter()
                    .map(|v| json!({"content": v, "disabled": false}))
                    .collect::<Vec<_>>(),
            }],
        });
        let url = format!(
            "{}/api/v1/servers/{}/zones/{}",
            self.base_url, self.server, zone.id
        );
        let response = self
            .ctx
            .http()
            .patch(&url)
            .header("X-API-Key", &self.api_key)
            .json(&rrset)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(
                status.as_u16(),
                name.name.as_str(),
                &body,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsHandler for PowerDnsHandler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::PowerDns
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        self.ctx.pre_generic_call(metrics::REQ_LIST_ZONES).await;
        let wire_zones: Vec<WireZone> = self.get_json("/zones").await?;
        Ok(wire_zones
            .into_iter()
            .map(|wz| {
                HostedZone::new(
                    ProviderKind::PowerDns.as_str(),
                    ZoneId::new(wz.id),
                    DnsName::new(&wz.name),
                    &self.server,
                )
            })
            .collect())
    }

    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
        let detail: WireZoneDetail = self.get_json(&format!("/zones/{}", zone.id)).await?;
        let mut state = ZoneState::new();
        for rrset in &detail.rrsets {
            let Some(rtype) = RecordType::parse(&rrset.rtype) else {
                continue;
            };
            let name = DnsSetName::plain(DnsName::new(&rrset.name));
            for record in &rrset.records {
                if record.disabled {
                    continue;
                }
                state.add_value(name.clone(), rtype, rrset.ttl, &record.content);
            }
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
        self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
        self.patch_rrset(zone, name, new, "REPLACE").await
    }

    async fn delete_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        set: &RecordSet,
    ) -> Result<(), ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
        self.patch_rrset(zone, name, set, "DELETE").await
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
#[path = "powerdns_tests.rs"]
mod powerdns_tests;
