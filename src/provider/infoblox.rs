// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Infoblox WAPI handler.
//!
//! Records live as per-type WAPI objects (`record:a`, `record:aaaa`,
//! `record:cname`, `record:txt`) referenced by opaque `_ref` strings.
//! Updates must rebuild the object without the server-owned `zone`,
//! `view` and `name` fields, otherwise the WAPI rejects the write.

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
use serde_json::{json, Value};
use tracing::{debug, info};

/// Infoblox handler for one grid endpoint.
pub struct InfobloxHandler {
    ctx: HandlerContext,
    base_url: String,
    username: String,
    password: String,
    view: String,
    max_results: u32,
}

impl InfobloxHandler {
    /// Build the handler from `USERNAME`/`PASSWORD`/`HOST`, with
    /// `PORT` (443), `VERSION` (2.10), `VIEW` (default) and
    /// `MAX_RESULTS` optional. `HOST` may carry an explicit scheme and
    /// port, e.g. `https://gridmaster.example:8443`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when required credentials are
    /// missing.
    pub fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let username = config.required_credential("USERNAME")?.to_string();
        let password = config.required_credential("PASSWORD")?.to_string();
        let host = config.required_credential("HOST")?;
        let port = config.credential("PORT").unwrap_or("443");
        let version = config.credential("VERSION").unwrap_or("2.10");
        let view = config.credential("VIEW").unwrap_or("default").to_string();
        let max_results = config
            .credential("MAX_RESULTS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        let base_url = if host.contains("://") {
            format!("{}/wapi/v{version}", host.trim_end_matches('/'))
        } else {
            format!("https://{host}:{port}/wapi/v{version}")
        };
        Ok(InfobloxHandler {
            ctx,
            base_url,
            username,
            password,
            view,
            max_results,
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ProviderError> {
        let mut request = self
            .ctx
            .http()
            .request(method, format!("{}{path}", self.base_url))
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::from_http_status(status.as_u16(), path, &text));
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::Transient {
            message: format!("unparsable WAPI response: {e}"),
        })
    }

    /// Objects of one record type for a name, with their `_ref`s.
    async fn objects_for(
        &self,
        zone: &HostedZone,
        name: &DnsName,
        rtype: RecordType,
    ) -> Result<Vec<Value>, ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
        let path = format!(
            "/{}?name={}&view={}&_return_as_object=0",
            object_type(rtype),
            urlencoding::encode(name.as_str()),
            urlencoding::encode(&self.view),
        );
        let body = self.request(reqwest::Method::GET, &path, None).await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    fn object_body(&self, name: &DnsName, rtype: RecordType, value: &str, ttl: u32) -> Value {
        let mut body = json!({
            "name": name.as_str(),
            "view": self.view,
            "ttl": ttl,
            "use_ttl": true,
        });
        let field = match rtype {
            RecordType::A | RecordType::AliasA => ("ipv4addr", value.to_string()),
            RecordType::AAAA | RecordType::AliasAaaa => ("ipv6addr", value.to_string()),
            RecordType::CNAME => ("canonical", value.to_string()),
            _ => ("text", unquote_txt(value).to_string()),
        };
        body[field.0] = Value::String(field.1);
        body
    }

    /// Rebuild an object for update: the WAPI owns `zone`, `view` and
    /// `name`, so they are stripped before the PUT.
    fn update_body(&self, name: &DnsName, rtype: RecordType, value: &str, ttl: u32) -> Value {
        let mut body = self.object_body(name, rtype, value, ttl);
        if let Some(map) = body.as_object_mut() {
            map.remove("zone");
            map.remove("view");
            map.remove("name");
        }
        body
    }
}

#[async_trait]
impl DnsHandler for InfobloxHandler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Infoblox
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        self.ctx.pre_generic_call(metrics::REQ_LIST_ZONES).await;
        let path = format!(
            "/zone_auth?view={}&_max_results={}",
            urlencoding::encode(&self.view),
            self.max_results
        );
        let body = self.request(reqwest::Method::GET, &path, None).await?;
        let mut zones = Vec::new();
        for obj in body.as_array().cloned().unwrap_or_default() {
            let Some(fqdn) = obj.get("fqdn").and_then(Value::as_str) else {
                continue;
            };
            let id = obj
                .get("_ref")
                .and_then(Value::as_str)
                .unwrap_or(fqdn)
                .to_string();
            zones.push(HostedZone::new(
                ProviderKind::Infoblox.as_str(),
                ZoneId::new(id),
                DnsName::new(fqdn),
                &self.view,
            ));
        }
        Ok(zones)
    }

    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError> {
        let mut state = ZoneState::new();
        for rtype in [RecordType::A, RecordType::AAAA, RecordType::CNAME, RecordType::TXT] {
            self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
            let path = format!(
                "/{}?zone={}&view={}&_max_results={}&_return_fields%2B=ttl",
                object_type(rtype),
                urlencoding::encode(zone.domain.as_str()),
                urlencoding::encode(&self.view),
                self.max_results
            );
            let body = self.request(reqwest::Method::GET, &path, None).await?;
            for obj in body.as_array().cloned().unwrap_or_default() {
                let Some(name) = obj.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let value = obj
                    .get("ipv4addr")
                    .or_else(|| obj.get("ipv6addr"))
                    .or_else(|| obj.get("canonical"))
                    .or_else(|| obj.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let ttl = obj
                    .get("ttl")
                    .and_then(Value::as_u64)
                    .and_then(|t| u32::try_from(t).ok())
                    .unwrap_or(0);
                state.add_value(
                    DnsSetName::plain(DnsName::new(name)),
                    rtype,
                    ttl,
                    value,
                );
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
        let existing = self.objects_for(zone, &name.name, new.rtype).await?;
        let desired: Vec<String> = new
            .values()
            .iter()
            .map(|v| unquote_txt(v).to_string())
            .collect();

        let value_of = |obj: &Value| {
            obj.get("ipv4addr")
                .or_else(|| obj.get("ipv6addr"))
                .or_else(|| obj.get("canonical"))
                .or_else(|| obj.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        for obj in &existing {
            let value = value_of(obj);
            let reference = obj.get("_ref").and_then(Value::as_str).unwrap_or_default();
            if reference.is_empty() {
                continue;
            }
            if desired.contains(&value) {
                self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
                let body = self.update_body(&name.name, new.rtype, &value, new.ttl);
                self.request(reqwest::Method::PUT, &format!("/{reference}"), Some(body))
                    .await?;
            } else {
                self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
                self.request(reqwest::Method::DELETE, &format!("/{reference}"), None)
                    .await?;
            }
        }
        let known: Vec<String> = existing.iter().map(|o| value_of(o)).collect();
        for value in desired.iter().filter(|v| !known.contains(v)) {
            self.ctx.pre_call(&zone.id, metrics::REQ_CREATE).await;
            let body = self.object_body(&name.name, new.rtype, value, new.ttl);
            self.request(
                reqwest::Method::POST,
                &format!("/{}", object_type(new.rtype)),
                Some(body),
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        set: &RecordSet,
    ) -> Result<(), ProviderError> {
        let existing = self.objects_for(zone, &name.name, set.rtype).await?;
        for obj in existing {
            let Some(reference) = obj.get("_ref").and_then(Value::as_str) else {
                continue;
            };
            self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
            self.request(reqwest::Method::DELETE, &format!("/{reference}"), None)
                .await?;
        }
        Ok(())
    }
}

fn object_type(rtype: RecordType) -> &'static str {
    match rtype {
        RecordType::A | RecordType::AliasA => "record:a",
        RecordType::AAAA | RecordType::AliasAaaa => "record:aaaa",
        RecordType::CNAME => "record:cname",
        _ => "record:txt",
    }
}

#[cfg(test)]
#[path = "infoblox_tests.rs"]
mod infoblox_tests;
