// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! RFC 2136 dynamic-update handler.
//!
//! Drives a single TSIG-protected zone on a classic authoritative server.
//! Zone state is read with an AXFR query over TCP; writes are dynamic
//! update messages signed with the configured TSIG key, deletes before
//! inserts. A TTL-only change is encoded as delete+insert when
//! `recreateOnTTLChange` is set (the default), because plain updates
//! cannot change a TTL in place.
//!
//! The hickory client is synchronous, so every wire operation runs inside
//! `tokio::task::spawn_blocking`.

use crate::constants::{DNS_PORT, TSIG_FUDGE_TIME_SECS};
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
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hickory_client::client::{Client, SyncClient};
use hickory_client::op::ResponseCode;
use hickory_client::rr::rdata::tsig::TsigAlgorithm;
use hickory_client::rr::{rdata, DNSClass, Name, RData, Record};
use hickory_client::tcp::TcpClientConnection;
use hickory_proto::rr::dnssec::tsig::TSigner;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Clone)]
struct TsigKey {
    name: String,
    algorithm: String,
    secret: String,
}

/// RFC 2136 handler for one zone on one server.
pub struct Rfc2136Handler {
    ctx: HandlerContext,
    server: SocketAddr,
    zone: DnsName,
    key: TsigKey,
    recreate_on_ttl_change: bool,
}

impl Rfc2136Handler {
    /// Build the handler from `Server`, `Zone`, `TSIGKeyName` and
    /// `TSIGSecret`; `TSIGSecretAlgorithm` defaults to hmac-sha256.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when required credentials are
    /// missing or the server address does not parse.
    pub fn new(ctx: HandlerContext, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let server_raw = config.required_credential("Server")?;
        let server = if server_raw.contains(':') {
            server_raw.parse()
        } else {
            format!("{server_raw}:{DNS_PORT}").parse()
        }
        .map_err(|e| ProviderError::Fatal {
            message: format!("invalid RFC2136 server address '{server_raw}': {e}"),
        })?;
        let zone = DnsName::new(config.required_credential("Zone")?);
        let key = TsigKey {
            name: config.required_credential("TSIGKeyName")?.to_string(),
            algorithm: config
                .credential("TSIGSecretAlgorithm")
                .unwrap_or("hmac-sha256")
                .to_string(),
            secret: config.required_credential("TSIGSecret")?.to_string(),
        };
        let recreate_on_ttl_change = config
            .credential("recreateOnTTLChange")
            .map_or(true, |v| v != "false");
        Ok(Rfc2136Handler {
            ctx,
            server,
            zone,
            key,
            recreate_on_ttl_change,
        })
    }

    fn signer(key: &TsigKey) -> Result<TSigner, ProviderError> {
        let algorithm = match key.algorithm.to_ascii_lowercase().as_str() {
            "hmac-md5" => TsigAlgorithm::HmacMd5,
            "hmac-sha1" => TsigAlgorithm::HmacSha1,
            "hmac-sha224" => TsigAlgorithm::HmacSha224,
            "hmac-sha384" => TsigAlgorithm::HmacSha384,
            "hmac-sha512" => TsigAlgorithm::HmacSha512,
            _ => TsigAlgorithm::HmacSha256,
        };
        let key_bytes = BASE64.decode(&key.secret).map_err(|e| ProviderError::Fatal {
            message: format!("TSIG secret is not valid base64: {e}"),
        })?;
        let name = Name::from_str(&key.name).map_err(|e| ProviderError::Fatal {
            message: format!("invalid TSIG key name '{}': {e}", key.name),
        })?;
        TSigner::new(
            key_bytes,
            algorithm,
            name,
            u16::try_from(TSIG_FUDGE_TIME_SECS).unwrap_or(300),
        )
        .map_err(|e| ProviderError::Fatal {
            message: format!("failed to create TSIG signer: {e}"),
        })
    }

    fn connect(
        server: SocketAddr,
        key: &TsigKey,
    ) -> Result<SyncClient<TcpClientConnection>, ProviderError> {
        let conn = TcpClientConnection::new(server).map_err(|e| ProviderError::Transient {
            message: format!("cannot connect to {server}: {e}"),
        })?;
        Ok(SyncClient::with_tsigner(conn, Self::signer(key)?))
    }

    /// Run a blocking hickory operation on the blocking pool.
    async fn blocking<F, T>(&self, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce(SyncClient<TcpClientConnection>, Name) -> Result<T, ProviderError>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let server = self.server;
        let key = self.key.clone();
        let zone = self.zone.clone();
        tokio::task::spawn_blocking(move || {
            let client = Self::connect(server, &key)?;
            let origin = Name::from_str(&zone.to_fqdn()).map_err(|e| ProviderError::Fatal {
                message: format!("invalid zone name '{zone}': {e}"),
            })?;
            op(client, origin)
        })
        .await
        .map_err(|e| ProviderError::Transient {
            message: format!("blocking DNS task failed: {e}"),
        })?
    }

    fn build_records(
        name: &DnsName,
        set: &RecordSet,
    ) -> Result<Vec<Record>, ProviderError> {
        let fqdn = Name::from_str(&name.to_fqdn()).map_err(|e| ProviderError::Invalid {
            name: name.to_string(),
            reason: format!("invalid record name: {e}"),
        })?;
        let mut records = Vec::with_capacity(set.records.len());
        for value in set.values() {
            let data = match set.rtype {
                RecordType::A | RecordType::AliasA => {
                    let addr = Ipv4Addr::from_str(value).map_err(|_| ProviderError::Invalid {
                        name: name.to_string(),
                        reason: format!("invalid IPv4 address '{value}'"),
                    })?;
                    RData::A(addr.into())
                }
                RecordType::AAAA | RecordType::AliasAaaa => {
                    let addr = Ipv6Addr::from_str(value).map_err(|_| ProviderError::Invalid {
                        name: name.to_string(),
                        reason: format!("invalid IPv6 address '{value}'"),
                    })?;
                    RData::AAAA(addr.into())
                }
                RecordType::CNAME | RecordType::NS => {
                    let target =
                        Name::from_str(&DnsName::new(value).to_fqdn()).map_err(|e| {
                            ProviderError::Invalid {
                                name: name.to_string(),
                                reason: format!("invalid target '{value}': {e}"),
                            }
                        })?;
                    if set.rtype == RecordType::NS {
                        RData::NS(rdata::NS(target))
                    } else {
                        RData::CNAME(rdata::CNAME(target))
                    }
                }
                RecordType::TXT | RecordType::Meta => {
                    RData::TXT(rdata::TXT::new(vec![unquote_txt(value).to_string()]))
                }
            };
            let mut record = Record::from_rdata(fqdn.clone(), set.ttl, data);
            record.set_dns_class(DNSClass::IN);
            records.push(record);
        }
        Ok(records)
    }

    fn check_response(code: ResponseCode, what: &str) -> Result<(), ProviderError> {
        match code {
            ResponseCode::NoError => Ok(()),
            ResponseCode::Refused | ResponseCode::NotAuth => Err(ProviderError::Fatal {
                message: format!("{what} refused by server: {code:?}"),
            }),
            code => Err(ProviderError::Transient {
                message: format!("{what} failed with response code {code:?}"),
            }),
        }
    }
}

#[async_trait]
impl DnsHandler for Rfc2136Handler {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Rfc2136
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn get_zones(&self) -> Result<Vec<HostedZone>, ProviderError> {
        // the zone is fixed by configuration, no listing API exists
        self.ctx.pre_generic_call(metrics::REQ_LIST_ZONES).await;
        Ok(vec![HostedZone::new(
            ProviderKind::Rfc2136.as_str(),
            ZoneId::new(self.zone.as_str()),
            self.zone.clone(),
            &self.server.to_string(),
        )])
    }

    async fn get_zone_state(&self, zone: &HostedZone) -> Result<ZoneState, ProviderError> {
        self.ctx.pre_call(&zone.id, metrics::REQ_LIST_RECORDS).await;
        let answers = self
            .blocking(move |client, origin| {
                let response = client
                    .query(
                        &origin,
                        DNSClass::IN,
                        hickory_client::rr::RecordType::AXFR,
                    )
                    .map_err(|e| ProviderError::Transient {
                        message: format!("zone transfer query failed: {e}"),
                    })?;
                Self::check_response(response.response_code(), "zone transfer")?;
                Ok(response.answers().to_vec())
            })
            .await?;

        let mut state = ZoneState::new();
        for answer in &answers {
            let name = DnsName::new(&answer.name().to_utf8());
            let ttl = answer.ttl();
            let Some(data) = answer.data() else {
                continue;
            };
            let (rtype, value) = match data {
                RData::A(a) => (RecordType::A, a.to_string()),
                RData::AAAA(aaaa) => (RecordType::AAAA, aaaa.to_string()),
                RData::CNAME(cname) => {
                    (RecordType::CNAME, DnsName::new(&cname.0.to_utf8()).to_string())
                }
                RData::NS(ns) => (RecordType::NS, DnsName::new(&ns.0.to_utf8()).to_string()),
                RData::TXT(txt) => (RecordType::TXT, txt.to_string()),
                _ => continue,
            };
            state.add_value(DnsSetName::plain(name), rtype, ttl, &value);
        }
        state.extract_meta_sets(&zone.domain);
        let sets = state.calculate_dns_sets();
        debug!(zone = %zone.id, sets, "loaded zone state via AXFR");
        Ok(state)
    }

    async fn execute_requests(
        &self,
        zone: &HostedZone,
        requests: &[ChangeRequest],
    ) -> Result<(), ProviderError> {
        execute_requests_record_level(self, zone, requests).await?;
        info!(zone = %zone.id, changes = requests.len(), "dynamic updates applied");
        Ok(())
    }

    async fn create_or_update_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        old: Option<&RecordSet>,
        new: &RecordSet,
    ) -> Result<(), ProviderError> {
        if let Some(old) = old {
            if old.same_values(new) && !self.recreate_on_ttl_change {
                // only the TTL differs and in-place recreation is disabled
                return Ok(());
            }
        }
        let records = Self::build_records(&name.name, new)?;
        let delete_first = old.is_some();
        self.ctx.pre_call(&zone.id, metrics::REQ_UPDATE).await;
        self.blocking(move |client, origin| {
            // the dynamic update deletes the RRset before inserting
            if delete_first {
                if let Some(first) = records.first() {
                    let response = client
                        .delete_rrset(first.clone(), origin.clone())
                        .map_err(|e| ProviderError::Transient {
                            message: format!("rrset delete failed: {e}"),
                        })?;
                    Self::check_response(response.response_code(), "rrset delete")?;
                }
            }
            for record in records {
                let response = client
                    .append(record, origin.clone(), false)
                    .map_err(|e| ProviderError::Transient {
                        message: format!("record insert failed: {e}"),
                    })?;
                Self::check_response(response.response_code(), "record insert")?;
            }
            Ok(())
        })
        .await
    }

    async fn delete_record_set(
        &self,
        zone: &HostedZone,
        name: &DnsSetName,
        set: &RecordSet,
    ) -> Result<(), ProviderError> {
        let records = Self::build_records(&name.name, set)?;
        self.ctx.pre_call(&zone.id, metrics::REQ_DELETE).await;
        self.blocking(move |client, origin| {
            if let Some(first) = records.first() {
                let response = client
                    .delete_rrset(first.clone(), origin)
                    .map_err(|e| ProviderError::Transient {
                        message: format!("rrset delete failed: {e}"),
                    })?;
                Self::check_response(response.response_code(), "rrset delete")?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordSet;

    #[test]
    fn test_build_a_records() {
        let set = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4", "5.6.7.8"]);
        let records = Rfc2136Handler::build_records(&DnsName::new("app.example.com"), &set).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ttl(), 300);
        assert_eq!(records[0].name().to_utf8(), "app.example.com.");
    }

    #[test]
    fn test_build_txt_records_unquoted_on_wire() {
        let set = RecordSet::from_values(RecordType::TXT, 300, ["owner=g"]);
        let records = Rfc2136Handler::build_records(&DnsName::new("t.example.com"), &set).unwrap();
        match records[0].data() {
            Some(RData::TXT(txt)) => assert_eq!(txt.to_string(), "owner=g"),
            other => panic!("expected TXT rdata, got {other:?}"),
        }
    }

    #[test]
    fn test_build_rejects_bad_address() {
        let set = RecordSet::from_values(RecordType::A, 300, ["not-an-ip"]);
        let err =
            Rfc2136Handler::build_records(&DnsName::new("app.example.com"), &set).unwrap_err();
        assert!(matches!(err, ProviderError::Invalid { .. }));
    }
}
