// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Wiremock-backed tests for the Cloudflare handler.

#[cfg(test)]
mod tests {
    use crate::dnsname::{DnsName, DnsSetName};
    use crate::provider::cloudflare::CloudflareHandler;
    use crate::provider::{DnsHandler, HandlerContext, ProviderKind};
    use crate::records::{RecordSet, RecordType};
    use crate::resources::ProviderConfig;
    use crate::zones::{HostedZone, ZoneId};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handler_for(server: &MockServer) -> CloudflareHandler {
        let mut config = ProviderConfig {
            name: "cf-test".to_string(),
            kind: "cloudflare-dns".to_string(),
            ..ProviderConfig::default()
        };
        config.credentials.insert(
            "CLOUDFLARE_API_TOKEN".to_string(),
            "test-token".to_string(),
        );
        let ctx = HandlerContext::new(ProviderKind::Cloudflare, &config).unwrap();
        CloudflareHandler::new(ctx, &config)
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn zone() -> HostedZone {
        HostedZone::new(
            "cloudflare-dns",
            ZoneId::new("z1"),
            DnsName::new("example.com"),
            "cf-test",
        )
    }

    fn ok_body(result: serde_json::Value) -> serde_json::Value {
        json!({"success": true, "errors": [], "result": result})
    }

    #[tokio::test]
    async fn test_get_zones() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{"id": "z1", "name": "example.com"}],
                "result_info": {"total_pages": 1},
            })))
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let zones = handler.get_zones().await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id, ZoneId::new("z1"));
        assert_eq!(zones[0].domain, DnsName::new("example.com"));
    }

    #[tokio::test]
    async fn test_get_zone_state_skips_unsupported_types() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [
                    {"id": "r1", "type": "A", "name": "app.example.com", "content": "1.2.3.4", "ttl": 300},
                    {"id": "r2", "type": "MX", "name": "example.com", "content": "10 mail.example.com", "ttl": 300},
                ],
                "result_info": {"total_pages": 1},
            })))
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let state = handler.get_zone_state(&zone()).await.unwrap();
        assert_eq!(state.len(), 1, "MX must be dropped");
        let set = state
            .get(&DnsSetName::plain(DnsName::new("app.example.com")))
            .unwrap();
        assert_eq!(set.get(RecordType::A).unwrap().values(), vec!["1.2.3.4"]);
    }

    #[tokio::test]
    async fn test_update_deletes_removed_values_and_creates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .and(query_param("name", "app.example.com"))
            .and(query_param("type", "A"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!([
                {"id": "r1", "type": "A", "name": "app.example.com", "content": "1.2.3.4", "ttl": 300},
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/zones/z1/dns_records/r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({"id": "r1"}))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({"id": "r2"}))))
            .expect(1)
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let name = DnsSetName::plain(DnsName::new("app.example.com"));
        let new = RecordSet::from_values(RecordType::A, 300, ["5.6.7.8"]);
        handler
            .create_or_update_record_set(&zone(), &name, None, &new)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ttl_change_rewrites_record_in_place() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .and(query_param("name", "app.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!([
                {"id": "r1", "type": "A", "name": "app.example.com", "content": "1.2.3.4", "ttl": 120},
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/zones/z1/dns_records/r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({"id": "r1"}))))
            .expect(1)
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let name = DnsSetName::plain(DnsName::new("app.example.com"));
        let new = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]);
        handler
            .create_or_update_record_set(&zone(), &name, None, &new)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_record_set_removes_all_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .and(query_param("name", "app.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!([
                {"id": "r1", "type": "A", "name": "app.example.com", "content": "1.2.3.4", "ttl": 300},
                {"id": "r2", "type": "A", "name": "app.example.com", "content": "5.6.7.8", "ttl": 300},
            ]))))
            .mount(&server)
            .await;
        for id in ["r1", "r2"] {
            Mock::given(method("DELETE"))
                .and(path(format!("/zones/z1/dns_records/{id}")))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(ok_body(json!({"id": id}))),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let handler = handler_for(&server);
        let name = DnsSetName::plain(DnsName::new("app.example.com"));
        let set = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4", "5.6.7.8"]);
        handler
            .delete_record_set(&zone(), &name, &set)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_failure_flag_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errors": [{"code": 10000, "message": "Authentication error"}],
                "result": null,
            })))
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let err = handler.get_zones().await.unwrap_err();
        assert!(err.is_transient());
    }
}
