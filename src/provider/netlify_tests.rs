// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Wiremock-backed tests for the Netlify handler.

#[cfg(test)]
mod tests {
    use crate::dnsname::{DnsName, DnsSetName};
    use crate::plan::ChangeRequest;
    use crate::provider::netlify::NetlifyHandler;
    use crate::provider::{DnsHandler, HandlerContext, ProviderKind};
    use crate::records::{RecordSet, RecordType};
    use crate::resources::ProviderConfig;
    use crate::zones::{HostedZone, ZoneId};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handler_for(server: &MockServer) -> NetlifyHandler {
        let mut config = ProviderConfig {
            name: "netlify-test".to_string(),
            kind: "netlify-dns".to_string(),
            ..ProviderConfig::default()
        };
        config
            .credentials
            .insert("NETLIFY_AUTH_TOKEN".to_string(), "test-token".to_string());
        let ctx = HandlerContext::new(ProviderKind::Netlify, &config).unwrap();
        NetlifyHandler::new(ctx, &config)
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn zone() -> HostedZone {
        HostedZone::new(
            "netlify-dns",
            ZoneId::new("zone-1"),
            DnsName::new("example.com"),
            "netlify-test",
        )
    }

    #[tokio::test]
    async fn test_get_zones() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dns_zones"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "zone-1", "name": "example.com"},
            ])))
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let zones = handler.get_zones().await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id, ZoneId::new("zone-1"));
    }

    #[tokio::test]
    async fn test_get_zone_state_skips_unsupported_types() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dns_zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "r1", "type": "A", "hostname": "app.example.com", "value": "1.2.3.4", "ttl": 300},
                {"id": "r2", "type": "SPF", "hostname": "example.com", "value": "v=spf1 -all", "ttl": 300},
            ])))
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let state = handler.get_zone_state(&zone()).await.unwrap();
        assert_eq!(state.len(), 1, "SPF must be dropped");
    }

    #[tokio::test]
    async fn test_update_is_simulated_as_delete_then_create() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dns_zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "r1", "type": "A", "hostname": "app.example.com", "value": "1.2.3.4", "ttl": 300},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/dns_zones/zone-1/dns_records/r1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dns_zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "r2"})))
            .expect(1)
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let name = DnsSetName::plain(DnsName::new("app.example.com"));
        let requests = vec![ChangeRequest::update(
            name,
            RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]),
            RecordSet::from_values(RecordType::A, 300, ["5.6.7.8"]),
        )];
        handler.execute_requests(&zone(), &requests).await.unwrap();

        // the delete must happen before the create so no stale record wins
        let received = server.received_requests().await.unwrap();
        let delete_pos = received
            .iter()
            .position(|r| r.method.to_string() == "DELETE")
            .expect("a DELETE was issued");
        let create_pos = received
            .iter()
            .position(|r| r.method.to_string() == "POST")
            .expect("a POST was issued");
        assert!(delete_pos < create_pos, "delete must precede create");
    }

    #[tokio::test]
    async fn test_delete_record_set_only_touches_matching_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dns_zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "r1", "type": "A", "hostname": "app.example.com", "value": "1.2.3.4", "ttl": 300},
                {"id": "r2", "type": "TXT", "hostname": "app.example.com", "value": "keep", "ttl": 300},
                {"id": "r3", "type": "A", "hostname": "other.example.com", "value": "9.9.9.9", "ttl": 300},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/dns_zones/zone-1/dns_records/r1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let name = DnsSetName::plain(DnsName::new("app.example.com"));
        let set = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]);
        handler
            .delete_record_set(&zone(), &name, &set)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dns_zones"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let err = handler.get_zones().await.unwrap_err();
        assert!(err.is_transient());
    }
}
