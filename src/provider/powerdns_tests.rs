// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Wiremock-backed tests for the PowerDNS handler.

#[cfg(test)]
mod tests {
    use crate::dnsname::{DnsName, DnsSetName};
    use crate::plan::ChangeRequest;
    use crate::provider::powerdns::PowerDnsHandler;
    use crate::provider::{DnsHandler, HandlerContext, ProviderKind};
    use crate::records::{RecordSet, RecordType};
    use crate::resources::ProviderConfig;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn handler_for(server: &MockServer) -> PowerDnsHandler {
        let mut config = ProviderConfig {
            name: "pdns-test".to_string(),
            kind: "powerdns".to_string(),
            ..ProviderConfig::default()
        };
        config
            .credentials
            .insert("Server".to_string(), server.uri());
        config
            .credentials
            .insert("ApiKey".to_string(), "secret-key".to_string());
        let ctx = HandlerContext::new(ProviderKind::PowerDns, &config).unwrap();
        PowerDnsHandler::new(ctx, &config).unwrap()
    }

    #[tokio::test]
    async fn test_get_zones() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/localhost/zones"))
            .and(header("X-API-Key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "example.com.", "name": "example.com."},
            ])))
            .mount(&server)
            .await;

        let handler = handler_for(&server).await;
        let zones = handler.get_zones().await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].domain, DnsName::new("example.com"));
    }

    #[tokio::test]
    async fn test_get_zone_state_parses_rrsets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/localhost/zones/example.com."))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rrsets": [
                    {
                        "name": "app.example.com.",
                        "type": "A",
                        "ttl": 300,
                        "records": [{"content": "1.2.3.4", "disabled": false}],
                    },
                    {
                        "name": "example.com.",
                        "type": "SOA",
                        "ttl": 3600,
                        "records": [{"content": "ns1. admin. 1 2 3 4 5", "disabled": false}],
                    },
                ],
            })))
            .mount(&server)
            .await;

        let handler = handler_for(&server).await;
        let zones = vec![crate::zones::HostedZone::new(
            "powerdns",
            crate::zones::ZoneId::new("example.com."),
            DnsName::new("example.com"),
            "localhost",
        )];
        let state = handler.get_zone_state(&zones[0]).await.unwrap();
        assert_eq!(state.len(), 1, "SOA must be dropped");
        let set = state
            .get(&DnsSetName::plain(DnsName::new("app.example.com")))
            .unwrap();
        assert_eq!(set.get(RecordType::A).unwrap().values(), vec!["1.2.3.4"]);
    }

    #[tokio::test]
    async fn test_execute_requests_patches_rrsets() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/servers/localhost/zones/example.com."))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        let handler = handler_for(&server).await;
        let zone = crate::zones::HostedZone::new(
            "powerdns",
            crate::zones::ZoneId::new("example.com."),
            DnsName::new("example.com"),
            "localhost",
        );
        let requests = vec![
            ChangeRequest::delete(
                DnsSetName::plain(DnsName::new("old.example.com")),
                RecordSet::from_values(RecordType::A, 300, ["9.9.9.9"]),
            ),
            ChangeRequest::create(
                DnsSetName::plain(DnsName::new("new.example.com")),
                RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]),
            ),
        ];
        handler.execute_requests(&zone, &requests).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/localhost/zones"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let handler = handler_for(&server).await;
        let err = handler.get_zones().await.unwrap_err();
        assert!(err.is_transient());
    }
}
