// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for Cloud DNS rrset ingestion, placeholders, and the
//! weighted write path.

#[cfg(test)]
mod tests {
    use crate::provider::google::*;
    use crate::dnsname::{DnsName, DnsSetName};
    use crate::plan::ChangeRequest;
    use crate::provider::{DnsHandler, HandlerContext, ProviderKind};
    use crate::records::{RecordSet, RecordType, ZoneState};
    use crate::resources::ProviderConfig;
    use crate::routing::{PolicyKind, RoutingPolicy};
    use crate::zones::{HostedZone, ZoneId};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handler_for(server: &MockServer) -> CloudDnsHandler {
        let config = ProviderConfig {
            name: "google-test".to_string(),
            kind: "google-clouddns".to_string(),
            ..ProviderConfig::default()
        };
        let ctx = HandlerContext::new(ProviderKind::GoogleCloudDns, &config).unwrap();
        CloudDnsHandler::for_tests(ctx, "test-project", &server.uri())
    }

    fn zone() -> HostedZone {
        HostedZone::new(
            "google-clouddns",
            ZoneId::new("z1"),
            DnsName::new("example.com"),
            "test-project",
        )
    }

    fn weighted_create(set_id: &str, weight: &str, target: &str) -> ChangeRequest {
        ChangeRequest::create(
            DnsSetName::with_identifier(DnsName::new("w.example.com"), set_id),
            RecordSet::from_values(RecordType::A, 60, [target]),
        )
        .with_policy(Some(
            RoutingPolicy::new(PolicyKind::Weighted).with("weight", weight),
        ))
    }

    async fn posted_change(server: &MockServer) -> serde_json::Value {
        let received = server.received_requests().await.unwrap();
        let post = received
            .iter()
            .find(|r| r.method.to_string() == "POST")
            .expect("a change was submitted");
        serde_json::from_slice(&post.body).unwrap()
    }

    #[test]
    fn test_placeholder_rrdatas() {
        assert_eq!(placeholder_rrdata(RecordType::A), "233.252.0.1");
        assert_eq!(placeholder_rrdata(RecordType::AAAA), "100::");
        assert_eq!(placeholder_rrdata(RecordType::CNAME), "placeholder.invalid.");
        assert_eq!(placeholder_rrdata(RecordType::TXT), "\"__placeholder__\"");
    }

    #[test]
    fn test_ingest_plain_rrset() {
        let rrset: serde_json::Value = serde_json::json!({
            "name": "app.example.com.",
            "type": "A",
            "ttl": 300,
            "rrdatas": ["1.2.3.4", "5.6.7.8"],
        });
        let rrset = serde_json::from_value(rrset).unwrap();
        let mut state = ZoneState::new();
        ingest_rrset(&mut state, &rrset);
        state.calculate_dns_sets();

        let set = state
            .get(&DnsSetName::plain(DnsName::new("app.example.com")))
            .unwrap();
        assert_eq!(set.get(RecordType::A).unwrap().records.len(), 2);
    }

    #[test]
    fn test_ingest_wrr_items_skips_placeholders() {
        let rrset = serde_json::json!({
            "name": "w.example.com.",
            "type": "A",
            "ttl": 60,
            "routingPolicy": {
                "wrr": {
                    "items": [
                        {"weight": 0, "rrdatas": ["233.252.0.1"]},
                        {"weight": 20, "rrdatas": ["5.6.7.8"]},
                    ]
                }
            }
        });
        let rrset = serde_json::from_value(rrset).unwrap();
        let mut state = ZoneState::new();
        ingest_rrset(&mut state, &rrset);
        state.calculate_dns_sets();

        // index 0 is a placeholder and must not materialize
        assert!(state
            .get(&DnsSetName::with_identifier(DnsName::new("w.example.com"), "0"))
            .is_none());

        let set = state
            .get(&DnsSetName::with_identifier(DnsName::new("w.example.com"), "1"))
            .expect("index 1");
        assert_eq!(set.get(RecordType::A).unwrap().values(), vec!["5.6.7.8"]);
        let policy = set.routing_policy.as_ref().expect("weighted policy");
        assert_eq!(policy.kind, PolicyKind::Weighted);
        assert_eq!(policy.parameter("weight"), Some("20"));
    }

    #[test]
    fn test_ingest_geo_items() {
        let rrset = serde_json::json!({
            "name": "g.example.com.",
            "type": "A",
            "ttl": 60,
            "routingPolicy": {
                "geo": {
                    "items": [
                        {"location": "europe-west1", "rrdatas": ["1.2.3.4"]},
                    ]
                }
            }
        });
        let rrset = serde_json::from_value(rrset).unwrap();
        let mut state = ZoneState::new();
        ingest_rrset(&mut state, &rrset);
        state.calculate_dns_sets();

        let set = state
            .get(&DnsSetName::with_identifier(
                DnsName::new("g.example.com"),
                "europe-west1",
            ))
            .expect("geo item");
        let policy = set.routing_policy.as_ref().unwrap();
        assert_eq!(policy.kind, PolicyKind::Geolocation);
        assert_eq!(policy.parameter("location"), Some("europe-west1"));
    }

    #[test]
    fn test_unknown_policy_encoding_treated_as_plain() {
        let rrset = serde_json::json!({
            "name": "x.example.com.",
            "type": "A",
            "ttl": 60,
            "rrdatas": ["9.9.9.9"],
            "routingPolicy": {}
        });
        let rrset = serde_json::from_value(rrset).unwrap();
        let mut state = ZoneState::new();
        ingest_rrset(&mut state, &rrset);
        state.calculate_dns_sets();

        let set = state
            .get(&DnsSetName::plain(DnsName::new("x.example.com")))
            .expect("plain set");
        assert!(set.routing_policy.is_none());
    }

    #[tokio::test]
    async fn test_weighted_creates_write_single_rrset_with_indexed_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test-project/managedZones/z1/rrsets"))
            .and(query_param("name", "w.example.com."))
            .and(query_param("type", "A"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rrsets": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/test-project/managedZones/z1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let requests = vec![
            weighted_create("0", "10", "1.2.3.4"),
            weighted_create("1", "20", "5.6.7.8"),
        ];
        handler.execute_requests(&zone(), &requests).await.unwrap();

        let change = posted_change(&server).await;
        assert!(change.get("deletions").is_none(), "no prior rrset existed");
        let additions = change["additions"].as_array().unwrap();
        assert_eq!(additions.len(), 1, "one merged RRSet write");
        let items = additions[0]["routingPolicy"]["wrr"]["items"]
            .as_array()
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["weight"], json!(10.0));
        assert_eq!(items[0]["rrdatas"], json!(["1.2.3.4"]));
        assert_eq!(items[1]["weight"], json!(20.0));
        assert_eq!(items[1]["rrdatas"], json!(["5.6.7.8"]));
    }

    #[tokio::test]
    async fn test_weighted_delete_substitutes_placeholder_item() {
        let server = MockServer::start().await;
        let current = json!({
            "rrsets": [{
                "name": "w.example.com.",
                "type": "A",
                "ttl": 60,
                "routingPolicy": {"wrr": {"items": [
                    {"weight": 10, "rrdatas": ["1.2.3.4"]},
                    {"weight": 20, "rrdatas": ["5.6.7.8"]},
                ]}},
            }],
        });
        Mock::given(method("GET"))
            .and(path("/test-project/managedZones/z1/rrsets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/test-project/managedZones/z1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let requests = vec![ChangeRequest::delete(
            DnsSetName::with_identifier(DnsName::new("w.example.com"), "0"),
            RecordSet::from_values(RecordType::A, 60, ["1.2.3.4"]),
        )
        .with_policy(Some(
            RoutingPolicy::new(PolicyKind::Weighted).with("weight", "10"),
        ))];
        handler.execute_requests(&zone(), &requests).await.unwrap();

        let change = posted_change(&server).await;
        assert_eq!(change["deletions"].as_array().unwrap().len(), 1);
        let items = change["additions"][0]["routingPolicy"]["wrr"]["items"]
            .as_array()
            .unwrap();
        // index 0 becomes a placeholder so index 1 keeps its position
        assert_eq!(items[0]["weight"], json!(0.0));
        assert_eq!(items[0]["rrdatas"], json!(["233.252.0.1"]));
        assert_eq!(items[1]["rrdatas"], json!(["5.6.7.8"]));
    }

    #[tokio::test]
    async fn test_deleting_last_weighted_item_removes_rrset() {
        let server = MockServer::start().await;
        let current = json!({
            "rrsets": [{
                "name": "w.example.com.",
                "type": "A",
                "ttl": 60,
                "routingPolicy": {"wrr": {"items": [
                    {"weight": 0, "rrdatas": ["233.252.0.1"]},
                    {"weight": 20, "rrdatas": ["5.6.7.8"]},
                ]}},
            }],
        });
        Mock::given(method("GET"))
            .and(path("/test-project/managedZones/z1/rrsets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/test-project/managedZones/z1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let handler = handler_for(&server);
        let requests = vec![ChangeRequest::delete(
            DnsSetName::with_identifier(DnsName::new("w.example.com"), "1"),
            RecordSet::from_values(RecordType::A, 60, ["5.6.7.8"]),
        )
        .with_policy(Some(
            RoutingPolicy::new(PolicyKind::Weighted).with("weight", "20"),
        ))];
        handler.execute_requests(&zone(), &requests).await.unwrap();

        let change = posted_change(&server).await;
        assert_eq!(change["deletions"].as_array().unwrap().len(), 1);
        assert!(
            change.get("additions").is_none(),
            "an all-placeholder policy is deleted outright"
        );
    }
}
