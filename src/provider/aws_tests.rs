// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for Route 53 record ingestion and policy extraction.

#[cfg(test)]
mod tests {
    use crate::dnsname::{DnsName, DnsSetName};
    use crate::provider::aws::*;
    use crate::records::{RecordType, ZoneState};
    use crate::routing::PolicyKind;
    use aws_sdk_route53::types::{
        AliasTarget, GeoLocation, ResourceRecord, ResourceRecordSet, ResourceRecordSetFailover,
        ResourceRecordSetRegion, RrType,
    };

    fn rrs_a(name: &str, values: &[&str], ttl: i64) -> ResourceRecordSet {
        let mut builder = ResourceRecordSet::builder().name(name).r#type(RrType::A).ttl(ttl);
        for value in values {
            builder = builder
                .resource_records(ResourceRecord::builder().value(*value).build().unwrap());
        }
        builder.build().unwrap()
    }

    fn plain(name: &str) -> DnsSetName {
        DnsSetName::plain(DnsName::new(name))
    }

    #[test]
    fn test_ingest_plain_a_record() {
        let mut state = ZoneState::new();
        ingest_record_set(&mut state, &rrs_a("app.example.com.", &["1.2.3.4"], 300));
        state.calculate_dns_sets();

        let set = state.get(&plain("app.example.com")).unwrap();
        let a = set.get(RecordType::A).unwrap();
        assert_eq!(a.values(), vec!["1.2.3.4"]);
        assert_eq!(a.ttl, 300);
    }

    #[test]
    fn test_ingest_alias_record() {
        let rrs = ResourceRecordSet::builder()
            .name("app.example.com.")
            .r#type(RrType::A)
            .alias_target(
                AliasTarget::builder()
                    .hosted_zone_id("Z32O12XQLNTSW2")
                    .dns_name("my-lb-123.eu-west-1.elb.amazonaws.com.")
                    .evaluate_target_health(false)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let mut state = ZoneState::new();
        ingest_record_set(&mut state, &rrs);
        state.calculate_dns_sets();

        let set = state.get(&plain("app.example.com")).unwrap();
        let alias = set.get(RecordType::AliasA).expect("alias A record set");
        assert!(alias.ignore_ttl);
        assert_eq!(
            alias.values(),
            vec!["my-lb-123.eu-west-1.elb.amazonaws.com"]
        );
    }

    #[test]
    fn test_ingest_unsupported_type_dropped() {
        let rrs = ResourceRecordSet::builder()
            .name("example.com.")
            .r#type(RrType::Soa)
            .ttl(3600)
            .resource_records(
                ResourceRecord::builder()
                    .value("ns1.example.com. admin.example.com. 1 2 3 4 5")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let mut state = ZoneState::new();
        ingest_record_set(&mut state, &rrs);
        assert!(state.is_empty());
    }

    #[test]
    fn test_extract_weighted_policy() {
        let rrs = ResourceRecordSet::builder()
            .name("w.example.com.")
            .r#type(RrType::A)
            .ttl(60)
            .set_identifier("0")
            .weight(10)
            .resource_records(ResourceRecord::builder().value("1.2.3.4").build().unwrap())
            .build()
            .unwrap();

        let policy = extract_policy(&rrs).expect("weighted policy");
        assert_eq!(policy.kind, PolicyKind::Weighted);
        assert_eq!(policy.parameter("weight"), Some("10"));
    }

    #[test]
    fn test_extract_latency_policy() {
        let rrs = ResourceRecordSet::builder()
            .name("l.example.com.")
            .r#type(RrType::A)
            .ttl(60)
            .set_identifier("eu")
            .region(ResourceRecordSetRegion::EuWest1)
            .resource_records(ResourceRecord::builder().value("1.2.3.4").build().unwrap())
            .build()
            .unwrap();

        let policy = extract_policy(&rrs).expect("latency policy");
        assert_eq!(policy.kind, PolicyKind::Latency);
        assert_eq!(policy.parameter("region"), Some("eu-west-1"));
    }

    #[test]
    fn test_extract_geo_policy_subdivision() {
        let rrs = ResourceRecordSet::builder()
            .name("g.example.com.")
            .r#type(RrType::A)
            .ttl(60)
            .set_identifier("us-ca")
            .geo_location(
                GeoLocation::builder()
                    .country_code("US")
                    .subdivision_code("CA")
                    .build(),
            )
            .resource_records(ResourceRecord::builder().value("1.2.3.4").build().unwrap())
            .build()
            .unwrap();

        let policy = extract_policy(&rrs).expect("geo policy");
        assert_eq!(policy.kind, PolicyKind::Geolocation);
        assert_eq!(policy.parameter("location"), Some("US/CA"));
    }

    #[test]
    fn test_extract_failover_policy_with_health_check() {
        let rrs = ResourceRecordSet::builder()
            .name("f.example.com.")
            .r#type(RrType::A)
            .ttl(60)
            .set_identifier("primary")
            .failover(ResourceRecordSetFailover::Primary)
            .health_check_id("hc-1")
            .resource_records(ResourceRecord::builder().value("1.2.3.4").build().unwrap())
            .build()
            .unwrap();

        let policy = extract_policy(&rrs).expect("failover policy");
        assert_eq!(policy.kind, PolicyKind::Failover);
        assert_eq!(policy.parameter("failoverRecordType"), Some("PRIMARY"));
        assert_eq!(policy.parameter("healthCheckID"), Some("hc-1"));
    }

    #[test]
    fn test_no_policy_extracted_from_plain_record() {
        assert!(extract_policy(&rrs_a("p.example.com.", &["1.2.3.4"], 60)).is_none());
    }
}
