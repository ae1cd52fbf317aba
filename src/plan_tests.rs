// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the change planner.

#[cfg(test)]
mod tests {
    use crate::dnsname::{DnsName, DnsSetName};
    use crate::plan::*;
    use crate::records::{RecordType, ZoneState};
    use crate::resources::{Entry, EntryDone, EntryPhase, HostedZonePolicy};
    use crate::routing::{PolicyKind, RoutingPolicy};
    use crate::zones::{HostedZone, ZoneId};
    use std::sync::Arc;

    fn test_zone() -> HostedZone {
        HostedZone::new(
            "aws-route53",
            ZoneId::new("Z1"),
            DnsName::new("example.com"),
            "account-1",
        )
    }

    fn ctx<'a>() -> PlanContext<'a> {
        PlanContext {
            identity: "gardener-1",
            class: "gardendns",
            meta_prefix: "comment-",
            supports_alias: true,
            supports_routing: true,
            batch_size: 50,
            policy: None,
        }
    }

    fn entry(name: &str, targets: &[&str]) -> Entry {
        Entry {
            dns_name: DnsName::new(name),
            targets: targets.iter().map(ToString::to_string).collect(),
            ttl: Some(300),
            done: Some(EntryDone::new()),
            ..Entry::default()
        }
    }

    fn all_requests(plan: &Plan) -> Vec<&ChangeRequest> {
        plan.batches.iter().flatten().collect()
    }

    fn plain(name: &str) -> DnsSetName {
        DnsSetName::plain(DnsName::new(name))
    }

    #[test]
    fn test_create_new_a_record_with_ownership() {
        let zone = test_zone();
        let state = ZoneState::new();
        let entries = vec![entry("app.example.com", &["1.2.3.4"])];

        let plan = plan_zone(&zone, &state, &entries, &ctx());

        assert_eq!(plan.stats.creates, 2);
        assert_eq!(plan.len(), 2);
        let reqs = all_requests(&plan);
        let a = reqs
            .iter()
            .find(|r| r.rtype == RecordType::A)
            .expect("A create");
        assert_eq!(a.action, ChangeAction::Create);
        assert_eq!(a.name, plain("app.example.com"));
        assert_eq!(a.payload().values(), vec!["1.2.3.4"]);
        assert_eq!(a.payload().ttl, 300);

        let meta = reqs
            .iter()
            .find(|r| r.rtype == RecordType::Meta)
            .expect("meta create");
        assert_eq!(meta.name, plain("comment-app.example.com"));
        assert_eq!(meta.payload().values(), vec!["\"owner=gardener-1\""]);
    }

    #[test]
    fn test_second_reconcile_is_empty() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        state.add_value(plain("app.example.com"), RecordType::A, 300, "1.2.3.4");
        state.add_value(
            plain("app.example.com"),
            RecordType::Meta,
            300,
            "owner=gardener-1",
        );
        state.calculate_dns_sets();

        let entries = vec![entry("app.example.com", &["1.2.3.4"])];
        let plan = plan_zone(&zone, &state, &entries, &ctx());
        assert!(plan.is_empty(), "idempotent plan expected, got {plan:?}");
    }

    #[test]
    fn test_foreign_owner_refused() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        state.add_value(plain("app.example.com"), RecordType::A, 60, "5.6.7.8");
        state.add_value(plain("app.example.com"), RecordType::Meta, 60, "owner=other");
        state.calculate_dns_sets();

        let e = entry("app.example.com", &["1.2.3.4"]);
        let done = e.done.clone().unwrap();
        let plan = plan_zone(&zone, &state, &[e], &ctx());

        assert!(plan.is_empty());
        assert_eq!(plan.stats.busy, 1);
        match done.phase() {
            EntryPhase::Failed(msg) => {
                assert_eq!(msg, "dns name app.example.com already busy for owner other");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_aws_alias_mapping_dual_stack() {
        let zone = test_zone();
        let state = ZoneState::new();
        let mut e = entry(
            "app.example.com",
            &["my-lb-123.eu-west-1.elb.amazonaws.com"],
        );
        e.annotations.insert(
            "dns.gardener.cloud/ip-stack".to_string(),
            "dual-stack".to_string(),
        );
        e.owner = Some(String::new());

        let mut c = ctx();
        c.identity = "";
        let plan = plan_zone(&zone, &state, &[e], &c);

        assert_eq!(plan.stats.creates, 2);
        let reqs = all_requests(&plan);
        let alias_a = reqs
            .iter()
            .find(|r| r.rtype == RecordType::AliasA)
            .expect("alias A");
        let alias_aaaa = reqs
            .iter()
            .find(|r| r.rtype == RecordType::AliasAaaa)
            .expect("alias AAAA");
        for alias in [alias_a, alias_aaaa] {
            assert_eq!(
                alias.payload().values(),
                vec!["my-lb-123.eu-west-1.elb.amazonaws.com"]
            );
            assert!(alias.payload().ignore_ttl);
        }
    }

    #[test]
    fn test_alias_falls_back_to_cname_without_alias_support() {
        let zone = test_zone();
        let state = ZoneState::new();
        let e = entry(
            "app.example.com",
            &["my-lb-123.eu-west-1.elb.amazonaws.com"],
        );

        let mut c = ctx();
        c.supports_alias = false;
        let plan = plan_zone(&zone, &state, &[e], &c);

        let reqs = all_requests(&plan);
        assert!(reqs.iter().any(|r| r.rtype == RecordType::CNAME));
        assert!(!reqs.iter().any(|r| r.rtype.is_alias()));
    }

    #[test]
    fn test_meta_prefix_change_pairs_delete_and_create() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        state.add_value(plain("a.example.com"), RecordType::TXT, 300, "hello");
        state.add_value(plain("a.example.com"), RecordType::Meta, 300, "owner=g");
        state.calculate_dns_sets();

        let mut e = entry("a.example.com", &[]);
        e.text = vec!["hello".to_string()];
        e.owner = Some("g".to_string());

        let mut c = ctx();
        c.meta_prefix = "c-";
        let plan = plan_zone(&zone, &state, &[e], &c);

        assert_eq!(plan.batches.len(), 1, "same-name pair must share a batch");
        let batch = &plan.batches[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].action, ChangeAction::Delete);
        assert_eq!(batch[0].name, plain("comment-a.example.com"));
        assert_eq!(batch[1].action, ChangeAction::Create);
        assert_eq!(batch[1].name, plain("c-a.example.com"));
        assert_eq!(batch[1].payload().values(), vec!["\"owner=g prefix=c-\""]);
    }

    #[test]
    fn test_orphaned_owned_set_deleted() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        state.add_value(plain("old.example.com"), RecordType::A, 300, "9.9.9.9");
        state.add_value(
            plain("old.example.com"),
            RecordType::Meta,
            300,
            "owner=gardener-1",
        );
        state.calculate_dns_sets();

        let plan = plan_zone(&zone, &state, &[], &ctx());
        assert_eq!(plan.stats.deletes, 2);
        let reqs = all_requests(&plan);
        assert!(reqs.iter().all(|r| r.action == ChangeAction::Delete));
        assert!(reqs
            .iter()
            .any(|r| r.name == plain("comment-old.example.com")));
    }

    #[test]
    fn test_orphan_deletes_carry_recorded_routing_policy() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        let keyed = DnsSetName::with_identifier(DnsName::new("geo.example.com"), "eu");
        state.add_value(keyed.clone(), RecordType::A, 300, "9.9.9.9");
        state.add_value(keyed.clone(), RecordType::Meta, 300, "owner=gardener-1");
        state.set_routing_policy(
            &keyed,
            RoutingPolicy::new(PolicyKind::Geolocation).with("location", "EU"),
        );
        state.calculate_dns_sets();

        let plan = plan_zone(&zone, &state, &[], &ctx());
        assert_eq!(plan.stats.deletes, 2);
        for req in all_requests(&plan) {
            assert_eq!(req.action, ChangeAction::Delete);
            let policy = req
                .routing_policy
                .as_ref()
                .expect("orphan delete must keep the recorded policy");
            assert_eq!(policy.kind, PolicyKind::Geolocation);
            assert_eq!(policy.parameter("location"), Some("EU"));
        }
    }

    #[test]
    fn test_foreign_and_unowned_sets_never_touched() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        state.add_value(plain("foreign.example.com"), RecordType::A, 300, "9.9.9.9");
        state.add_value(
            plain("foreign.example.com"),
            RecordType::Meta,
            300,
            "owner=other",
        );
        state.add_value(plain("manual.example.com"), RecordType::A, 300, "8.8.8.8");
        state.calculate_dns_sets();

        let plan = plan_zone(&zone, &state, &[], &ctx());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_stale_entry_preserved() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        state.add_value(plain("app.example.com"), RecordType::A, 300, "1.2.3.4");
        state.add_value(
            plain("app.example.com"),
            RecordType::Meta,
            300,
            "owner=gardener-1",
        );
        state.calculate_dns_sets();

        let mut e = entry("app.example.com", &["9.9.9.9"]);
        e.stale = true;
        let plan = plan_zone(&zone, &state, &[e], &ctx());
        assert!(plan.is_empty(), "stale entries must be preserved unchanged");
    }

    #[test]
    fn test_routing_policy_requires_set_identifier() {
        let zone = test_zone();
        let state = ZoneState::new();
        let mut e = entry("w.example.com", &["1.2.3.4"]);
        e.routing_policy = Some(RoutingPolicy::new(PolicyKind::Weighted).with("weight", "10"));
        let done = e.done.clone().unwrap();

        let plan = plan_zone(&zone, &state, &[e], &ctx());
        assert!(plan.is_empty());
        assert_eq!(plan.stats.invalid, 1);
        match done.phase() {
            EntryPhase::Invalid(msg) => {
                assert!(msg.contains("routing policy set but missing set identifier"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_set_identifier_requires_routing_policy() {
        let zone = test_zone();
        let state = ZoneState::new();
        let mut e = entry("w.example.com", &["1.2.3.4"]);
        e.set_identifier = Some("0".to_string());
        let done = e.done.clone().unwrap();

        let plan = plan_zone(&zone, &state, &[e], &ctx());
        assert!(plan.is_empty());
        match done.phase() {
            EntryPhase::Invalid(msg) => {
                assert!(msg.contains("set identifier set but missing routing policy"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_update_carries_old_and_new() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        state.add_value(plain("app.example.com"), RecordType::A, 300, "1.2.3.4");
        state.add_value(
            plain("app.example.com"),
            RecordType::Meta,
            300,
            "owner=gardener-1",
        );
        state.calculate_dns_sets();

        let entries = vec![entry("app.example.com", &["5.6.7.8"])];
        let plan = plan_zone(&zone, &state, &entries, &ctx());

        assert_eq!(plan.stats.updates, 1);
        let reqs = all_requests(&plan);
        let update = reqs
            .iter()
            .find(|r| r.action == ChangeAction::Update)
            .unwrap();
        assert_eq!(update.deletion.as_ref().unwrap().values(), vec!["1.2.3.4"]);
        assert_eq!(update.addition.as_ref().unwrap().values(), vec!["5.6.7.8"]);
    }

    #[test]
    fn test_batches_respect_size_and_order() {
        let zone = test_zone();
        let mut state = ZoneState::new();
        for i in 0..10 {
            state.add_value(
                plain(&format!("gone{i}.example.com")),
                RecordType::A,
                300,
                "9.9.9.9",
            );
            state.add_value(
                plain(&format!("gone{i}.example.com")),
                RecordType::Meta,
                300,
                "owner=gardener-1",
            );
        }
        state.calculate_dns_sets();

        let entries: Vec<Entry> = (0..10)
            .map(|i| entry(&format!("new{i}.example.com"), &["1.2.3.4"]))
            .collect();

        let mut c = ctx();
        c.batch_size = 4;
        let plan = plan_zone(&zone, &state, &entries, &c);

        assert!(!plan.is_empty());
        for batch in &plan.batches {
            assert!(batch.len() <= 4, "batch exceeds size: {}", batch.len());
            let first_create = batch
                .iter()
                .position(|r| r.action != ChangeAction::Delete);
            if let Some(first_create) = first_create {
                assert!(
                    batch[first_create..]
                        .iter()
                        .all(|r| r.action != ChangeAction::Delete),
                    "deletions must precede additions"
                );
            }
        }
        // every request accounted for: 20 deletes + 20 creates
        assert_eq!(plan.len(), 40);
    }

    #[test]
    fn test_zone_policy_clamps_ttl() {
        let zone = test_zone();
        let state = ZoneState::new();
        let policy = HostedZonePolicy {
            zone: "Z1".to_string(),
            ttl_min: Some(600),
            ttl_max: None,
            batch_size: None,
        };
        let mut c = ctx();
        c.policy = Some(&policy);

        let plan = plan_zone(&zone, &state, &[entry("app.example.com", &["1.2.3.4"])], &c);
        let reqs = all_requests(&plan);
        let a = reqs.iter().find(|r| r.rtype == RecordType::A).unwrap();
        assert_eq!(a.payload().ttl, 600);
    }

    #[test]
    fn test_class_mismatch_ignored() {
        let zone = test_zone();
        let state = ZoneState::new();
        let mut e = entry("app.example.com", &["1.2.3.4"]);
        e.annotations.insert(
            "dns.gardener.cloud/class".to_string(),
            "other-class".to_string(),
        );
        let plan = plan_zone(&zone, &state, &[e], &ctx());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_done_handles_attached_to_requests() {
        let zone = test_zone();
        let state = ZoneState::new();
        let e = entry("app.example.com", &["1.2.3.4"]);
        let done = e.done.clone().unwrap();

        let plan = plan_zone(&zone, &state, &[e], &ctx());
        for req in all_requests(&plan) {
            assert!(req.done.is_some());
            req.notify_success();
        }
        assert_eq!(done.phase(), EntryPhase::Applied);
        assert!(Arc::strong_count(&done) > 1, "requests share the handle");
    }
}
