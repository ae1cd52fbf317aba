// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the uniform record model.

#[cfg(test)]
mod tests {
    use crate::dnsname::{DnsName, DnsSetName};
    use crate::records::*;

    struct FakeRaw {
        rtype: &'static str,
        name: &'static str,
        value: &'static str,
        ttl: u32,
    }

    impl RawRecord for FakeRaw {
        fn rtype(&self) -> Option<RecordType> {
            RecordType::parse(self.rtype)
        }
        fn id(&self) -> String {
            format!("{}/{}", self.name, self.rtype)
        }
        fn dns_name(&self) -> DnsName {
            DnsName::new(self.name)
        }
        fn set_identifier(&self) -> String {
            String::new()
        }
        fn value(&self) -> String {
            self.value.to_string()
        }
        fn ttl(&self) -> u32 {
            self.ttl
        }
        fn set_ttl(&mut self, ttl: u32) {
            self.ttl = ttl;
        }
        fn copy(&self) -> Box<dyn RawRecord + Send> {
            Box::new(FakeRaw { ..*self })
        }
    }

    fn plain(name: &str) -> DnsSetName {
        DnsSetName::plain(DnsName::new(name))
    }

    #[test]
    fn test_record_type_parse() {
        assert_eq!(RecordType::parse("a"), Some(RecordType::A));
        assert_eq!(RecordType::parse("AAAA"), Some(RecordType::AAAA));
        assert_eq!(RecordType::parse("SOA"), None);
        assert_eq!(RecordType::parse("MX"), None);
    }

    #[test]
    fn test_txt_values_are_quoted() {
        let mut rs = RecordSet::new(RecordType::TXT, 300);
        rs.add("owner=g");
        rs.add("\"already\"");
        assert_eq!(rs.values(), vec!["\"owner=g\"", "\"already\""]);
    }

    #[test]
    fn test_same_values_ignores_order() {
        let a = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4", "5.6.7.8"]);
        let b = RecordSet::from_values(RecordType::A, 300, ["5.6.7.8", "1.2.3.4"]);
        assert!(a.same_values(&b));
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn test_differs_on_ttl_unless_ignored() {
        let a = RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]);
        let mut b = RecordSet::from_values(RecordType::A, 60, ["1.2.3.4"]);
        assert!(a.differs_from(&b));

        b.ignore_ttl = true;
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn test_alias_sets_ignore_ttl_by_default() {
        let rs = RecordSet::new(RecordType::AliasA, 0);
        assert!(rs.ignore_ttl);
    }

    #[test]
    fn test_zone_state_drops_unsupported_types() {
        let mut state = ZoneState::new();
        state.add_record(&FakeRaw {
            rtype: "SOA",
            name: "example.com",
            value: "ns1.example.com. admin.example.com. 1 2 3 4 5",
            ttl: 3600,
        });
        state.add_record(&FakeRaw {
            rtype: "A",
            name: "app.example.com.",
            value: "1.2.3.4",
            ttl: 300,
        });
        assert_eq!(state.calculate_dns_sets(), 1);
        assert!(state.get(&plain("app.example.com")).is_some());
    }

    #[test]
    fn test_reverse_index_lookup() {
        let mut state = ZoneState::new();
        state.add_value(plain("app.example.com"), RecordType::A, 300, "1.2.3.4");
        assert!(state.has_record(&plain("app.example.com"), RecordType::A, "1.2.3.4"));
        assert!(!state.has_record(&plain("app.example.com"), RecordType::A, "9.9.9.9"));
    }

    #[test]
    fn test_meta_attributes_materialized() {
        let mut state = ZoneState::new();
        state.add_value(plain("app.example.com"), RecordType::A, 300, "1.2.3.4");
        state.add_value(
            plain("app.example.com"),
            RecordType::Meta,
            600,
            "owner=gardener-1",
        );
        state.calculate_dns_sets();
        let set = state.get(&plain("app.example.com")).unwrap();
        assert_eq!(set.owner(), Some("gardener-1"));
    }

    #[test]
    fn test_put_and_remove_set_maintain_index() {
        let mut state = ZoneState::new();
        let name = plain("app.example.com");
        state.put_set(
            name.clone(),
            RecordType::A,
            RecordSet::from_values(RecordType::A, 300, ["1.2.3.4"]),
        );
        assert!(state.has_record(&name, RecordType::A, "1.2.3.4"));

        state.put_set(
            name.clone(),
            RecordType::A,
            RecordSet::from_values(RecordType::A, 300, ["5.6.7.8"]),
        );
        assert!(!state.has_record(&name, RecordType::A, "1.2.3.4"));
        assert!(state.has_record(&name, RecordType::A, "5.6.7.8"));

        state.remove_set(&name, RecordType::A);
        assert!(state.is_empty());
        assert!(!state.has_record(&name, RecordType::A, "5.6.7.8"));
    }

    #[test]
    fn test_extract_meta_sets_moves_txt_companion() {
        let zone = DnsName::new("example.com");
        let mut state = ZoneState::new();
        state.add_value(plain("app.example.com"), RecordType::A, 300, "1.2.3.4");
        state.add_value(
            plain("comment-app.example.com"),
            RecordType::TXT,
            300,
            "owner=gardener-1",
        );
        state.add_value(plain("spf.example.com"), RecordType::TXT, 300, "v=spf1 -all");
        state.extract_meta_sets(&zone);
        state.calculate_dns_sets();

        let set = state.get(&plain("app.example.com")).unwrap();
        assert_eq!(set.owner(), Some("gardener-1"));
        assert!(set.get(RecordType::Meta).is_some());
        // the wire-name TXT set is gone, the unrelated TXT survives
        assert!(state.get(&plain("comment-app.example.com")).is_none());
        assert!(state.get(&plain("spf.example.com")).is_some());
    }

    #[test]
    fn test_extract_meta_sets_honors_recorded_prefix() {
        let zone = DnsName::new("example.com");
        let mut state = ZoneState::new();
        state.add_value(
            plain("c-app.example.com"),
            RecordType::TXT,
            300,
            "owner=g prefix=c-",
        );
        state.extract_meta_sets(&zone);
        state.calculate_dns_sets();

        let set = state.get(&plain("app.example.com")).unwrap();
        assert_eq!(set.owner(), Some("g"));
    }

    #[test]
    fn test_forwarded_subdomains() {
        let base = DnsName::new("example.com");
        let mut state = ZoneState::new();
        state.add_value(plain("example.com"), RecordType::NS, 3600, "ns1.example.com.");
        state.add_value(plain("sub.example.com"), RecordType::NS, 3600, "ns1.other.net.");
        state.calculate_dns_sets();

        let forwarded = state.forwarded_subdomains(&base);
        assert_eq!(forwarded, vec![DnsName::new("sub.example.com")]);
    }
}
