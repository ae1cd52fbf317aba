// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for DNS name normalization.

#[cfg(test)]
mod tests {
    use crate::dnsname::{DnsName, DnsSetName};

    #[test]
    fn test_normalizes_trailing_dot_and_case() {
        assert_eq!(DnsName::new("App.Example.COM.").as_str(), "app.example.com");
        assert_eq!(DnsName::new("app.example.com").as_str(), "app.example.com");
    }

    #[test]
    fn test_fqdn_round_trip() {
        let name = DnsName::new("app.example.com");
        assert_eq!(name.to_fqdn(), "app.example.com.");
        assert_eq!(DnsName::new(&name.to_fqdn()), name);
    }

    #[test]
    fn test_wildcard_escape_from_route53() {
        let name = DnsName::new("\\052.example.com.");
        assert_eq!(name.as_str(), "*.example.com");
        assert!(name.is_wildcard());
    }

    #[test]
    fn test_is_under() {
        let zone = DnsName::new("example.com");
        assert!(DnsName::new("app.example.com").is_under(&zone));
        assert!(DnsName::new("example.com").is_under(&zone));
        assert!(!DnsName::new("example.org").is_under(&zone));
        // suffix match must respect label boundaries
        assert!(!DnsName::new("notexample.com").is_under(&zone));
    }

    #[test]
    fn test_label_prefix_plain_name() {
        let name = DnsName::new("app.example.com");
        assert_eq!(
            name.with_label_prefix("comment-").as_str(),
            "comment-app.example.com"
        );
    }

    #[test]
    fn test_label_prefix_keeps_wildcard_in_front() {
        let name = DnsName::new("*.app.example.com");
        assert_eq!(
            name.with_label_prefix("comment-").as_str(),
            "*.comment-app.example.com"
        );
    }

    #[test]
    fn test_set_name_display() {
        let plain = DnsSetName::plain(DnsName::new("w.example.com"));
        assert_eq!(plain.to_string(), "w.example.com");

        let keyed = DnsSetName::with_identifier(DnsName::new("w.example.com"), "1");
        assert_eq!(keyed.to_string(), "w.example.com#1");
        assert_ne!(plain, keyed);
    }
}
