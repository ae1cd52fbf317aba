// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for AWS alias target recognition.

#[cfg(test)]
mod tests {
    use crate::alias::{recognize_alias_target, IpStack};
    use crate::dnsname::DnsName;

    #[test]
    fn test_classic_elb_hostname_recognized() {
        let target = DnsName::new("my-lb-123.eu-west-1.elb.amazonaws.com");
        let alias = recognize_alias_target(&target).unwrap();
        assert_eq!(alias.hosted_zone_id, "Z32O12XQLNTSW2");
        assert_eq!(alias.hostname, target);
    }

    #[test]
    fn test_nlb_hostname_prefers_longer_suffix() {
        let target = DnsName::new("my-nlb-0123.elb.us-east-1.amazonaws.com");
        let alias = recognize_alias_target(&target).unwrap();
        assert_eq!(alias.hosted_zone_id, "Z26RNL4JYFTOTI");
    }

    #[test]
    fn test_cloudfront_recognized() {
        let target = DnsName::new("d111111abcdef8.cloudfront.net");
        let alias = recognize_alias_target(&target).unwrap();
        assert_eq!(alias.hosted_zone_id, "Z2FDTNDATAQYW2");
    }

    #[test]
    fn test_ordinary_cname_not_recognized() {
        assert!(recognize_alias_target(&DnsName::new("www.example.org")).is_none());
        // suffix must match on a label boundary
        assert!(recognize_alias_target(&DnsName::new("fakecloudfront.net")).is_none());
    }

    #[test]
    fn test_ip_stack_parsing() {
        assert_eq!(IpStack::parse("ipv4"), IpStack::Ipv4);
        assert_eq!(IpStack::parse("ipv6"), IpStack::Ipv6);
        assert_eq!(IpStack::parse("dual-stack"), IpStack::DualStack);
        assert_eq!(IpStack::parse("bogus"), IpStack::Ipv4);
    }

    #[test]
    fn test_ip_stack_families() {
        assert!(IpStack::Ipv4.wants_ipv4());
        assert!(!IpStack::Ipv4.wants_ipv6());
        assert!(IpStack::Ipv6.wants_ipv6());
        assert!(!IpStack::Ipv6.wants_ipv4());
        assert!(IpStack::DualStack.wants_ipv4());
        assert!(IpStack::DualStack.wants_ipv6());
    }
}
