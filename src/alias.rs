// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Recognition of well-known AWS load-balancer hostnames.
//!
//! CNAME targets pointing at AWS-managed endpoints (ELB, ALB/NLB, VPC
//! endpoints, API Gateway, Global Accelerator, CloudFront) can be expressed
//! as Route 53 ALIAS records, which resolve at the provider and carry no
//! externally settable TTL. The static suffix table below maps canonical
//! hostname suffixes to the hosted zone id of the AWS-managed zone the alias
//! must reference.

use crate::dnsname::DnsName;
use serde::{Deserialize, Serialize};

/// Which address families an alias should materialize.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IpStack {
    #[default]
    Ipv4,
    Ipv6,
    DualStack,
}

impl IpStack {
    /// Parse the `ip-stack` annotation value; unknown values fall back to
    /// IPv4.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "ipv6" => IpStack::Ipv6,
            "dual-stack" => IpStack::DualStack,
            _ => IpStack::Ipv4,
        }
    }

    #[must_use]
    pub fn wants_ipv4(self) -> bool {
        matches!(self, IpStack::Ipv4 | IpStack::DualStack)
    }

    #[must_use]
    pub fn wants_ipv6(self) -> bool {
        matches!(self, IpStack::Ipv6 | IpStack::DualStack)
    }
}

/// Canonical hostname suffix to AWS hosted zone id.
///
/// Classic/application load balancers per region, network load balancers,
/// VPC endpoints, API Gateway endpoints, Global Accelerator and CloudFront.
/// Matching is longest-suffix-wins so `elb.us-east-1.amazonaws.com`
/// (NLB/VPCE style) takes precedence over `us-east-1.elb.amazonaws.com`.
static CANONICAL_HOSTED_ZONES: &[(&str, &str)] = &[
    // Classic and application load balancers: <region>.elb.amazonaws.com
    ("us-east-1.elb.amazonaws.com", "Z35SXDOTRQ7X7K"),
    ("us-east-2.elb.amazonaws.com", "Z3AADJGX6KTTL2"),
    ("us-west-1.elb.amazonaws.com", "Z368ELLRRE2KJ0"),
    ("us-west-2.elb.amazonaws.com", "Z1H1FL5HABSF5"),
    ("ca-central-1.elb.amazonaws.com", "ZQSVJUPU6J1EY"),
    ("eu-central-1.elb.amazonaws.com", "Z215JYRZR1TBD5"),
    ("eu-west-1.elb.amazonaws.com", "Z32O12XQLNTSW2"),
    ("eu-west-2.elb.amazonaws.com", "ZHURV8PSTC4K8"),
    ("eu-west-3.elb.amazonaws.com", "Z3Q77PNBQS71R4"),
    ("eu-north-1.elb.amazonaws.com", "Z23TAZ6LKFMNIO"),
    ("ap-northeast-1.elb.amazonaws.com", "Z14GRHDCWA56QT"),
    ("ap-northeast-2.elb.amazonaws.com", "ZWKZPGTI48KDX"),
    ("ap-south-1.elb.amazonaws.com", "ZP97RAFLXTNZK"),
    ("ap-southeast-1.elb.amazonaws.com", "Z1LMS91P8CMLE5"),
    ("ap-southeast-2.elb.amazonaws.com", "Z1GM3OXH4ZPM65"),
    ("sa-east-1.elb.amazonaws.com", "Z2P70J7HTTTPLU"),
    // Network load balancers and VPC endpoints: elb.<region>.amazonaws.com
    ("elb.us-east-1.amazonaws.com", "Z26RNL4JYFTOTI"),
    ("elb.us-east-2.amazonaws.com", "ZLMOA37VPKANP"),
    ("elb.us-west-1.amazonaws.com", "Z24FKFUX50B4VW"),
    ("elb.us-west-2.amazonaws.com", "Z18D5FSROUN65G"),
    ("elb.ca-central-1.amazonaws.com", "Z2EPGBW3API2WT"),
    ("elb.eu-central-1.amazonaws.com", "Z3F0SRJ5LGBH90"),
    ("elb.eu-west-1.amazonaws.com", "Z2IFOLAFXWLO4F"),
    ("elb.eu-west-2.amazonaws.com", "ZD4D7Y8KGAS4G"),
    ("elb.eu-west-3.amazonaws.com", "Z1CMS0P5QUZ6D5"),
    ("elb.eu-north-1.amazonaws.com", "Z1UDT6IFJ4EJM"),
    ("elb.ap-northeast-1.amazonaws.com", "Z31USIVHYNEOWT"),
    ("elb.ap-northeast-2.amazonaws.com", "ZIBE1TIR4HY56"),
    ("elb.ap-south-1.amazonaws.com", "ZVDDRBQ08TROA"),
    ("elb.ap-southeast-1.amazonaws.com", "ZKVM4W9LS7TM"),
    ("elb.ap-southeast-2.amazonaws.com", "ZCT6FZBF4DROD"),
    ("elb.sa-east-1.amazonaws.com", "ZTK26PT1VY4CU"),
    // API Gateway regional endpoints
    ("execute-api.us-east-1.amazonaws.com", "Z1UJRXOUMOOFQ8"),
    ("execute-api.us-east-2.amazonaws.com", "ZOJJZC49E0EPZ"),
    ("execute-api.us-west-2.amazonaws.com", "Z2OJLYMUO9EFXC"),
    ("execute-api.eu-central-1.amazonaws.com", "Z1U9ULNL0V5AJ3"),
    ("execute-api.eu-west-1.amazonaws.com", "ZLY8HYME6SFDD"),
    // Global Accelerator
    ("awsglobalaccelerator.com", "Z2BJ6XQ5FK7U4H"),
    // CloudFront
    ("cloudfront.net", "Z2FDTNDATAQYW2"),
];

/// An alias target recognized from a CNAME hostname.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasTarget {
    /// The original target hostname
    pub hostname: DnsName,
    /// Hosted zone id of the AWS-managed zone the target lives in
    pub hosted_zone_id: String,
}

/// Recognize a well-known AWS endpoint hostname.
///
/// Returns the alias target with its hosted zone id, or `None` for ordinary
/// CNAME targets. Longest matching suffix wins.
#[must_use]
pub fn recognize_alias_target(target: &DnsName) -> Option<AliasTarget> {
    let host = target.as_str();
    CANONICAL_HOSTED_ZONES
        .iter()
        .filter(|(suffix, _)| {
            host == *suffix || host.ends_with(&format!(".{suffix}"))
        })
        .max_by_key(|(suffix, _)| suffix.len())
        .map(|(_, zone_id)| AliasTarget {
            hostname: target.clone(),
            hosted_zone_id: (*zone_id).to_string(),
        })
}

#[cfg(test)]
#[path = "alias_tests.rs"]
mod alias_tests;
