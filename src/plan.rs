// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Change planner: from cached zone state and desired entries to ordered
//! change requests.
//!
//! For every desired name the planner maps the entry to its provider form
//! (alias rewriting, META record naming), gates the change on the ownership
//! protocol, diffs per record type, and finally packs the resulting change
//! requests into executor-facing batches. Within a batch deletions precede
//! additions, and all requests touching one name travel in the same batch
//! so observers never see a partially renamed record pair.

use crate::alias::recognize_alias_target;
use crate::constants::ATTR_CNAMES;
use crate::dnsname::DnsSetName;
use crate::errors::ProviderError;
use crate::ownership::{
    classify, format_meta_value, meta_attributes, meta_prefix_of, meta_record_name, OwnershipState,
};
use crate::records::{DnsSet, RecordSet, RecordType, ZoneState};
use crate::resources::{Entry, EntryDone, HostedZonePolicy};
use crate::routing::RoutingPolicy;
use crate::zones::HostedZone;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Change request actions, in execution precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeAction {
    Delete,
    Update,
    Create,
}

impl ChangeAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

/// One planned provider operation.
///
/// `update` carries both old and new set, `create` only the addition,
/// `delete` only the deletion.
#[derive(Clone, Debug)]
pub struct ChangeRequest {
    pub action: ChangeAction,
    pub rtype: RecordType,
    /// Provider-mapped name; for META requests this is the prefixed wire name
    pub name: DnsSetName,
    pub addition: Option<RecordSet>,
    pub deletion: Option<RecordSet>,
    pub routing_policy: Option<RoutingPolicy>,
    /// Completion handle of the entry this request stems from
    pub done: Option<Arc<EntryDone>>,
}

impl ChangeRequest {
    #[must_use]
    pub fn create(name: DnsSetName, addition: RecordSet) -> Self {
        ChangeRequest {
            action: ChangeAction::Create,
            rtype: addition.rtype,
            name,
            addition: Some(addition),
            deletion: None,
            routing_policy: None,
            done: None,
        }
    }

    #[must_use]
    pub fn update(name: DnsSetName, deletion: RecordSet, addition: RecordSet) -> Self {
        ChangeRequest {
            action: ChangeAction::Update,
            rtype: addition.rtype,
            name,
            addition: Some(addition),
            deletion: Some(deletion),
            routing_policy: None,
            done: None,
        }
    }

    #[must_use]
    pub fn delete(name: DnsSetName, deletion: RecordSet) -> Self {
        ChangeRequest {
            action: ChangeAction::Delete,
            rtype: deletion.rtype,
            name,
            addition: None,
            deletion: Some(deletion),
            routing_policy: None,
            done: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Option<RoutingPolicy>) -> Self {
        self.routing_policy = policy;
        self
    }

    #[must_use]
    pub fn with_done(mut self, done: Option<Arc<EntryDone>>) -> Self {
        self.done = done;
        self
    }

    /// The set written on create/update, removed on delete.
    #[must_use]
    pub fn payload(&self) -> &RecordSet {
        match self.action {
            ChangeAction::Delete => self.deletion.as_ref().expect("delete carries deletion"),
            _ => self.addition.as_ref().expect("create/update carry addition"),
        }
    }

    pub fn notify_success(&self) {
        if let Some(done) = &self.done {
            done.succeeded();
        }
    }

    pub fn notify_failure(&self, err: &ProviderError) {
        if let Some(done) = &self.done {
            done.failed(err);
        }
    }
}

/// Plan-time configuration resolved per zone.
#[derive(Clone, Debug)]
pub struct PlanContext<'a> {
    /// Engine identity used for ownership
    pub identity: &'a str,
    /// Engine class; entries addressed to other classes are ignored
    pub class: &'a str,
    /// Configured META name prefix
    pub meta_prefix: &'a str,
    /// Whether the provider supports ALIAS records (AWS)
    pub supports_alias: bool,
    /// Whether the provider supports routing policies
    pub supports_routing: bool,
    /// Batch size, already clamped to the provider's bounds
    pub batch_size: usize,
    /// Per-zone overrides, if any
    pub policy: Option<&'a HostedZonePolicy>,
}

/// Counters describing a produced plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub invalid: usize,
    pub busy: usize,
}

/// The executor-facing outcome of planning one zone.
#[derive(Debug, Default)]
pub struct Plan {
    /// Batches in submission order; each holds at most `batch_size`
    /// requests, deletions sorted before additions
    pub batches: Vec<Vec<ChangeRequest>>,
    pub stats: PlanStats,
}

impl Plan {
    /// Whether the zone already matches the desired state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of change requests over all batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

/// Compute the change plan for one zone.
///
/// Entries that cannot be planned (invalid targets, routing policy
/// mismatches, foreign ownership) are reported through their completion
/// handles and excluded from the plan; the remaining entries produce a
/// minimal ordered set of change requests.
#[must_use]
pub fn plan_zone(
    zone: &HostedZone,
    state: &ZoneState,
    entries: &[Entry],
    ctx: &PlanContext<'_>,
) -> Plan {
    let mut stats = PlanStats::default();
    // groups keyed by logical set name keep same-name requests in one batch
    let mut groups: BTreeMap<DnsSetName, Vec<Unit>> = BTreeMap::new();
    let mut desired_names: BTreeSet<DnsSetName> = BTreeSet::new();

    for entry in entries {
        if entry.class() != ctx.class {
            continue;
        }
        if !entry.dns_name.is_under(&zone.domain) {
            continue;
        }

        let set_name = DnsSetName {
            name: entry.dns_name.clone(),
            set_identifier: entry.set_identifier.clone().unwrap_or_default(),
        };
        desired_names.insert(set_name.clone());

        if entry.stale {
            // preserved unchanged while the external layer reports an error
            debug!(name = %set_name, "skipping stale entry");
            continue;
        }

        if let Some(err) = validate_entry(zone, entry, ctx) {
            entry_invalid(entry, &err, &mut stats);
            continue;
        }

        let desired = match desired_set(entry, &set_name, ctx) {
            Ok(desired) => desired,
            Err(err) => {
                entry_invalid(entry, &err, &mut stats);
                continue;
            }
        };

        let existing = state.get(&set_name);
        let owner = entry.owner_or(ctx.identity);
        match classify(existing, owner) {
            OwnershipState::Foreign { owner: holder } => {
                let err = ProviderError::Busy {
                    name: set_name.name.to_string(),
                    owner: holder,
                };
                warn!(name = %set_name, error = %err, "refusing foreign dns set");
                if let Some(done) = &entry.done {
                    done.failed(&err);
                }
                stats.busy += 1;
                continue;
            }
            OwnershipState::Owned | OwnershipState::Unowned => {}
        }

        let units = diff_set(zone, existing, &desired, owner, entry, ctx, &mut stats);
        if !units.is_empty() {
            groups.entry(set_name).or_default().extend(units);
        }
    }

    collect_orphans(zone, state, &desired_names, ctx, &mut groups, &mut stats);

    Plan {
        batches: pack_batches(groups, ctx.batch_size),
        stats,
    }
}

/// A unit is the smallest colocation group: one request, or the
/// delete+create pair of a renamed record that must land together.
type Unit = Vec<ChangeRequest>;

struct DesiredSet {
    sets: BTreeMap<RecordType, RecordSet>,
    /// Original CNAME targets when alias mapping rewrote them
    mapped_cnames: Vec<String>,
    policy: Option<RoutingPolicy>,
}

fn entry_invalid(entry: &Entry, err: &ProviderError, stats: &mut PlanStats) {
    warn!(name = %entry.dns_name, error = %err, "invalid entry");
    if let Some(done) = &entry.done {
        done.set_invalid(err);
    }
    stats.invalid += 1;
}

/// Cross-field validation before any mapping happens.
fn validate_entry(zone: &HostedZone, entry: &Entry, ctx: &PlanContext<'_>) -> Option<ProviderError> {
    let name = entry.dns_name.to_string();
    if let Some(sub) = zone.forwarded_to(&entry.dns_name) {
        return Some(ProviderError::Invalid {
            name,
            reason: format!("name is forwarded to delegated subdomain {sub}"),
        });
    }
    let has_identifier = entry
        .set_identifier
        .as_deref()
        .is_some_and(|s| !s.is_empty());
    match (&entry.routing_policy, has_identifier) {
        (Some(_), false) => {
            return Some(ProviderError::Invalid {
                name,
                reason: "routing policy set but missing set identifier".to_string(),
            });
        }
        (None, true) => {
            return Some(ProviderError::Invalid {
                name,
                reason: "set identifier set but missing routing policy".to_string(),
            });
        }
        _ => {}
    }
    if let Some(policy) = &entry.routing_policy {
        if !ctx.supports_routing {
            return Some(ProviderError::Invalid {
                name,
                reason: format!("{} routing policy not supported by provider", policy.kind),
            });
        }
        if let Err(reason) = policy.validate() {
            return Some(ProviderError::Invalid { name, reason });
        }
    }
    if entry.targets.is_empty() && entry.text.is_empty() {
        return Some(ProviderError::Invalid {
            name,
            reason: "entry has neither targets nor text".to_string(),
        });
    }
    None
}

/// Map an entry to its provider-form record sets.
fn desired_set(
    entry: &Entry,
    set_name: &DnsSetName,
    ctx: &PlanContext<'_>,
) -> Result<DesiredSet, ProviderError> {
    let ttl = match ctx.policy {
        Some(policy) => policy.clamp_ttl(entry.effective_ttl()),
        None => entry.effective_ttl(),
    };

    let mut a_values: Vec<String> = Vec::new();
    let mut aaaa_values: Vec<String> = Vec::new();
    let mut cname_values: Vec<String> = Vec::new();
    for target in &entry.targets {
        let target = target.trim();
        if target.parse::<Ipv4Addr>().is_ok() {
            a_values.push(target.to_string());
        } else if target.parse::<Ipv6Addr>().is_ok() {
            aaaa_values.push(target.to_string());
        } else if !target.is_empty() && !target.contains(char::is_whitespace) {
            cname_values.push(crate::dnsname::DnsName::new(target).as_str().to_string());
        } else {
            return Err(ProviderError::Invalid {
                name: set_name.name.to_string(),
                reason: format!("invalid target '{target}'"),
            });
        }
    }
    if !cname_values.is_empty() && (!a_values.is_empty() || !aaaa_values.is_empty()) {
        return Err(ProviderError::Invalid {
            name: set_name.name.to_string(),
            reason: "cannot mix address and hostname targets".to_string(),
        });
    }
    if cname_values.len() > 1 {
        return Err(ProviderError::Invalid {
            name: set_name.name.to_string(),
            reason: "multiple hostname targets are not supported".to_string(),
        });
    }

    let mut sets: BTreeMap<RecordType, RecordSet> = BTreeMap::new();
    let mut mapped_cnames = Vec::new();

    if !a_values.is_empty() {
        sets.insert(
            RecordType::A,
            RecordSet::from_values(RecordType::A, ttl, &a_values),
        );
    }
    if !aaaa_values.is_empty() {
        sets.insert(
            RecordType::AAAA,
            RecordSet::from_values(RecordType::AAAA, ttl, &aaaa_values),
        );
    }
    if let Some(target) = cname_values.first() {
        let target_name = crate::dnsname::DnsName::new(target);
        let alias = ctx
            .supports_alias
            .then(|| recognize_alias_target(&target_name))
            .flatten();
        if let Some(alias) = alias {
            let stack = entry.ip_stack();
            if stack.wants_ipv4() {
                sets.insert(
                    RecordType::AliasA,
                    RecordSet::from_values(RecordType::AliasA, ttl, [alias.hostname.as_str()]),
                );
            }
            if stack.wants_ipv6() {
                sets.insert(
                    RecordType::AliasAaaa,
                    RecordSet::from_values(RecordType::AliasAaaa, ttl, [alias.hostname.as_str()]),
                );
            }
            mapped_cnames.push(target.clone());
        } else {
            sets.insert(
                RecordType::CNAME,
                RecordSet::from_values(RecordType::CNAME, ttl, [target.as_str()]),
            );
        }
    }
    if !entry.text.is_empty() {
        sets.insert(
            RecordType::TXT,
            RecordSet::from_values(RecordType::TXT, ttl, &entry.text),
        );
    }

    Ok(DesiredSet {
        sets,
        mapped_cnames,
        policy: entry.routing_policy.clone(),
    })
}

/// Diff one desired set against the cached set, including the META
/// companion record.
#[allow(clippy::too_many_arguments)]
fn diff_set(
    zone: &HostedZone,
    existing: Option<&DnsSet>,
    desired: &DesiredSet,
    owner: &str,
    entry: &Entry,
    ctx: &PlanContext<'_>,
    stats: &mut PlanStats,
) -> Vec<Unit> {
    let set_name = DnsSetName {
        name: entry.dns_name.clone(),
        set_identifier: entry.set_identifier.clone().unwrap_or_default(),
    };
    let mut units: Vec<Unit> = Vec::new();

    // data record types: union of existing and desired
    let mut types: BTreeSet<RecordType> = desired.sets.keys().copied().collect();
    if let Some(existing) = existing {
        types.extend(existing.sets.keys().copied());
    }
    types.remove(&RecordType::Meta);

    for rtype in types {
        let old = existing.and_then(|set| set.get(rtype));
        let new = desired.sets.get(&rtype);
        let request = match (old, new) {
            (None, Some(new)) => {
                stats.creates += 1;
                Some(ChangeRequest::create(set_name.clone(), new.clone()))
            }
            (Some(old), None) => {
                stats.deletes += 1;
                Some(ChangeRequest::delete(set_name.clone(), old.clone()))
            }
            (Some(old), Some(new)) if old.differs_from(new) => {
                stats.updates += 1;
                Some(ChangeRequest::update(
                    set_name.clone(),
                    old.clone(),
                    new.clone(),
                ))
            }
            _ => None,
        };
        if let Some(request) = request {
            units.push(vec![request
                .with_policy(desired.policy.clone())
                .with_done(entry.done.clone())]);
        }
    }

    // META companion: adoption, value drift, or prefix migration
    if !owner.is_empty() {
        let mut attributes = meta_attributes(owner, ctx.meta_prefix);
        if !desired.mapped_cnames.is_empty() {
            attributes.insert(ATTR_CNAMES.to_string(), desired.mapped_cnames.join(","));
        }
        let ttl = desired
            .sets
            .values()
            .next()
            .map_or(crate::constants::DEFAULT_RECORD_TTL_SECS, |rs| rs.ttl);
        let mut desired_meta = RecordSet::new(RecordType::Meta, ttl);
        desired_meta.add(&format_meta_value(&attributes));

        let desired_meta_name = meta_record_name(&set_name, &zone.domain, ctx.meta_prefix);
        let existing_meta = existing.and_then(|set| set.get(RecordType::Meta));

        match existing_meta {
            None => {
                stats.creates += 1;
                units.push(vec![ChangeRequest::create(desired_meta_name, desired_meta)
                    .with_policy(desired.policy.clone())
                    .with_done(entry.done.clone())]);
            }
            Some(old_meta) => {
                let recorded_prefix = existing.map_or(ctx.meta_prefix, meta_prefix_of);
                let existing_meta_name =
                    meta_record_name(&set_name, &zone.domain, recorded_prefix);
                if existing_meta_name != desired_meta_name {
                    // renamed meta record: delete and create must colocate
                    stats.deletes += 1;
                    stats.creates += 1;
                    units.push(vec![
                        ChangeRequest::delete(existing_meta_name, old_meta.clone())
                            .with_policy(desired.policy.clone())
                            .with_done(entry.done.clone()),
                        ChangeRequest::create(desired_meta_name, desired_meta)
                            .with_policy(desired.policy.clone())
                            .with_done(entry.done.clone()),
                    ]);
                } else if old_meta.differs_from(&desired_meta) {
                    stats.updates += 1;
                    units.push(vec![ChangeRequest::update(
                        desired_meta_name,
                        old_meta.clone(),
                        desired_meta,
                    )
                    .with_policy(desired.policy.clone())
                    .with_done(entry.done.clone())]);
                }
            }
        }
    }

    units
}

/// Enqueue deletions for names this engine owns that no entry desires
/// anymore. Foreign and unowned sets are left untouched.
fn collect_orphans(
    zone: &HostedZone,
    state: &ZoneState,
    desired_names: &BTreeSet<DnsSetName>,
    ctx: &PlanContext<'_>,
    groups: &mut BTreeMap<DnsSetName, Vec<Unit>>,
    stats: &mut PlanStats,
) {
    if ctx.identity.is_empty() {
        return;
    }
    for (name, set) in state.sets() {
        if desired_names.contains(name) || set.owner() != Some(ctx.identity) {
            continue;
        }
        debug!(name = %name, "deleting stale owned dns set");
        let mut units: Vec<Unit> = Vec::new();
        for (rtype, rs) in &set.sets {
            // deletes must carry the recorded policy: providers encode it
            // into the delete operation (Route 53 requires an exact match)
            if *rtype == RecordType::Meta {
                let meta_name = meta_record_name(name, &zone.domain, meta_prefix_of(set));
                stats.deletes += 1;
                units.push(vec![ChangeRequest::delete(meta_name, rs.clone())
                    .with_policy(set.routing_policy.clone())]);
            } else {
                stats.deletes += 1;
                units.push(vec![ChangeRequest::delete(name.clone(), rs.clone())
                    .with_policy(set.routing_policy.clone())]);
            }
        }
        groups.entry(name.clone()).or_default().extend(units);
    }
}

/// Pack colocation groups into batches of at most `batch_size` requests,
/// deletions sorted before additions within each batch.
fn pack_batches(groups: BTreeMap<DnsSetName, Vec<Unit>>, batch_size: usize) -> Vec<Vec<ChangeRequest>> {
    let batch_size = batch_size.max(1);
    let mut batches: Vec<Vec<ChangeRequest>> = Vec::new();
    let mut current: Vec<ChangeRequest> = Vec::new();

    for (_, units) in groups {
        let group_len: usize = units.iter().map(Vec::len).sum();
        if !current.is_empty() && current.len() + group_len > batch_size {
            batches.push(std::mem::take(&mut current));
        }
        for unit in units {
            if !current.is_empty() && current.len() + unit.len() > batch_size {
                batches.push(std::mem::take(&mut current));
            }
            current.extend(unit);
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }

    for batch in &mut batches {
        batch.sort_by_key(|req| req.action);
    }
    batches
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod plan_tests;
