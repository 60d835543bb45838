//! Desired-vs-actual diff. Pure; no I/O.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::TargetConfig;
use crate::model::{ActualState, DesiredState, ReconciliationPlan, SegmentSpec, VlanTag};

/// Resources this engine must never create or delete on a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedSet {
    pub zones: BTreeSet<String>,
    pub vlans: BTreeSet<VlanTag>,
}

impl ReservedSet {
    pub fn from_target(target: &TargetConfig) -> Self {
        Self {
            zones: target.reserved_zone_names.clone(),
            vlans: target.reserved_vlan_ids.clone(),
        }
    }
}

/// Compute the plan that converges `actual` towards `desired`, leaving
/// everything in `reserved` untouched.
pub fn compute_plan(
    desired: &DesiredState,
    actual: &ActualState,
    reserved: &ReservedSet,
) -> ReconciliationPlan {
    let routing_domains_to_create: BTreeSet<String> = desired
        .zones
        .iter()
        .filter(|z| !actual.has_routing_domain(z) && !reserved.zones.contains(*z))
        .cloned()
        .collect();

    let routing_domains_to_delete = actual
        .routing_domains
        .iter()
        .filter(|(name, _)| !desired.zones.contains(*name) && !reserved.zones.contains(*name))
        .map(|(name, rd)| (name.clone(), rd.clone()))
        .collect::<BTreeMap<_, _>>();

    let segments: BTreeMap<VlanTag, &SegmentSpec> = desired
        .segments
        .iter()
        .filter(|(tag, spec)| !reserved.vlans.contains(*tag) && !reserved.zones.contains(&spec.zone))
        .map(|(tag, spec)| (*tag, spec))
        .collect();

    // Routing domains that will exist once the routing-domain phases ran.
    let available = |zone: &str| {
        routing_domains_to_create.contains(zone)
            || (actual.has_routing_domain(zone) && !routing_domains_to_delete.contains_key(zone))
    };

    let mut networks_to_create = BTreeMap::new();
    let mut deferred_networks = BTreeMap::new();
    for (tag, spec) in &segments {
        if actual.networks.contains_key(tag) {
            continue;
        }
        if available(&spec.zone) {
            networks_to_create.insert(*tag, (*spec).clone());
        } else {
            deferred_networks.insert(*tag, (*spec).clone());
        }
    }

    let networks_to_delete = actual
        .networks
        .iter()
        .filter(|(tag, net)| {
            !segments.contains_key(*tag)
                && !reserved.vlans.contains(*tag)
                && !reserved.zones.contains(&net.routing_domain)
        })
        .map(|(tag, net)| (*tag, net.clone()))
        .collect();

    ReconciliationPlan {
        routing_domains_to_create,
        routing_domains_to_delete,
        networks_to_create,
        networks_to_delete,
        deferred_networks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NetworkSpec, RoutingDomain};

    fn desired(zones: &[&str], segments: &[(VlanTag, &str, &str)]) -> DesiredState {
        DesiredState {
            zones: zones.iter().map(|z| z.to_string()).collect(),
            segments: segments
                .iter()
                .map(|(tag, name, zone)| {
                    (
                        *tag,
                        SegmentSpec {
                            name: name.to_string(),
                            zone: zone.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn actual(domains: &[&str], networks: &[(VlanTag, &str, &str)]) -> ActualState {
        ActualState {
            routing_domains: domains
                .iter()
                .map(|d| (d.to_string(), RoutingDomain::default()))
                .collect(),
            networks: networks
                .iter()
                .map(|(tag, name, rd)| {
                    (
                        *tag,
                        NetworkSpec {
                            name: name.to_string(),
                            routing_domain: rd.to_string(),
                            opaque_id: None,
                        },
                    )
                })
                .collect(),
        }
    }

    fn reserved(zones: &[&str], vlans: &[VlanTag]) -> ReservedSet {
        ReservedSet {
            zones: zones.iter().map(|z| z.to_string()).collect(),
            vlans: vlans.iter().copied().collect(),
        }
    }

    /// What the controller would hold after every plan item succeeded.
    fn apply(plan: &ReconciliationPlan, mut state: ActualState) -> ActualState {
        for tag in plan.networks_to_delete.keys() {
            state.networks.remove(tag);
        }
        for name in plan.routing_domains_to_delete.keys() {
            state.routing_domains.remove(name);
        }
        for name in &plan.routing_domains_to_create {
            state
                .routing_domains
                .insert(name.clone(), RoutingDomain::default());
        }
        for (tag, spec) in &plan.networks_to_create {
            state.networks.insert(
                *tag,
                NetworkSpec {
                    name: spec.name.clone(),
                    routing_domain: spec.zone.clone(),
                    opaque_id: None,
                },
            );
        }
        state
    }

    #[test]
    fn reserved_zone_in_actual_is_not_deleted() {
        let plan = compute_plan(
            &desired(&["prod", "dev"], &[]),
            &actual(&["dev", "legacy"], &[]),
            &reserved(&["legacy"], &[]),
        );
        assert_eq!(
            plan.routing_domains_to_create,
            BTreeSet::from(["prod".to_string()])
        );
        assert!(plan.routing_domains_to_delete.is_empty());
    }

    #[test]
    fn new_zone_and_dependent_network_are_planned_together() {
        let plan = compute_plan(
            &desired(&["prod"], &[(100, "app", "prod")]),
            &actual(&[], &[]),
            &ReservedSet::default(),
        );
        assert!(plan.routing_domains_to_create.contains("prod"));
        assert_eq!(plan.networks_to_create[&100].zone, "prod");
        assert!(plan.deferred_networks.is_empty());
    }

    #[test]
    fn stale_resources_are_deleted() {
        let plan = compute_plan(
            &desired(&["prod"], &[(100, "app", "prod")]),
            &actual(&["prod", "old"], &[(100, "app", "prod"), (200, "db", "old")]),
            &ReservedSet::default(),
        );
        assert!(plan.routing_domains_to_delete.contains_key("old"));
        assert!(plan.networks_to_delete.contains_key(&200));
        assert!(plan.networks_to_create.is_empty());
        assert!(plan.routing_domains_to_create.is_empty());
    }

    #[test]
    fn reserved_vlans_and_zones_are_never_touched() {
        let plan = compute_plan(
            &desired(
                &["prod", "mgmt"],
                &[(10, "oob", "prod"), (20, "mgmt-net", "mgmt"), (30, "app", "prod")],
            ),
            &actual(
                &["mgmt", "gone"],
                &[(1, "native", "gone"), (40, "ipmi", "mgmt"), (50, "stale", "gone")],
            ),
            &reserved(&["mgmt", "prod"], &[1, 10]),
        );

        assert!(plan.routing_domains_to_create.is_empty());
        assert!(!plan.routing_domains_to_delete.contains_key("mgmt"));
        assert!(plan.routing_domains_to_delete.contains_key("gone"));
        for tag in [1, 10, 20, 30, 40] {
            assert!(!plan.networks_to_create.contains_key(&tag), "created {tag}");
            assert!(!plan.networks_to_delete.contains_key(&tag), "deleted {tag}");
        }
        assert!(plan.networks_to_delete.contains_key(&50));
    }

    #[test]
    fn network_without_routing_domain_is_deferred() {
        let plan = compute_plan(
            &desired(&["prod"], &[(100, "app", "prod"), (200, "orphan", "nowhere")]),
            &actual(&["prod"], &[]),
            &ReservedSet::default(),
        );
        assert!(plan.networks_to_create.contains_key(&100));
        assert!(!plan.networks_to_create.contains_key(&200));
        assert!(plan.deferred_networks.contains_key(&200));
    }

    #[test]
    fn network_in_deleted_zone_is_deferred() {
        // Zone is present on the controller but no longer desired.
        let plan = compute_plan(
            &desired(&[], &[(300, "late", "retiring")]),
            &actual(&["retiring"], &[]),
            &ReservedSet::default(),
        );
        assert!(plan.routing_domains_to_delete.contains_key("retiring"));
        assert!(plan.deferred_networks.contains_key(&300));
    }

    #[test]
    fn matching_is_exact() {
        let plan = compute_plan(
            &desired(&["Prod"], &[]),
            &actual(&["prod"], &[]),
            &ReservedSet::default(),
        );
        assert!(plan.routing_domains_to_create.contains("Prod"));
        assert!(plan.routing_domains_to_delete.contains_key("prod"));
    }

    #[test]
    fn converged_state_yields_empty_plan() {
        let want = desired(
            &["prod", "dev"],
            &[(100, "app", "prod"), (101, "web", "dev"), (102, "x", "missing")],
        );
        let start = actual(&["legacy", "dev"], &[(7, "old", "legacy"), (999, "junk", "dev")]);
        let keep = reserved(&["legacy"], &[]);

        let first = compute_plan(&want, &start, &keep);
        assert!(!first.is_empty());

        let converged = apply(&first, start);
        let second = compute_plan(&want, &converged, &keep);
        assert!(second.is_empty(), "second plan not empty: {second:?}");
        assert!(compute_plan(&want, &converged, &keep).is_empty());
    }
}
