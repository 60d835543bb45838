//! Cycle-scoped state records exchanged between adapters, the diff engine and
//! the execution planner. None of these outlive a reconciliation cycle.

use std::collections::{BTreeMap, BTreeSet};

/// VLAN tag identifying a network segment.
pub type VlanTag = u16;

/// A network segment the source of truth wants present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpec {
    pub name: String,
    pub zone: String,
}

/// What the source of truth wants, shared by every scope of every target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub zones: BTreeSet<String>,
    /// Only segments flagged port-isolated and orchestration-eligible.
    pub segments: BTreeMap<VlanTag, SegmentSpec>,
}

/// A routing domain as the controller reports it. Identity is the map key (its name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDomain {
    /// Controller-assigned id, for controllers that delete by id.
    pub opaque_id: Option<String>,
}

/// A network as the controller reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub routing_domain: String,
    pub opaque_id: Option<String>,
}

/// What one fabric scope currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualState {
    pub routing_domains: BTreeMap<String, RoutingDomain>,
    pub networks: BTreeMap<VlanTag, NetworkSpec>,
}

impl ActualState {
    pub fn has_routing_domain(&self, name: &str) -> bool {
        self.routing_domains.contains_key(name)
    }
}

/// A fabric scope after name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricScope {
    /// Configured name, used in logs.
    pub name: String,
    /// Identifier the controller expects in request paths.
    pub id: String,
}

impl FabricScope {
    /// A scope whose controller addresses it by name.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
        }
    }
}

/// Addresses a resource for deletion: by name, or by id when the controller assigned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef<'a> {
    pub name: &'a str,
    pub opaque_id: Option<&'a str>,
}

impl<'a> ResourceRef<'a> {
    /// The id when present, otherwise the name.
    pub fn key(&self) -> &'a str {
        self.opaque_id.unwrap_or(self.name)
    }
}

/// Create/delete sets for one scope, recomputed from scratch every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub routing_domains_to_create: BTreeSet<String>,
    pub routing_domains_to_delete: BTreeMap<String, RoutingDomain>,
    pub networks_to_create: BTreeMap<VlanTag, SegmentSpec>,
    pub networks_to_delete: BTreeMap<VlanTag, NetworkSpec>,
    /// Desired networks whose routing domain neither exists nor is being
    /// created. Not acted on; the next cycle picks them up again.
    pub deferred_networks: BTreeMap<VlanTag, SegmentSpec>,
}

impl ReconciliationPlan {
    /// No create or delete is scheduled.
    pub fn is_empty(&self) -> bool {
        self.routing_domains_to_create.is_empty()
            && self.routing_domains_to_delete.is_empty()
            && self.networks_to_create.is_empty()
            && self.networks_to_delete.is_empty()
    }
}
