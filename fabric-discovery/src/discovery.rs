//! Walks cluster nodes and collects running guests with VLAN-tagged NICs.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use fabric_sync::error::Result;
use fabric_sync::http::{as_int, as_str};
use fabric_sync::source::PveApi;

use crate::netconf::{GuestKind, NetDevice, format_mac_cisco, net_devices};

/// Guest agent calls get their own short timeout; agents are often absent.
const AGENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Interface {
    pub mac_address: String,
    pub external_vlan: u16,
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Workload {
    pub vmid: i64,
    pub name: String,
    pub host_name: String,
    pub status: String,
    pub interfaces: Vec<Interface>,
}

/// Workloads keyed by guest name.
pub type Inventory = BTreeMap<String, Workload>;

fn items(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

/// One discovery pass over the cluster.
pub struct Collector<'a> {
    api: &'a PveApi,
    timeout: Duration,
    /// vnet name → tag, looked up at most once per pass.
    vnet_tags: HashMap<String, Option<i64>>,
}

impl<'a> Collector<'a> {
    pub fn new(api: &'a PveApi, timeout: Duration) -> Self {
        Self {
            api,
            timeout,
            vnet_tags: HashMap::new(),
        }
    }

    /// Listing failures (nodes, guests per node) fail the whole pass. Per-guest
    /// config, agent and vnet lookups degrade to "no data".
    pub async fn collect(mut self) -> Result<Inventory> {
        let mut inventory = Inventory::new();
        let nodes = self.api.get_data("/nodes", self.timeout).await?;

        for node in items(&nodes) {
            let Some(node_name) = as_str(node, "node") else {
                continue;
            };
            if as_str(node, "status") != Some("online") {
                debug!(node = %node_name, "Skipping node that is not online");
                continue;
            }
            for kind in [GuestKind::Qemu, GuestKind::Lxc] {
                self.collect_guests(node_name, kind, &mut inventory).await?;
            }
        }

        info!(workloads = inventory.len(), "Collected guest inventory");
        Ok(inventory)
    }

    async fn collect_guests(
        &mut self,
        node: &str,
        kind: GuestKind,
        inventory: &mut Inventory,
    ) -> Result<()> {
        let base = format!("/nodes/{}/{}", node, kind.path_segment());
        let guests = self.api.get_data(&base, self.timeout).await?;

        for guest in items(&guests) {
            let (Some(vmid), Some(name)) = (guest.get("vmid").and_then(as_int), as_str(guest, "name"))
            else {
                continue;
            };
            let status = as_str(guest, "status").unwrap_or_default();
            if status != "running" {
                continue;
            }

            let config = match self
                .api
                .get_data(&format!("{}/{}/config", base, vmid), self.timeout)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(node, vmid, error = %e, "Could not read guest config");
                    Value::Null
                }
            };

            let agent_ips = match kind {
                GuestKind::Qemu => self.agent_ipv4_by_mac(&base, vmid).await,
                GuestKind::Lxc => HashMap::new(),
            };

            let mut interfaces = Vec::new();
            for dev in net_devices(kind, &config) {
                let Some(vlan) = self.vlan_for(&dev).await else {
                    continue;
                };
                let ip_addresses = match kind {
                    GuestKind::Qemu => agent_ips
                        .get(&dev.mac.to_ascii_uppercase())
                        .cloned()
                        .unwrap_or_default(),
                    GuestKind::Lxc => dev.static_ips.clone(),
                };
                interfaces.push(Interface {
                    mac_address: format_mac_cisco(&dev.mac),
                    external_vlan: vlan,
                    ip_addresses,
                });
            }

            if interfaces.is_empty() {
                continue;
            }
            inventory.insert(
                name.to_string(),
                Workload {
                    vmid,
                    name: name.to_string(),
                    host_name: node.to_string(),
                    status: status.to_string(),
                    interfaces,
                },
            );
        }
        Ok(())
    }

    /// Positive VLAN tag of a device: `tag=` on plain bridges, the vnet's tag otherwise.
    async fn vlan_for(&mut self, dev: &NetDevice) -> Option<u16> {
        let tag = if dev.on_plain_bridge() {
            dev.tag
        } else {
            let vnet = dev.bridge.as_deref()?;
            self.vnet_tag(vnet).await
        };
        tag.filter(|t| *t > 0).and_then(|t| u16::try_from(t).ok())
    }

    async fn vnet_tag(&mut self, vnet: &str) -> Option<i64> {
        if let Some(tag) = self.vnet_tags.get(vnet) {
            return *tag;
        }
        let tag = match self
            .api
            .get_data(&format!("/cluster/sdn/vnets/{}", vnet), self.timeout)
            .await
        {
            Ok(data) => data.get("tag").and_then(as_int),
            Err(e) => {
                debug!(vnet, error = %e, "vnet lookup failed");
                None
            }
        };
        self.vnet_tags.insert(vnet.to_string(), tag);
        tag
    }

    /// IPv4 addresses reported by the guest agent, keyed by upper-case MAC.
    async fn agent_ipv4_by_mac(&self, base: &str, vmid: i64) -> HashMap<String, Vec<String>> {
        let path = format!("{}/{}/agent/network-get-interfaces", base, vmid);
        let data = match self.api.get_data(&path, AGENT_TIMEOUT).await {
            Ok(d) => d,
            Err(e) => {
                debug!(vmid, error = %e, "Guest agent unavailable");
                return HashMap::new();
            }
        };

        let result = &data["result"];
        items(result)
            .iter()
            .filter(|iface| as_str(iface, "name") != Some("lo"))
            .filter_map(|iface| {
                let mac = as_str(iface, "hardware-address")?.to_ascii_uppercase();
                let ips = iface
                    .get("ip-addresses")
                    .map(items)
                    .unwrap_or_default()
                    .iter()
                    .filter(|ip| as_str(ip, "ip-address-type") == Some("ipv4"))
                    .filter_map(|ip| as_str(ip, "ip-address"))
                    .map(str::to_string)
                    .collect();
                Some((mac, ips))
            })
            .collect()
    }
}
