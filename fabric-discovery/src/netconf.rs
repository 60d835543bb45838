//! Guest `netN` config lines.

use serde_json::Value;

/// Highest `netN` index Proxmox allows, exclusive.
pub const MAX_NET_DEVICES: usize = 32;

/// NIC model keys whose value is the MAC address on QEMU guests.
const QEMU_NIC_MODELS: &[&str] = &["virtio", "e1000", "vmxnet3", "rtl8139"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }
}

/// One parsed `netN` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDevice {
    pub mac: String,
    pub bridge: Option<String>,
    /// `tag=` as written; only meaningful on `vmbr*` bridges.
    pub tag: Option<i64>,
    /// Static addresses from the container config, prefix length stripped.
    pub static_ips: Vec<String>,
}

impl NetDevice {
    /// Traditional Linux bridge; the VLAN comes from `tag=` rather than an SDN vnet.
    pub fn on_plain_bridge(&self) -> bool {
        self.bridge.as_deref().is_some_and(|b| b.starts_with("vmbr"))
    }

    pub fn parse(kind: GuestKind, line: &str) -> Option<NetDevice> {
        let params: Vec<(&str, &str)> = line
            .split(',')
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        let get = |key: &str| params.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

        let mac = match kind {
            GuestKind::Qemu => params
                .iter()
                .find(|(k, _)| QEMU_NIC_MODELS.contains(k))
                .map(|(_, v)| *v),
            GuestKind::Lxc => get("hwaddr"),
        }?;
        let bridge = get("bridge");
        if kind == GuestKind::Lxc && bridge.is_none() {
            return None;
        }

        let static_ips = match kind {
            GuestKind::Qemu => Vec::new(),
            GuestKind::Lxc => ["ip", "ip6"]
                .iter()
                .filter_map(|k| get(*k))
                .filter(|ip| !ip.eq_ignore_ascii_case("dhcp"))
                .map(|ip| ip.split('/').next().unwrap_or(ip).to_string())
                .collect(),
        };

        Some(NetDevice {
            mac: mac.to_string(),
            bridge: bridge.map(str::to_string),
            tag: get("tag").and_then(|t| t.parse().ok()),
            static_ips,
        })
    }
}

/// All `net0`..`net31` devices of a guest config, in index order.
pub fn net_devices(kind: GuestKind, config: &Value) -> Vec<NetDevice> {
    (0..MAX_NET_DEVICES)
        .filter_map(|i| config.get(format!("net{}", i)).and_then(Value::as_str))
        .filter_map(|line| NetDevice::parse(kind, line))
        .collect()
}

/// `aa:bb:cc:dd:ee:ff` → `AABB.CCDD.EEFF`. Anything that is not twelve hex
/// digits comes back unchanged.
pub fn format_mac_cisco(mac: &str) -> String {
    if mac.is_empty() || mac == "N/A" {
        return "N/A".to_string();
    }
    let hex: String = mac
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if hex.len() != 12 {
        return mac.to_string();
    }
    format!("{}.{}.{}", &hex[0..4], &hex[4..8], &hex[8..12])
}
