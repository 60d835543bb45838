//! Proxmox VE SDN as the source of truth.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::StateSource;
use crate::error::{Result, SyncError};
use crate::http::{self, as_int, as_str};
use crate::model::{DesiredState, SegmentSpec, VlanTag};
use crate::secrets::{PveCredentials, SecretStore};

/// Thin client for the Proxmox `api2/json` API.
#[derive(Clone)]
pub struct PveApi {
    client: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl PveApi {
    pub fn new(client: reqwest::Client, credentials: &PveCredentials) -> Self {
        Self {
            client,
            base_url: credentials.base_url(),
            authorization: credentials.authorization(),
        }
    }

    /// GET `path` and return its `data` member.
    pub async fn get_data(&self, path: &str, timeout: Duration) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.authorization)
            .timeout(timeout)
            .send()
            .await?;
        let mut body = http::json_body(response).await?;
        Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }
}

/// Reads SDN zones and vnets.
pub struct ProxmoxSource {
    secrets: SecretStore,
    client: reqwest::Client,
}

impl ProxmoxSource {
    /// Certificate verification is fixed at construction (`PVE_VERIFY_SSL`);
    /// the token itself is re-resolved on every fetch.
    pub fn new(secrets: SecretStore) -> Result<Self> {
        let verify_ssl = secrets
            .load()
            .get("PVE_VERIFY_SSL")
            .is_some_and(|v| v != "0");
        Ok(Self {
            secrets,
            client: http::build_client(verify_ssl)?,
        })
    }

    pub fn api(&self) -> Result<PveApi> {
        let credentials = self.secrets.load().pve_credentials()?;
        Ok(PveApi::new(self.client.clone(), &credentials))
    }
}

#[async_trait]
impl StateSource for ProxmoxSource {
    async fn fetch_desired_state(&self, timeout: Duration) -> Result<DesiredState> {
        let api = self.api()?;

        let zones = api.get_data("/cluster/sdn/zones", timeout).await?;
        let vnets = api.get_data("/cluster/sdn/vnets", timeout).await?;

        let desired = DesiredState {
            zones: parse_zones(&zones)?,
            segments: parse_vnets(&vnets)?,
        };
        info!(
            zones = desired.zones.len(),
            segments = desired.segments.len(),
            "Fetched desired state"
        );
        Ok(desired)
    }
}

fn data_items(data: &Value) -> Result<&[Value]> {
    match data {
        Value::Array(items) => Ok(items.as_slice()),
        Value::Null => Ok(&[]),
        other => Err(SyncError::Malformed(format!("expected array in 'data', got {}", other))),
    }
}

fn parse_zones(data: &Value) -> Result<BTreeSet<String>> {
    Ok(data_items(data)?
        .iter()
        .filter_map(|z| as_str(z, "zone"))
        .map(str::to_string)
        .collect())
}

/// Keep vnets that carry a tag and are flagged both port-isolated and orchestration-eligible.
fn parse_vnets(data: &Value) -> Result<BTreeMap<VlanTag, SegmentSpec>> {
    let mut segments = BTreeMap::new();
    for vnet in data_items(data)? {
        let Some(tag) = vnet.get("tag").and_then(as_int) else {
            continue;
        };
        let flagged = |key: &str| vnet.get(key).and_then(as_int) == Some(1);
        if !flagged("isolate-ports") || !flagged("orchestration") {
            continue;
        }

        let name = as_str(vnet, "vnet")
            .ok_or_else(|| SyncError::Malformed(format!("vnet with tag {} has no name", tag)))?;
        let Some(tag) = VlanTag::try_from(tag).ok().filter(|t| *t > 0) else {
            warn!(vnet = %name, tag, "Skipping vnet whose tag is not a VLAN id");
            continue;
        };
        let zone = as_str(vnet, "zone")
            .ok_or_else(|| SyncError::Malformed(format!("vnet '{}' has no zone", name)))?;

        segments.insert(
            tag,
            SegmentSpec {
                name: name.to_string(),
                zone: zone.to_string(),
            },
        );
    }
    Ok(segments)
}
