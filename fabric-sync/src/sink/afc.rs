//! AFC fabric controller: bearer token auth, VRFs as routing domains, VLANs as
//! networks, resources deleted by controller-assigned UUID.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use super::{AuthToken, StateSink};
use crate::config::TargetConfig;
use crate::error::{Result, SyncError};
use crate::http::{self, Mutation, array, as_int, as_str};
use crate::model::{ActualState, FabricScope, NetworkSpec, ResourceRef, RoutingDomain, VlanTag};

pub struct AfcSink {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    target_id: String,
    request_timeout: Duration,
}

impl AfcSink {
    pub fn new(target: &TargetConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(target.verify_ssl)?,
            base_url: format!("{}/api/v1", target.base_url()),
            user: target.user.clone(),
            password: target.password.clone(),
            target_id: target.id.clone(),
            request_timeout: target.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(
        &self,
        token: &AuthToken,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value> {
        let response = token
            .apply(self.client.get(self.url(path)))
            .query(query)
            .timeout(timeout)
            .send()
            .await?;
        http::json_body(response).await
    }
}

#[async_trait]
impl StateSink for AfcSink {
    async fn authenticate(&self, timeout: Duration) -> Result<AuthToken> {
        let response = self
            .client
            .post(self.url("/auth/token"))
            .header("X-Auth-Username", &self.user)
            .header("X-Auth-Password", &self.password)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| match SyncError::from(e) {
                SyncError::Transport(msg) => SyncError::Auth(msg),
                other => other,
            })?;
        if !response.status().is_success() {
            return Err(SyncError::Auth(format!(
                "login rejected with HTTP {}",
                response.status().as_u16()
            )));
        }
        let body = http::json_body(response).await?;
        let token = as_str(&body, "result")
            .ok_or_else(|| SyncError::Auth("token response has no 'result'".to_string()))?;
        debug!(target_id = %self.target_id, "Obtained AFC token");
        Ok(AuthToken::Bearer(token.to_string()))
    }

    async fn resolve_scopes(
        &self,
        token: &AuthToken,
        names: &[String],
        timeout: Duration,
    ) -> Result<Vec<FabricScope>> {
        let body = self.get(token, "/fabrics", &[], timeout).await?;
        let known: Vec<(&str, &str)> = array(&body, "result")?
            .iter()
            .filter_map(|f| Some((as_str(f, "name")?, as_str(f, "uuid")?)))
            .collect();

        let mut scopes = Vec::with_capacity(names.len());
        for name in names {
            match known.iter().find(|(n, _)| *n == name.as_str()) {
                Some((_, uuid)) => {
                    info!(target_id = %self.target_id, fabric = %name, uuid = %uuid, "Resolved fabric");
                    scopes.push(FabricScope {
                        name: name.clone(),
                        id: uuid.to_string(),
                    });
                }
                None => {
                    error!(target_id = %self.target_id, fabric = %name, "Fabric not found on controller, skipping");
                }
            }
        }
        Ok(scopes)
    }

    async fn fetch_actual_state(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        timeout: Duration,
    ) -> Result<ActualState> {
        let vrfs = self
            .get(
                token,
                "/vrfs",
                &[("fabrics", scope.id.as_str()), ("fields", "uuid,name")],
                timeout,
            )
            .await?;
        let mut state = ActualState::default();
        for vrf in array(&vrfs, "result")? {
            let name = as_str(vrf, "name")
                .ok_or_else(|| SyncError::Malformed("VRF without name".to_string()))?;
            let uuid = as_str(vrf, "uuid")
                .ok_or_else(|| SyncError::Malformed(format!("VRF '{}' without uuid", name)))?;
            state.routing_domains.insert(
                name.to_string(),
                RoutingDomain {
                    opaque_id: Some(uuid.to_string()),
                },
            );
        }

        let vlans = self
            .get(token, &format!("/fabrics/{}/vlans", scope.id), &[], timeout)
            .await?;
        for vlan in array(&vlans, "result")? {
            let Some(tag) = vlan.get("vlan_id").and_then(as_int).filter(|t| *t > 0) else {
                continue;
            };
            let tag = VlanTag::try_from(tag)
                .map_err(|_| SyncError::Malformed(format!("VLAN id {} out of range", tag)))?;
            let uuid = as_str(vlan, "uuid")
                .ok_or_else(|| SyncError::Malformed(format!("VLAN {} without uuid", tag)))?;
            state.networks.insert(
                tag,
                NetworkSpec {
                    name: as_str(vlan, "vlan_name").unwrap_or_default().to_string(),
                    routing_domain: as_str(vlan, "vrf").unwrap_or_default().to_string(),
                    opaque_id: Some(uuid.to_string()),
                },
            );
        }
        Ok(state)
    }

    async fn create_routing_domain(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        name: &str,
    ) -> Result<()> {
        let response = token
            .apply(self.client.post(self.url("/vrfs")))
            .json(&json!({ "name": name, "fabric_uuid": scope.id }))
            .timeout(self.request_timeout)
            .send()
            .await?;
        http::finish_mutation(response, Mutation::Create, &format!("VRF '{}'", name)).await
    }

    async fn delete_routing_domain(
        &self,
        token: &AuthToken,
        _scope: &FabricScope,
        domain: ResourceRef<'_>,
    ) -> Result<()> {
        let uuid = domain
            .opaque_id
            .ok_or_else(|| SyncError::Malformed(format!("VRF '{}' has no uuid", domain.name)))?;
        let response = token
            .apply(self.client.delete(self.url(&format!("/vrfs/{}", uuid))))
            .timeout(self.request_timeout)
            .send()
            .await?;
        http::finish_mutation(response, Mutation::Delete, &format!("VRF '{}'", domain.name)).await
    }

    /// VLANs are created at fabric level; the VRF binding is not part of the create call.
    async fn create_network(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        tag: VlanTag,
        name: &str,
        _routing_domain: &str,
    ) -> Result<()> {
        let payload = json!({
            "vlans": [{
                "vlan_id": tag.to_string(),
                "vlan_name": name,
                "strict_firewall_bypass_enabled": false,
            }],
            "vlan_scope": { "fabric_scope": "exclude_spine" },
        });
        let response = token
            .apply(self.client.post(self.url(&format!("/fabrics/{}/vlans", scope.id))))
            .json(&payload)
            .timeout(self.request_timeout)
            .send()
            .await?;
        http::finish_mutation(response, Mutation::Create, &format!("VLAN {}", tag)).await
    }

    async fn delete_network(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        network: ResourceRef<'_>,
    ) -> Result<()> {
        let uuid = network
            .opaque_id
            .ok_or_else(|| SyncError::Malformed(format!("VLAN '{}' has no uuid", network.name)))?;
        let response = token
            .apply(
                self.client
                    .delete(self.url(&format!("/fabrics/{}/vlans/{}", scope.id, uuid))),
            )
            .timeout(self.request_timeout)
            .send()
            .await?;
        http::finish_mutation(response, Mutation::Delete, &format!("VLAN '{}'", network.name))
            .await
    }
}
