//! PSM policy manager: cookie session auth, virtual routers as routing
//! domains, bridged networks as networks, resources addressed by name.
//! The fabric scope is the tenant.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{AuthToken, StateSink};
use crate::config::TargetConfig;
use crate::error::{Result, SyncError};
use crate::http::{self, Mutation, array, as_int, as_str};
use crate::model::{ActualState, FabricScope, NetworkSpec, ResourceRef, RoutingDomain, VlanTag};

const NETWORKS_PATH: &str = "/configs/network/v1/networks";

pub struct PsmSink {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    tenant: String,
    target_id: String,
    request_timeout: Duration,
}

impl PsmSink {
    pub fn new(target: &TargetConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(target.verify_ssl)?,
            base_url: target.base_url(),
            user: target.user.clone(),
            password: target.password.clone(),
            tenant: target.tenant.clone(),
            target_id: target.id.clone(),
            request_timeout: target.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn routers_path(tenant: &str) -> String {
        format!("/configs/network/v1/tenant/{}/virtualrouters", tenant)
    }

    /// Tenant-scoped network collection, used for writes.
    fn tenant_networks_path(tenant: &str) -> String {
        format!("/configs/network/v1/tenant/{}/networks", tenant)
    }

    async fn get(&self, token: &AuthToken, path: &str, timeout: Duration) -> Result<Value> {
        let response = token
            .apply(self.client.get(self.url(path)))
            .timeout(timeout)
            .send()
            .await?;
        http::json_body(response).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        op: Mutation,
        what: String,
    ) -> Result<()> {
        let response = request.timeout(self.request_timeout).send().await?;
        http::finish_mutation(response, op, &what).await
    }
}

/// Collapse `Set-Cookie` headers into a `Cookie` header value.
fn session_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}

#[async_trait]
impl StateSink for PsmSink {
    async fn authenticate(&self, timeout: Duration) -> Result<AuthToken> {
        let response = self
            .client
            .post(self.url("/v1/login"))
            .json(&json!({
                "username": self.user,
                "password": self.password,
                "tenant": self.tenant,
            }))
            .timeout(timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Auth(format!(
                "login rejected with HTTP {}",
                response.status().as_u16()
            )));
        }
        let cookie = session_cookie(response.headers())
            .ok_or_else(|| SyncError::Auth("login response set no session cookie".to_string()))?;
        debug!(target_id = %self.target_id, "Obtained PSM session");
        Ok(AuthToken::Cookie(cookie))
    }

    async fn fetch_actual_state(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        timeout: Duration,
    ) -> Result<ActualState> {
        let mut state = ActualState::default();

        let routers = self
            .get(token, &Self::routers_path(&scope.id), timeout)
            .await?;
        for router in array(&routers, "items")? {
            if let Some(name) = router.get("meta").and_then(|m| as_str(m, "name")) {
                state
                    .routing_domains
                    .insert(name.to_string(), RoutingDomain::default());
            }
        }

        let networks = self.get(token, NETWORKS_PATH, timeout).await?;
        for network in array(&networks, "items")? {
            let meta = &network["meta"];
            let spec = &network["spec"];
            if as_str(meta, "tenant").is_some_and(|t| t != scope.id) {
                continue;
            }
            let Some(tag) = spec.get("vlan-id").and_then(as_int).filter(|t| *t > 0) else {
                continue;
            };
            let tag = VlanTag::try_from(tag)
                .map_err(|_| SyncError::Malformed(format!("vlan-id {} out of range", tag)))?;
            let name = as_str(meta, "name")
                .ok_or_else(|| SyncError::Malformed(format!("network with vlan-id {} has no name", tag)))?;
            state.networks.insert(
                tag,
                NetworkSpec {
                    name: name.to_string(),
                    routing_domain: as_str(spec, "virtual-router").unwrap_or_default().to_string(),
                    opaque_id: None,
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
        let request = token
            .apply(self.client.post(self.url(&Self::routers_path(&scope.id))))
            .json(&json!({
                "meta": { "name": name, "tenant": scope.id },
                "spec": { "type": "unknown" },
            }));
        self.send(request, Mutation::Create, format!("virtual router '{}'", name))
            .await
    }

    async fn delete_routing_domain(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        domain: ResourceRef<'_>,
    ) -> Result<()> {
        let path = format!("{}/{}", Self::routers_path(&scope.id), domain.key());
        let request = token.apply(self.client.delete(self.url(&path)));
        self.send(
            request,
            Mutation::Delete,
            format!("virtual router '{}'", domain.name),
        )
        .await
    }

    /// Networks are named `vlan<tag>` on this controller.
    async fn create_network(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        tag: VlanTag,
        _name: &str,
        routing_domain: &str,
    ) -> Result<()> {
        let request = token
            .apply(self.client.post(self.url(&Self::tenant_networks_path(&scope.id))))
            .json(&json!({
                "kind": "Network",
                "meta": { "name": format!("vlan{}", tag), "tenant": scope.id },
                "spec": { "type": "bridged", "vlan-id": tag, "virtual-router": routing_domain },
            }));
        self.send(request, Mutation::Create, format!("network vlan{}", tag))
            .await
    }

    async fn delete_network(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        network: ResourceRef<'_>,
    ) -> Result<()> {
        let path = format!("{}/{}", Self::tenant_networks_path(&scope.id), network.key());
        let request = token.apply(self.client.delete(self.url(&path)));
        self.send(request, Mutation::Delete, format!("network '{}'", network.name))
            .await
    }
}
