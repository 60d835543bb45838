//! Fabric controller adapters.
//!
//! One implementation per controller flavor, selected by
//! [`TargetKind`](crate::config::TargetKind). The reconciliation cycle is
//! written once against [`StateSink`].

pub mod afc;
pub mod psm;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{TargetConfig, TargetKind};
use crate::error::Result;
use crate::model::{ActualState, FabricScope, ResourceRef, VlanTag};

pub use afc::AfcSink;
pub use psm::PsmSink;

/// Proof of authentication, valid for one cycle.
#[derive(Clone)]
pub enum AuthToken {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `Cookie: <session>`.
    Cookie(String),
}

impl AuthToken {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthToken::Bearer(token) => request.bearer_auth(token),
            AuthToken::Cookie(cookie) => request.header(reqwest::header::COOKIE, cookie),
        }
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthToken::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            AuthToken::Cookie(_) => f.write_str("Cookie(<redacted>)"),
        }
    }
}

/// Capability set the engine needs from a fabric controller.
///
/// Mutations must be idempotent from the engine's point of view: a create on
/// an existing resource may return [`SyncError::AlreadyExists`] and a delete
/// on an absent one [`SyncError::NotFound`]; both count as success.
///
/// [`SyncError::AlreadyExists`]: crate::error::SyncError::AlreadyExists
/// [`SyncError::NotFound`]: crate::error::SyncError::NotFound
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn authenticate(&self, timeout: Duration) -> Result<AuthToken>;

    /// Map configured scope names to controller scopes. Names the controller
    /// does not know are logged and left out.
    async fn resolve_scopes(
        &self,
        _token: &AuthToken,
        names: &[String],
        _timeout: Duration,
    ) -> Result<Vec<FabricScope>> {
        Ok(names.iter().map(FabricScope::named).collect())
    }

    async fn fetch_actual_state(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        timeout: Duration,
    ) -> Result<ActualState>;

    async fn create_routing_domain(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        name: &str,
    ) -> Result<()>;

    async fn delete_routing_domain(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        domain: ResourceRef<'_>,
    ) -> Result<()>;

    async fn create_network(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        tag: VlanTag,
        name: &str,
        routing_domain: &str,
    ) -> Result<()>;

    async fn delete_network(
        &self,
        token: &AuthToken,
        scope: &FabricScope,
        network: ResourceRef<'_>,
    ) -> Result<()>;
}

/// Builds the sink for a target, once per cycle.
pub trait SinkProvider: Send + Sync {
    fn sink_for(&self, target: &TargetConfig) -> Result<Arc<dyn StateSink>>;
}

/// Selects the HTTP adapter matching the target's flavor.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSinkProvider;

impl SinkProvider for HttpSinkProvider {
    fn sink_for(&self, target: &TargetConfig) -> Result<Arc<dyn StateSink>> {
        let sink: Arc<dyn StateSink> = match target.kind {
            TargetKind::Afc => Arc::new(AfcSink::new(target)?),
            TargetKind::Psm => Arc::new(PsmSink::new(target)?),
        };
        Ok(sink)
    }
}
