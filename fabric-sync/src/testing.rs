//! In-memory source and sink used by the worker and supervisor tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TargetConfig;
use crate::error::{Result, SyncError};
use crate::model::{
    ActualState, DesiredState, FabricScope, NetworkSpec, ResourceRef, RoutingDomain, SegmentSpec,
    VlanTag,
};
use crate::sink::{AuthToken, SinkProvider, StateSink};
use crate::source::StateSource;

pub fn write_config(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("orchestrators.cfg");
    std::fs::write(&path, text).unwrap();
    path
}

pub struct MockSource {
    desired: Option<DesiredState>,
    fetches: AtomicUsize,
}

impl MockSource {
    pub fn with(zones: &[&str], segments: &[(VlanTag, &str, &str)]) -> Self {
        let desired = DesiredState {
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
        };
        Self {
            desired: Some(desired),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            desired: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateSource for MockSource {
    async fn fetch_desired_state(&self, _timeout: Duration) -> Result<DesiredState> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.desired.clone().ok_or_else(|| SyncError::MissingSecret {
            checked: "PVE_TOKEN_SECRET".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Authenticate,
    FetchActual(String),
    CreateRoutingDomain(String, String),
    DeleteRoutingDomain(String, String),
    /// scope, tag, routing domain
    CreateNetwork(String, VlanTag, String),
    DeleteNetwork(String, String),
}

#[derive(Default)]
struct Inner {
    scopes: HashMap<String, ActualState>,
    calls: Vec<Call>,
    failing_scopes: HashSet<String>,
    failing_calls: Vec<Call>,
    existing_calls: Vec<Call>,
    fail_auth: bool,
}

/// Controller double. Mutations change the per-scope state so refreshes see them.
#[derive(Default)]
pub struct MockSink {
    inner: Mutex<Inner>,
}

impl MockSink {
    pub fn seed(&self, scope: &str, domains: &[&str], networks: &[(VlanTag, &str, &str)]) {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.scopes.entry(scope.to_string()).or_default();
        for d in domains {
            state
                .routing_domains
                .insert(d.to_string(), RoutingDomain::default());
        }
        for (tag, name, domain) in networks {
            state.networks.insert(
                *tag,
                NetworkSpec {
                    name: name.to_string(),
                    routing_domain: domain.to_string(),
                    opaque_id: None,
                },
            );
        }
    }

    pub fn fail_scope(&self, scope: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_scopes
            .insert(scope.to_string());
    }

    pub fn fail_auth(&self) {
        self.inner.lock().unwrap().fail_auth = true;
    }

    pub fn fail_mutation(&self, call: Call) {
        self.inner.lock().unwrap().failing_calls.push(call);
    }

    pub fn already_exists(&self, call: Call) {
        self.inner.lock().unwrap().existing_calls.push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Authenticate | Call::FetchActual(_)))
            .collect()
    }

    fn mutate(&self, call: Call, apply: impl FnOnce(&mut ActualState)) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call.clone());
        if inner.failing_calls.contains(&call) {
            return Err(SyncError::Status {
                status: 500,
                url: "mock".to_string(),
                body: format!("{:?}", call),
            });
        }
        if inner.existing_calls.contains(&call) {
            return Err(SyncError::AlreadyExists(format!("{:?}", call)));
        }
        let scope = match &call {
            Call::CreateRoutingDomain(s, _)
            | Call::DeleteRoutingDomain(s, _)
            | Call::CreateNetwork(s, _, _)
            | Call::DeleteNetwork(s, _) => s.clone(),
            Call::Authenticate | Call::FetchActual(_) => return Ok(()),
        };
        apply(inner.scopes.entry(scope).or_default());
        Ok(())
    }
}

#[async_trait]
impl StateSink for MockSink {
    async fn authenticate(&self, _timeout: Duration) -> Result<AuthToken> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Authenticate);
        if inner.fail_auth {
            return Err(SyncError::Auth("login rejected with HTTP 401".to_string()));
        }
        Ok(AuthToken::Bearer("token".to_string()))
    }

    async fn fetch_actual_state(
        &self,
        _token: &AuthToken,
        scope: &FabricScope,
        _timeout: Duration,
    ) -> Result<ActualState> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::FetchActual(scope.id.clone()));
        if inner.failing_scopes.contains(&scope.id) {
            return Err(SyncError::Transport("connection reset".to_string()));
        }
        Ok(inner.scopes.get(&scope.id).cloned().unwrap_or_default())
    }

    async fn create_routing_domain(
        &self,
        _token: &AuthToken,
        scope: &FabricScope,
        name: &str,
    ) -> Result<()> {
        self.mutate(
            Call::CreateRoutingDomain(scope.id.clone(), name.to_string()),
            |s| {
                s.routing_domains
                    .insert(name.to_string(), RoutingDomain::default());
            },
        )
    }

    async fn delete_routing_domain(
        &self,
        _token: &AuthToken,
        scope: &FabricScope,
        domain: ResourceRef<'_>,
    ) -> Result<()> {
        self.mutate(
            Call::DeleteRoutingDomain(scope.id.clone(), domain.name.to_string()),
            |s| {
                s.routing_domains.remove(domain.name);
            },
        )
    }

    async fn create_network(
        &self,
        _token: &AuthToken,
        scope: &FabricScope,
        tag: VlanTag,
        name: &str,
        routing_domain: &str,
    ) -> Result<()> {
        self.mutate(
            Call::CreateNetwork(scope.id.clone(), tag, routing_domain.to_string()),
            |s| {
                s.networks.insert(
                    tag,
                    NetworkSpec {
                        name: name.to_string(),
                        routing_domain: routing_domain.to_string(),
                        opaque_id: None,
                    },
                );
            },
        )
    }

    async fn delete_network(
        &self,
        _token: &AuthToken,
        scope: &FabricScope,
        network: ResourceRef<'_>,
    ) -> Result<()> {
        self.mutate(
            Call::DeleteNetwork(scope.id.clone(), network.name.to_string()),
            |s| {
                s.networks.retain(|_, n| n.name != network.name);
            },
        )
    }
}

#[derive(Default)]
pub struct MockSinkProvider {
    pub sink: Arc<MockSink>,
}

impl SinkProvider for MockSinkProvider {
    fn sink_for(&self, _target: &TargetConfig) -> Result<Arc<dyn StateSink>> {
        let sink: Arc<dyn StateSink> = self.sink.clone();
        Ok(sink)
    }
}
