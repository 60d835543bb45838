//! One reconciliation loop per target.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConfigStore, DEFAULT_POLL_INTERVAL, TargetConfig, TargetKind};
use crate::diff::{ReservedSet, compute_plan};
use crate::error::SyncError;
use crate::planner::{ExecutionPlanner, ExecutionReport};
use crate::sink::SinkProvider;
use crate::source::StateSource;

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Cycling,
    Stopped,
}

/// Result of one cycle.
#[derive(Debug, Default)]
pub struct CycleSummary {
    /// Set when the cycle stopped before touching any scope.
    pub aborted: Option<SyncError>,
    pub scopes_total: usize,
    pub scopes_failed: usize,
    pub report: ExecutionReport,
}

impl CycleSummary {
    fn aborted(e: SyncError) -> Self {
        Self {
            aborted: Some(e),
            ..Self::default()
        }
    }
}

/// Keeps one target converged until its section disappears or shutdown is signalled.
pub struct ReconciliationWorker {
    id: String,
    /// Flavor the worker was started for; a section that changes type is handed back.
    kind: TargetKind,
    config: ConfigStore,
    source: Arc<dyn StateSource>,
    sinks: Arc<dyn SinkProvider>,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
    cycles: u64,
}

impl ReconciliationWorker {
    pub fn new(
        id: impl Into<String>,
        kind: TargetKind,
        config: ConfigStore,
        source: Arc<dyn StateSource>,
        sinks: Arc<dyn SinkProvider>,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, state_rx) = watch::channel(WorkerState::Starting);
        let worker = Self {
            id: id.into(),
            kind,
            config,
            source,
            sinks,
            cancel,
            state,
            cycles: 0,
        };
        (worker, state_rx)
    }

    /// Loop until the target is removed from config or cancellation fires.
    pub async fn run(mut self) {
        info!(target_id = %self.id, "Worker started");
        self.state.send_replace(WorkerState::Cycling);

        while !self.cancel.is_cancelled() {
            let Some(snapshot) = self.config.reload() else {
                // Nothing readable yet; the supervisor decides whether that is fatal.
                if !self.sleep(DEFAULT_POLL_INTERVAL).await {
                    break;
                }
                continue;
            };
            if let Some(now) = snapshot
                .section(&self.id)
                .map(|s| s.kind)
                .filter(|k| *k != self.kind)
            {
                info!(
                    target_id = %self.id,
                    started_as = %self.kind,
                    now = %now,
                    "Target changed type, stopping worker"
                );
                break;
            }
            let wait = match snapshot.target(&self.id) {
                None => {
                    info!(target_id = %self.id, "Target removed from config, stopping worker");
                    break;
                }
                Some(Err(e)) => {
                    error!(target_id = %self.id, error = %e, "Invalid target configuration, skipping cycle");
                    DEFAULT_POLL_INTERVAL
                }
                Some(Ok(target)) => {
                    self.run_cycle(&target).await;
                    info!(
                        target_id = %self.id,
                        cycle = self.cycles,
                        wait_secs = target.poll_interval.as_secs(),
                        "Sync cycle finished"
                    );
                    target.poll_interval
                }
            };

            if !self.sleep(wait).await {
                break;
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!(target_id = %self.id, "Worker stopped");
    }

    /// Interruptible sleep; false when cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// One fetch → authenticate → per-scope diff/execute pass.
    pub async fn run_cycle(&mut self, target: &TargetConfig) -> CycleSummary {
        self.cycles += 1;
        let dry_run = target.dry_run();
        let timeout = target.request_timeout;
        info!(
            target_id = %target.id,
            kind = %target.kind,
            cycle = self.cycles,
            mode = if dry_run { "dry-run" } else { "live" },
            "Sync cycle started"
        );

        let desired = match self.source.fetch_desired_state(timeout).await {
            Ok(d) => d,
            Err(e) => {
                error!(target_id = %target.id, op = "fetch_desired_state", error = %e, "Could not get desired state, skipping cycle");
                return CycleSummary::aborted(e);
            }
        };

        let sink = match self.sinks.sink_for(target) {
            Ok(s) => s,
            Err(e) => {
                error!(target_id = %target.id, op = "connect", error = %e, "Could not set up controller client, skipping cycle");
                return CycleSummary::aborted(e);
            }
        };

        info!(target_id = %target.id, host = %target.host, "Authenticating");
        let token = match sink.authenticate(timeout).await {
            Ok(t) => t,
            Err(e) => {
                error!(target_id = %target.id, op = "authenticate", error = %e, "Authentication failed, skipping cycle");
                return CycleSummary::aborted(e);
            }
        };

        let scopes = match sink.resolve_scopes(&token, &target.scopes, timeout).await {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => {
                error!(target_id = %target.id, op = "resolve_scopes", "No configured fabric scope exists on the controller, skipping cycle");
                return CycleSummary::aborted(SyncError::Malformed(
                    "no configured fabric scope resolved".to_string(),
                ));
            }
            Err(e) => {
                error!(target_id = %target.id, op = "resolve_scopes", error = %e, "Could not resolve fabric scopes, skipping cycle");
                return CycleSummary::aborted(e);
            }
        };

        let reserved = ReservedSet::from_target(target);
        let planner = ExecutionPlanner::new(sink.as_ref(), &token, &target.id, dry_run, timeout);
        let mut summary = CycleSummary {
            scopes_total: scopes.len(),
            ..CycleSummary::default()
        };

        for scope in &scopes {
            if self.cancel.is_cancelled() {
                warn!(target_id = %target.id, "Shutdown requested, leaving remaining scopes for later");
                break;
            }

            let actual = match sink.fetch_actual_state(&token, scope, timeout).await {
                Ok(a) => a,
                Err(e) => {
                    error!(target_id = %target.id, scope = %scope.name, op = "fetch_actual_state", error = %e, "Could not get actual state, skipping scope");
                    summary.scopes_failed += 1;
                    continue;
                }
            };

            let plan = compute_plan(&desired, &actual, &reserved);
            info!(
                target_id = %target.id,
                scope = %scope.name,
                create_domains = plan.routing_domains_to_create.len(),
                delete_domains = plan.routing_domains_to_delete.len(),
                create_networks = plan.networks_to_create.len(),
                delete_networks = plan.networks_to_delete.len(),
                deferred = plan.deferred_networks.len(),
                "Computed plan"
            );
            let report = planner.execute(scope, &actual, &plan).await;
            summary.report.merge(&report);
        }

        if summary.scopes_failed > 0 || !summary.report.is_clean() {
            warn!(
                target_id = %target.id,
                scopes_failed = summary.scopes_failed,
                items_failed = summary.report.failed,
                "Cycle completed with failures"
            );
        }
        summary
    }
}
