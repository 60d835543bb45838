//! Applies a [`ReconciliationPlan`] to one fabric scope.
//!
//! Phases run in a fixed order:
//!
//! 1. delete networks
//! 2. delete routing domains
//! 3. create routing domains
//! 4. refresh routing domains from the controller (only if phase 3 created
//!    something and the target is live)
//! 5. create networks whose routing domain is known to exist
//!
//! Every plan item is attempted once. A failed item is logged and counted; it
//! never stops the items after it. Nothing is rolled back.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::Result;
use crate::model::{ActualState, FabricScope, ReconciliationPlan, ResourceRef};
use crate::sink::{AuthToken, StateSink};

/// Outcome counters for one scope (or, merged, one cycle).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Network creations held back because their routing domain is missing.
    pub skipped: usize,
    /// Whether phase 4 re-read the controller.
    pub refreshed: bool,
}

impl ExecutionReport {
    pub fn merge(&mut self, other: &ExecutionReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.refreshed |= other.refreshed;
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Walks a plan against one sink with one token.
pub struct ExecutionPlanner<'a> {
    sink: &'a dyn StateSink,
    token: &'a AuthToken,
    target_id: &'a str,
    dry_run: bool,
    timeout: Duration,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn new(
        sink: &'a dyn StateSink,
        token: &'a AuthToken,
        target_id: &'a str,
        dry_run: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            token,
            target_id,
            dry_run,
            timeout,
        }
    }

    pub async fn execute(
        &self,
        scope: &FabricScope,
        actual: &ActualState,
        plan: &ReconciliationPlan,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for (tag, spec) in &plan.deferred_networks {
            warn!(
                target_id = %self.target_id,
                scope = %scope.name,
                tag,
                zone = %spec.zone,
                "Routing domain for network neither exists nor is planned, retrying next cycle"
            );
        }

        if plan.is_empty() {
            info!(target_id = %self.target_id, scope = %scope.name, "No changes needed");
            return report;
        }

        // Phase 1: delete networks
        for (tag, net) in &plan.networks_to_delete {
            let what = format!("VLAN {} ('{}')", tag, net.name);
            let target = ResourceRef {
                name: &net.name,
                opaque_id: net.opaque_id.as_deref(),
            };
            self.apply(&mut report, scope, "delete_network", &what, || {
                self.sink.delete_network(self.token, scope, target)
            })
            .await;
        }

        // Phase 2: delete routing domains
        let mut deleted = BTreeSet::new();
        for (name, rd) in &plan.routing_domains_to_delete {
            let target = ResourceRef {
                name,
                opaque_id: rd.opaque_id.as_deref(),
            };
            let what = format!("routing domain '{}'", name);
            if self
                .apply(&mut report, scope, "delete_routing_domain", &what, || {
                    self.sink.delete_routing_domain(self.token, scope, target)
                })
                .await
            {
                deleted.insert(name.as_str());
            }
        }

        // Phase 3: create routing domains
        let mut created = BTreeSet::new();
        for name in &plan.routing_domains_to_create {
            let what = format!("routing domain '{}'", name);
            if self
                .apply(&mut report, scope, "create_routing_domain", &what, || {
                    self.sink.create_routing_domain(self.token, scope, name)
                })
                .await
            {
                created.insert(name.as_str());
            }
        }

        // Phase 4: refresh boundary
        let mut available: BTreeSet<String> = actual
            .routing_domains
            .keys()
            .filter(|name| !deleted.contains(name.as_str()))
            .cloned()
            .collect();
        if !plan.routing_domains_to_create.is_empty() && !self.dry_run {
            info!(target_id = %self.target_id, scope = %scope.name, "Re-fetching routing domains after creation");
            match self
                .sink
                .fetch_actual_state(self.token, scope, self.timeout)
                .await
            {
                Ok(fresh) => {
                    available = fresh.routing_domains.into_keys().collect();
                    report.refreshed = true;
                }
                Err(e) => {
                    error!(
                        target_id = %self.target_id,
                        scope = %scope.name,
                        op = "refresh",
                        error = %e,
                        "Re-fetch failed, using locally known routing domains"
                    );
                }
            }
        }
        available.extend(created.iter().map(|s| s.to_string()));

        // Phase 5: create networks
        for (tag, spec) in &plan.networks_to_create {
            if !available.contains(&spec.zone) {
                warn!(
                    target_id = %self.target_id,
                    scope = %scope.name,
                    tag,
                    zone = %spec.zone,
                    "Routing domain not present, skipping network until next cycle"
                );
                report.skipped += 1;
                continue;
            }
            let what = format!("VLAN {} ('{}') in '{}'", tag, spec.name, spec.zone);
            self.apply(&mut report, scope, "create_network", &what, || {
                self.sink
                    .create_network(self.token, scope, *tag, &spec.name, &spec.zone)
            })
            .await;
        }

        info!(
            target_id = %self.target_id,
            scope = %scope.name,
            dry_run = self.dry_run,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Plan executed"
        );
        report
    }

    /// Run one mutation, or only log it in dry-run. Returns whether the
    /// resource now is (or would be) in the intended state.
    async fn apply<F, Fut>(
        &self,
        report: &mut ExecutionReport,
        scope: &FabricScope,
        op: &'static str,
        what: &str,
        call: F,
    ) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        report.attempted += 1;
        if self.dry_run {
            info!(target_id = %self.target_id, scope = %scope.name, op, dry_run = true, "{}", what);
            report.succeeded += 1;
            return true;
        }

        info!(target_id = %self.target_id, scope = %scope.name, op, "{}", what);
        match call().await {
            Ok(()) => {
                report.succeeded += 1;
                true
            }
            Err(e) if e.is_idempotent() => {
                info!(target_id = %self.target_id, scope = %scope.name, op, reason = %e, "Already converged");
                report.succeeded += 1;
                true
            }
            Err(e) => {
                error!(target_id = %self.target_id, scope = %scope.name, op, error = %e, "{} failed", what);
                report.failed += 1;
                false
            }
        }
    }
}
