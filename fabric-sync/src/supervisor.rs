//! Keeps one worker running per configured target.
//!
//! The registry is owned by the supervisor task alone. Workers never touch it;
//! they stop on their own when their section disappears and the next tick
//! prunes the finished handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, TargetKind};
use crate::error::ConfigError;
use crate::sink::SinkProvider;
use crate::source::StateSource;
use crate::worker::{ReconciliationWorker, WorkerState};

/// How often the set of workers is reconciled against the config file.
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(60);

struct WorkerHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<WorkerState>,
}

pub struct TargetSupervisor {
    config_path: PathBuf,
    config: ConfigStore,
    source: Arc<dyn StateSource>,
    sinks: Arc<dyn SinkProvider>,
    kinds: Vec<TargetKind>,
    tick: Duration,
    cancel: CancellationToken,
    workers: HashMap<String, WorkerHandle>,
}

impl TargetSupervisor {
    pub fn new(
        config_path: impl Into<PathBuf>,
        source: Arc<dyn StateSource>,
        sinks: Arc<dyn SinkProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let config_path = config_path.into();
        Self {
            config: ConfigStore::new(&config_path),
            config_path,
            source,
            sinks,
            kinds: TargetKind::ALL.to_vec(),
            tick: SUPERVISOR_TICK,
            cancel,
            workers: HashMap::new(),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Only manage targets of these kinds.
    pub fn with_kinds(mut self, kinds: &[TargetKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Ids with a live worker, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, h)| !h.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn worker_state(&self, id: &str) -> Option<WorkerState> {
        self.workers.get(id).map(|h| *h.state.borrow())
    }

    /// One supervisor tick: prune exited workers and start missing ones.
    ///
    /// A missing config file is fatal. Any other read or parse failure falls
    /// back to the last good snapshot.
    pub fn reconcile_workers(&mut self) -> Result<usize, ConfigError> {
        let snapshot = match self.config.load() {
            Ok(snapshot) => snapshot,
            Err(e @ ConfigError::NotFound(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Config reload failed, keeping last good snapshot");
                match self.config.last() {
                    Some(snapshot) => snapshot,
                    None => return Ok(0),
                }
            }
        };

        self.workers.retain(|id, handle| {
            if handle.task.is_finished() {
                info!(target_id = %id, "Worker exited, removed from registry");
                false
            } else {
                true
            }
        });

        let mut started = 0;
        for (id, kind) in snapshot.targets() {
            if !self.kinds.contains(&kind) || self.workers.contains_key(id) {
                continue;
            }
            info!(target_id = %id, %kind, "Starting worker");
            let (worker, state) = ReconciliationWorker::new(
                id,
                kind,
                ConfigStore::new(&self.config_path),
                Arc::clone(&self.source),
                Arc::clone(&self.sinks),
                self.cancel.child_token(),
            );
            let task = tokio::spawn(worker.run());
            self.workers.insert(id.to_string(), WorkerHandle { task, state });
            started += 1;
        }
        debug!(workers = self.workers.len(), started, "Supervisor tick");
        Ok(started)
    }

    /// Tick until cancelled, then wait for every worker to exit.
    pub async fn run(mut self) -> Result<(), ConfigError> {
        info!(
            path = %self.config_path.display(),
            tick_secs = self.tick.as_secs(),
            "Supervisor started"
        );
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_workers() {
                        error!(error = %e, "Configuration file is gone, shutting down");
                        self.cancel.cancel();
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown().await;
        result
    }

    /// Cancel every worker and join them.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        info!(workers = self.workers.len(), "Waiting for workers to stop");
        for (id, handle) in self.workers.drain() {
            if let Err(e) = handle.task.await {
                error!(target_id = %id, error = %e, "Worker task failed");
            }
        }
        info!("All workers stopped");
    }
}
