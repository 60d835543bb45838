use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fabric_sync::config::{ConfigStore, DEFAULT_CONFIG_PATH, TargetKind};
use fabric_sync::secrets::SecretStore;
use fabric_sync::sink::HttpSinkProvider;
use fabric_sync::source::ProxmoxSource;
use fabric_sync::supervisor::TargetSupervisor;

#[derive(Parser)]
#[command(name = "fabric-sync")]
#[command(about = "Synchronize Proxmox SDN zones and VLANs to fabric controllers")]
struct Args {
    /// Orchestrator target configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Only manage targets of these types (default: all)
    #[arg(short, long, value_delimiter = ',', value_parser = parse_kind)]
    kind: Vec<TargetKind>,
}

fn parse_kind(s: &str) -> Result<TargetKind, String> {
    s.parse()
        .map_err(|()| format!("unknown target type '{}' (expected afc or psm)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fabric_sync=info".parse()?))
        .init();

    let args = Args::parse();

    // Fail fast on a missing or broken config; later reloads are lenient.
    let snapshot = ConfigStore::new(&args.config)
        .load()
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(path = %args.config.display(), targets = snapshot.len(), "Loaded configuration");

    let secrets = SecretStore::beside(&args.config);
    if let Err(e) = secrets.load().pve_credentials() {
        warn!(error = %e, env_file = %secrets.env_file().display(), "Source credentials unavailable, cycles will fail until provided");
    }
    let source = ProxmoxSource::new(secrets).context("building source client")?;

    let cancel = CancellationToken::new();
    let mut supervisor = TargetSupervisor::new(
        &args.config,
        Arc::new(source),
        Arc::new(HttpSinkProvider),
        cancel.clone(),
    );
    if !args.kind.is_empty() {
        supervisor = supervisor.with_kinds(&args.kind);
    }
    let mut task = tokio::spawn(supervisor.run());

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    let outcome = tokio::select! {
        res = &mut task => res,
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
            cancel.cancel();
            task.await
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            cancel.cancel();
            task.await
        }
    };

    match outcome.context("supervisor task panicked")? {
        Ok(()) => {
            info!("Stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Supervisor stopped on fatal configuration error");
            Err(e.into())
        }
    }
}
