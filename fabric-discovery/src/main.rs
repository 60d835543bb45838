mod discovery;
mod netconf;
mod output;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fabric_sync::config::DEFAULT_CONFIG_PATH;
use fabric_sync::secrets::SecretStore;
use fabric_sync::source::ProxmoxSource;

use discovery::Collector;

#[derive(Parser)]
#[command(name = "fabric-discovery")]
#[command(about = "Publish running Proxmox guests and their VLAN-tagged interfaces")]
struct Args {
    /// Seconds between discovery passes
    #[arg(short, long, default_value_t = 10)]
    interval: u64,

    /// State file to publish
    #[arg(short, long, default_value = "/var/run/proxmox_state.json")]
    output: PathBuf,

    /// Secrets file (defaults to .env next to the orchestrators config)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 15)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("fabric_discovery=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let secrets = match &args.env_file {
        Some(path) => SecretStore::new(path),
        None => SecretStore::beside(Path::new(DEFAULT_CONFIG_PATH)),
    };
    secrets
        .load()
        .pve_credentials()
        .with_context(|| format!("source token secret (looked in {} and the environment)", secrets.env_file().display()))?;
    let source = ProxmoxSource::new(secrets).context("building source client")?;
    let timeout = Duration::from_secs(args.timeout);

    info!(output = %args.output.display(), interval_secs = args.interval, "Starting discovery");

    let cancel = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let watcher = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
        watcher.cancel();
    });

    let mut ticker = interval(Duration::from_secs(args.interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pass = async {
            let api = source.api()?;
            Collector::new(&api, timeout).collect().await
        };
        let inventory = tokio::select! {
            _ = cancel.cancelled() => break,
            res = pass => res,
        };
        match inventory {
            Ok(inventory) => match output::write_atomic(&args.output, &inventory).await {
                Ok(()) => info!(workloads = inventory.len(), path = %args.output.display(), "Wrote state file"),
                Err(e) => error!(error = %e, "Failed to write state file"),
            },
            Err(e) => error!(error = %e, "Discovery pass failed, keeping previous state file"),
        }
    }

    info!("Stopped");
    Ok(())
}
