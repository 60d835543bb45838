//! Source-of-truth adapters.
//!
//! A source is read-only and holds no per-call session state, so one instance
//! is shared by every worker.

pub mod proxmox;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::DesiredState;

pub use proxmox::{ProxmoxSource, PveApi};

/// Produces the desired fabric state.
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Fetch the complete desired state. Either all of it or an error; never a partial result.
    async fn fetch_desired_state(&self, timeout: Duration) -> Result<DesiredState>;
}
