//! Fabric sync engine.
//!
//! Converges the networks configured on one or more fabric controllers to the
//! zones and VLAN segments defined in the Proxmox SDN layer. One worker runs
//! per configured target; [`supervisor::TargetSupervisor`] keeps that set in
//! line with the config file.

pub mod config;
pub mod diff;
pub mod error;
pub mod http;
pub mod model;
pub mod planner;
pub mod secrets;
pub mod sink;
pub mod source;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{ConfigError, SyncError};
