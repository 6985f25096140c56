//! fleetpatch: health-gated rolling maintenance for a small Kubernetes fleet
//!
//! Walks an inventory of hosts one at a time through drain, patch, reboot,
//! readiness wait, and uncordon, with cluster nodes always finished before
//! the standalone control host. An external alerting vendor is muted for the
//! duration of the run and released on every exit path.

pub mod agent;
pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod inventory;
pub mod monitor;
pub mod orchestrator;
pub mod phase;
pub mod probe;
pub mod report;

pub use crate::error::{Error, Result};
