//! Run configuration
//!
//! Semantic configuration surface for a maintenance run: serial limit, retry
//! and timeout budgets, monitor-pause window, and the failure-policy flags.
//! Loaded from a TOML file with every field defaulted so an empty file is a
//! valid (conservative) configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration for one maintenance run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Nodes processed simultaneously within a phase. 1 = fully serial,
    /// guaranteeing at most one node is unavailable at a time.
    pub concurrency: usize,

    /// Readiness poll attempts after reboot before declaring HealthTimeout.
    pub ready_retries: u32,

    /// Delay between readiness polls, in seconds.
    pub ready_poll_interval_secs: u64,

    /// Wall-clock budget for one whole phase, in seconds. When the budget
    /// runs out the remaining nodes are recorded as skipped and the phase
    /// fails. 0 disables the budget.
    pub phase_timeout_secs: u64,

    /// Budget for a drain to fully evict workloads, in seconds.
    pub drain_timeout_secs: u64,

    /// Budget for reboot-related remote commands, in seconds.
    pub reboot_timeout_secs: u64,

    /// How long to wait for a rebooting host to actually drop its connection
    /// before proceeding anyway (fire-and-forget tolerance), in seconds.
    pub unreachable_grace_secs: u64,

    /// Retries for transient step failures (network blips, SSH drops).
    pub step_retries: u32,

    /// Delay between transient-failure retries, in seconds.
    pub retry_delay_secs: u64,

    /// Run apt dist-upgrade instead of plain upgrade.
    pub dist_upgrade: bool,

    /// Reboot nodes after patching. When disabled, nodes are patched and
    /// uncordoned without the reboot/wait steps.
    pub reboot: bool,

    /// Stop processing remaining nodes in a phase after the first
    /// ErrorHalted node. Default is to continue and mark the phase degraded.
    pub halt_on_first_failure: bool,

    /// Treat a package-manager failure as fatal for the node. Default is to
    /// log and continue: the host may simply already be on latest.
    pub halt_on_patch_failure: bool,

    /// Log intended actions without touching any node.
    pub dry_run: bool,

    pub monitor: MonitorConfig,
}

/// Monitoring-vendor mute window configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// When false, pause/resume are no-ops.
    pub enabled: bool,
    /// Requested mute duration, in minutes.
    pub pause_minutes: u64,
    /// Base URL of the alerting vendor API.
    pub base_url: String,
    /// API key passed as a bearer token.
    pub api_key: String,
    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            ready_retries: 30,
            ready_poll_interval_secs: 10,
            phase_timeout_secs: 0,
            drain_timeout_secs: 300,
            reboot_timeout_secs: 600,
            unreachable_grace_secs: 120,
            step_retries: 2,
            retry_delay_secs: 5,
            dist_upgrade: false,
            reboot: true,
            halt_on_first_failure: false,
            halt_on_patch_failure: false,
            dry_run: false,
            monitor: MonitorConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pause_minutes: 90,
            base_url: String::new(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

impl RunConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RunConfig = toml::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets that would make a wait unbounded or a loop vacuous.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::ConfigError("concurrency must be at least 1".into()));
        }
        if self.ready_retries == 0 {
            return Err(Error::ConfigError(
                "ready_retries must be at least 1".into(),
            ));
        }
        if self.monitor.enabled && self.monitor.base_url.is_empty() {
            return Err(Error::ConfigError(
                "monitor.base_url is required when monitor.enabled is set".into(),
            ));
        }
        Ok(())
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ready_poll_interval_secs)
    }

    /// `None` when the phase budget is disabled.
    pub fn phase_timeout(&self) -> Option<Duration> {
        (self.phase_timeout_secs > 0).then(|| Duration::from_secs(self.phase_timeout_secs))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.reboot_timeout_secs)
    }

    pub fn unreachable_grace(&self) -> Duration {
        Duration::from_secs(self.unreachable_grace_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn monitor_pause(&self) -> Duration {
        Duration::from_secs(self.monitor.pause_minutes * 60)
    }
}
