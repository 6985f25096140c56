//! Run report
//!
//! The finalized, immutable aggregate of a maintenance run. Serializable so
//! CI and other automated callers can distinguish Clean from Degraded from
//! Failed without parsing free text.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::phase::{PhaseOutcome, PhaseStatus};

/// Overall run status, derived from node outcomes alone. Monitor-vendor
/// availability never changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Clean,
    Degraded,
    Failed,
}

impl RunStatus {
    /// Process exit code for CI consumption: 0 clean, 1 failed, 2 degraded.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Clean => 0,
            RunStatus::Failed => 1,
            RunStatus::Degraded => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Clean => "Clean",
            RunStatus::Degraded => "Degraded",
            RunStatus::Failed => "Failed",
        }
    }
}

/// Final report for one maintenance run.
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub run_id: String,
    pub status: RunStatus,
    /// The alerting vendor could not be reached to open the mute window.
    pub monitor_unavailable: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseOutcome>,
}

impl MaintenanceReport {
    /// Worst phase status wins: any Failed phase fails the run; otherwise
    /// any Degraded phase (or degraded node) degrades it.
    pub fn derive_status(phases: &[PhaseOutcome]) -> RunStatus {
        if phases.iter().any(|p| p.status == PhaseStatus::Failed) {
            RunStatus::Failed
        } else if phases.iter().any(|p| p.status == PhaseStatus::Degraded) {
            RunStatus::Degraded
        } else {
            RunStatus::Clean
        }
    }

    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Clean
    }

    /// One-paragraph human summary; the structured fields carry the detail.
    pub fn summary(&self) -> String {
        let total: usize = self.phases.iter().map(|p| p.outcomes.len()).sum();
        let failed: usize = self.phases.iter().map(|p| p.failed_nodes()).sum();
        let skipped: usize = self
            .phases
            .iter()
            .flat_map(|p| p.outcomes.iter())
            .filter(|o| o.disposition == crate::agent::Disposition::Skipped)
            .count();

        let mut parts = vec![format!(
            "run {}: {} across {} phase(s), {} node(s)",
            self.run_id,
            self.status.as_str(),
            self.phases.len(),
            total
        )];
        if failed > 0 {
            parts.push(format!("{failed} failed"));
        }
        if skipped > 0 {
            parts.push(format!("{skipped} skipped"));
        }
        if self.monitor_unavailable {
            parts.push("monitoring vendor was unreachable".to_string());
        }
        parts.join(", ")
    }

    /// Nodes that ended in trouble, for prominent operator-facing output.
    pub fn problem_nodes(&self) -> Vec<String> {
        self.phases
            .iter()
            .flat_map(|p| p.outcomes.iter())
            .filter(|o| o.needs_attention())
            .map(|o| {
                let reason = o
                    .failure
                    .as_ref()
                    .map(|f| f.message.clone())
                    .or_else(|| o.warnings.first().cloned())
                    .unwrap_or_else(|| "unspecified".to_string());
                format!("{} [{}]: {}", o.node, o.state.as_str(), reason)
            })
            .collect()
    }
}
