//! Run-level orchestration
//!
//! Composes the monitor gate and the ordered phases into one maintenance
//! run. Two guarantees live here and nowhere else: phase N+1 never starts
//! until every node of phase N is terminal, and the monitor window's resume
//! is attempted exactly once on every exit path, including a panic injected
//! by a collaborator mid-phase.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{info, warn};

use crate::agent::{AgentContext, NodeOutcome, StepPolicy};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::monitor::{AlertingApi, MonitorGate};
use crate::phase::{Phase, PhaseOutcome, PhasePolicy, PhaseRunner, PhaseStatus};
use crate::report::{MaintenanceReport, RunStatus};

pub struct MaintenanceOrchestrator {
    ctx: AgentContext,
    alerting: Arc<dyn AlertingApi>,
    config: RunConfig,
    abort: Arc<AtomicBool>,
}

impl MaintenanceOrchestrator {
    pub fn new(ctx: AgentContext, alerting: Arc<dyn AlertingApi>, config: RunConfig) -> Self {
        Self {
            ctx,
            alerting,
            config,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag an interrupt handler can set; honored at node and phase
    /// boundaries only.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Execute the full run: validate, open the mute window, run every phase
    /// in order, release the window, finalize the report.
    pub async fn run(&self, phases: Vec<Phase>) -> Result<MaintenanceReport> {
        self.config.validate()?;
        if phases.is_empty() || phases.iter().all(|p| p.nodes.is_empty()) {
            return Err(Error::ConfigError(
                "maintenance run has no nodes to process".into(),
            ));
        }
        if let Some(empty) = phases.iter().find(|p| p.nodes.is_empty()) {
            return Err(Error::ConfigError(format!(
                "phase {} has an empty node list",
                empty.name
            )));
        }

        let started_at = Utc::now();
        let run_id = format!("run-{}", started_at.format("%Y%m%dT%H%M%SZ"));
        info!(
            run_id,
            phases = phases.len(),
            nodes = phases.iter().map(|p| p.nodes.len()).sum::<usize>(),
            dry_run = self.config.dry_run,
            "starting maintenance run"
        );

        let gate = MonitorGate::new(
            Arc::clone(&self.alerting),
            self.config.monitor.enabled,
            self.config.monitor_pause(),
        );
        let mut window = gate.pause().await;
        let monitor_unavailable = window.unavailable;

        // Catch panics from collaborators so the mute window is released on
        // the crash path too; the panic is re-raised after the release.
        let phase_result = AssertUnwindSafe(self.run_phases(phases))
            .catch_unwind()
            .await;

        gate.resume(&mut window).await;

        let phase_outcomes = match phase_result {
            Ok(outcomes) => outcomes,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        let status = MaintenanceReport::derive_status(&phase_outcomes);
        let report = MaintenanceReport {
            run_id,
            status,
            monitor_unavailable,
            started_at,
            finished_at: Utc::now(),
            phases: phase_outcomes,
        };

        match status {
            RunStatus::Clean => info!(run_id = %report.run_id, "maintenance run clean"),
            _ => warn!(
                run_id = %report.run_id,
                status = status.as_str(),
                problems = ?report.problem_nodes(),
                "maintenance run needs attention"
            ),
        }

        Ok(report)
    }

    /// Run phases strictly in order. A phase that fails (halt-on-first or
    /// abort) stops the run; the remaining phases' nodes are recorded as
    /// skipped so the report still enumerates every node.
    async fn run_phases(&self, phases: Vec<Phase>) -> Vec<PhaseOutcome> {
        let policy = PhasePolicy {
            concurrency: self.config.concurrency,
            halt_on_first_failure: self.config.halt_on_first_failure,
            timeout: self.config.phase_timeout(),
            steps: StepPolicy::from_config(&self.config),
        };
        let runner = PhaseRunner::new(self.ctx.clone(), policy, Arc::clone(&self.abort));

        let mut outcomes = Vec::with_capacity(phases.len());
        let mut stopped = false;

        for phase in phases {
            if stopped || self.abort.load(Ordering::Relaxed) {
                let reason = if stopped {
                    "run stopped after earlier phase failure"
                } else {
                    "run aborted"
                };
                outcomes.push(skipped_phase(phase, reason));
                continue;
            }

            let outcome = runner.run(phase).await;
            if outcome.status == PhaseStatus::Failed {
                stopped = true;
            }
            outcomes.push(outcome);
        }

        outcomes
    }
}

fn skipped_phase(phase: Phase, reason: &str) -> PhaseOutcome {
    let now = Utc::now();
    let outcomes = phase
        .nodes
        .iter()
        .enumerate()
        .map(|(sequence, node)| NodeOutcome::skipped(node, sequence, reason))
        .collect();
    PhaseOutcome {
        name: phase.name,
        status: PhaseStatus::Failed,
        outcomes,
        started_at: now,
        finished_at: now,
    }
}
