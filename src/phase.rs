//! Phase execution
//!
//! A phase is an ordered, named group of nodes maintained under one policy
//! before the next group begins. The default concurrency of 1 is a deliberate
//! availability choice: at most one node is ever unavailable at a time.
//! Higher concurrency is an explicit opt-in, and batches are expected to
//! already respect failure-domain boundaries; nothing here auto-detects them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{AgentContext, Disposition, NodeAgent, NodeOutcome, StepPolicy};
use crate::inventory::Node;

/// An ordered group of nodes. The node list is immutable once the run
/// starts: the runner consumes the phase.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Phase {
    pub fn new(name: &str, nodes: Vec<Node>) -> Self {
        Self {
            name: name.to_string(),
            nodes,
        }
    }
}

/// Aggregate status of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Every node succeeded without warnings.
    Clean,
    /// At least one node halted or finished degraded; processing continued.
    Degraded,
    /// The phase stopped early (halt-on-first-failure or operator abort).
    Failed,
}

/// Per-phase result: outcomes in phase-relative processing order.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub name: String,
    pub status: PhaseStatus,
    pub outcomes: Vec<NodeOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PhaseOutcome {
    /// All nodes reached a terminal state (Skipped counts: the node was
    /// deliberately not started).
    pub fn failed_nodes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }
}

/// Policy knobs consumed by the runner, per phase.
#[derive(Debug, Clone)]
pub struct PhasePolicy {
    pub concurrency: usize,
    pub halt_on_first_failure: bool,
    /// Wall-clock budget for the whole phase; `None` disables it. Checked at
    /// node boundaries: a node that is already running is never cut off
    /// mid-step, only the nodes after it are skipped.
    pub timeout: Option<Duration>,
    pub steps: StepPolicy,
}

/// Drives every node of a phase to a terminal state, honoring the
/// concurrency limit and the continue-vs-halt failure policy.
pub struct PhaseRunner {
    ctx: AgentContext,
    policy: PhasePolicy,
    abort: Arc<AtomicBool>,
}

impl PhaseRunner {
    pub fn new(ctx: AgentContext, policy: PhasePolicy, abort: Arc<AtomicBool>) -> Self {
        Self { ctx, policy, abort }
    }

    pub async fn run(&self, phase: Phase) -> PhaseOutcome {
        let started_at = Utc::now();
        info!(
            phase = %phase.name,
            nodes = phase.nodes.len(),
            concurrency = self.policy.concurrency,
            "starting phase"
        );

        let (outcomes, halted) = if self.policy.concurrency <= 1 {
            self.run_serial(&phase).await
        } else {
            self.run_batched(&phase).await
        };

        // An abort only fails the phase if it actually cut processing short.
        let aborted = self.abort.load(Ordering::Relaxed)
            && outcomes.iter().any(|o| {
                o.disposition == Disposition::Skipped
                    || o.failure.as_ref().map(|f| f.kind) == Some("aborted")
            });

        let status = if halted || aborted {
            PhaseStatus::Failed
        } else if outcomes.iter().any(|o| o.needs_attention()) {
            PhaseStatus::Degraded
        } else {
            PhaseStatus::Clean
        };

        if status != PhaseStatus::Clean {
            warn!(
                phase = %phase.name,
                status = ?status,
                failed = outcomes.iter().filter(|o| o.is_failure()).count(),
                "phase finished with problems"
            );
        } else {
            info!(phase = %phase.name, "phase finished clean");
        }

        PhaseOutcome {
            name: phase.name,
            status,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Strictly sequential: node K+1 never starts until node K is terminal.
    async fn run_serial(&self, phase: &Phase) -> (Vec<NodeOutcome>, bool) {
        let deadline = self.policy.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut outcomes = Vec::with_capacity(phase.nodes.len());
        let mut stop_reason: Option<&str> = None;

        for (sequence, node) in phase.nodes.iter().enumerate() {
            if stop_reason.is_none() && deadline_passed(deadline) {
                warn!(phase = %phase.name, "phase timeout budget exhausted");
                stop_reason = Some("phase timeout budget exhausted");
            }
            if let Some(reason) = stop_reason {
                outcomes.push(NodeOutcome::skipped(node, sequence, reason));
                continue;
            }
            if self.abort.load(Ordering::Relaxed) {
                outcomes.push(NodeOutcome::skipped(node, sequence, "run aborted"));
                continue;
            }

            let outcome = self.run_node(node.clone(), sequence).await;
            if outcome.is_failure() && self.policy.halt_on_first_failure {
                warn!(
                    phase = %phase.name,
                    node = %outcome.node,
                    "halting phase on first failure"
                );
                stop_reason = Some("phase halted after earlier node failure");
            }
            outcomes.push(outcome);
        }

        (outcomes, stop_reason.is_some())
    }

    /// Bounded batches of `concurrency` nodes. Outcomes keep their
    /// phase-relative sequence number, so reporting order is processing
    /// order even though completion within a batch is unordered.
    async fn run_batched(&self, phase: &Phase) -> (Vec<NodeOutcome>, bool) {
        let deadline = self.policy.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut outcomes = Vec::with_capacity(phase.nodes.len());
        let mut halted = false;
        let mut timed_out = false;
        let batch_size = self.policy.concurrency;

        for (batch_index, batch) in phase.nodes.chunks(batch_size).enumerate() {
            let base = batch_index * batch_size;

            if !halted && !timed_out && deadline_passed(deadline) {
                warn!(phase = %phase.name, "phase timeout budget exhausted");
                timed_out = true;
            }

            if halted || timed_out || self.abort.load(Ordering::Relaxed) {
                let reason = if halted {
                    "phase halted after earlier node failure"
                } else if timed_out {
                    "phase timeout budget exhausted"
                } else {
                    "run aborted"
                };
                for (offset, node) in batch.iter().enumerate() {
                    outcomes.push(NodeOutcome::skipped(node, base + offset, reason));
                }
                continue;
            }

            let agents = batch
                .iter()
                .enumerate()
                .map(|(offset, node)| self.run_node(node.clone(), base + offset));
            let mut batch_outcomes = futures::future::join_all(agents).await;

            if batch_outcomes.iter().any(|o| o.is_failure()) && self.policy.halt_on_first_failure
            {
                halted = true;
            }
            outcomes.append(&mut batch_outcomes);
        }

        outcomes.sort_by_key(|o| o.sequence);
        (outcomes, halted || timed_out)
    }

    async fn run_node(&self, node: Node, sequence: usize) -> NodeOutcome {
        NodeAgent::new(
            node,
            sequence,
            self.ctx.clone(),
            self.policy.steps.clone(),
            Arc::clone(&self.abort),
        )
        .maintain()
        .await
    }
}

fn deadline_passed(deadline: Option<tokio::time::Instant>) -> bool {
    deadline.is_some_and(|d| tokio::time::Instant::now() >= d)
}
