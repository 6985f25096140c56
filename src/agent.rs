//! Per-node maintenance state machine
//!
//! Drives one node through drain -> patch -> reboot -> wait-ready -> uncordon
//! as an explicit tagged-state machine with a validated transition table.
//! Two orderings are correctness-critical and are never relaxed: a node is
//! drained before it is patched, and it must report Ready before it is
//! uncordoned. Everything else is tolerance: patch failures default to
//! continue, and a rebooting host that never visibly drops its connection is
//! flagged degraded rather than failed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::inventory::{Node, NodeRole};
use crate::probe::{wait_ready, HealthProbe};

/// Lifecycle states for one node during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Pending,
    Draining,
    Patching,
    Rebooting,
    WaitingReady,
    Uncordoning,
    Done,
    ErrorHalted,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::ErrorHalted)
    }

    /// Validated transition table. Standalone hosts skip the drain/uncordon
    /// edges; a disabled or unnecessary reboot skips the reboot/wait edges.
    /// `ErrorHalted` is reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, Draining)
                | (Pending, Patching)
                | (Draining, Patching)
                | (Patching, Rebooting)
                | (Patching, WaitingReady)
                | (Patching, Done)
                | (Rebooting, WaitingReady)
                | (WaitingReady, Uncordoning)
                | (WaitingReady, Done)
                | (Uncordoning, Done)
        ) || (!self.is_terminal() && next == ErrorHalted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "Pending",
            NodeState::Draining => "Draining",
            NodeState::Patching => "Patching",
            NodeState::Rebooting => "Rebooting",
            NodeState::WaitingReady => "WaitingReady",
            NodeState::Uncordoning => "Uncordoning",
            NodeState::Done => "Done",
            NodeState::ErrorHalted => "ErrorHalted",
        }
    }
}

/// How the node's processing concluded, independent of the state it stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Succeeded,
    Failed,
    Skipped,
}

/// Actions attempted against a node, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Drain,
    Update,
    Upgrade,
    Reboot,
    WaitReady,
    Uncordon,
}

/// Machine-readable failure record for the report.
#[derive(Debug, Clone, Serialize)]
pub struct FailureNote {
    pub kind: &'static str,
    pub message: String,
}

impl FailureNote {
    fn from_error(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Per-node outcome record. Append-only: built once when the node's
/// processing finishes and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    pub node: String,
    pub role: NodeRole,
    /// Phase-relative processing order, stable even under concurrency > 1.
    pub sequence: usize,
    pub state: NodeState,
    pub disposition: Disposition,
    pub attempted: Vec<StepAction>,
    pub warnings: Vec<String>,
    /// Set when the node finished but needs operator attention (patch
    /// failure tolerated, reboot connection never dropped, ...).
    pub degraded: bool,
    /// The pass changed nothing: no packages upgraded, no reboot issued.
    pub noop: bool,
    pub failure: Option<FailureNote>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl NodeOutcome {
    /// Outcome for a node that was never started (halt-on-first-failure or
    /// operator abort upstream of it).
    pub fn skipped(node: &Node, sequence: usize, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            node: node.name.clone(),
            role: node.role,
            sequence,
            state: NodeState::Pending,
            disposition: Disposition::Skipped,
            attempted: Vec::new(),
            warnings: vec![reason.to_string()],
            degraded: false,
            noop: true,
            failure: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.disposition == Disposition::Failed
    }

    pub fn needs_attention(&self) -> bool {
        self.is_failure() || self.degraded
    }
}

/// Result of a package upgrade.
#[derive(Debug, Clone, Copy)]
pub struct PatchSummary {
    /// Whether any package actually changed. Unchanged hosts skip the reboot.
    pub changed: bool,
}

/// Whether a rebooting host was observed to drop its connection within the
/// grace budget. Staying reachable is tolerated but flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootOutcome {
    ConnectionDropped,
    StillReachable,
}

/// Cluster scheduling operations for cluster-member nodes.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Mark the node unschedulable and evict its workloads.
    async fn drain(&self, node: &Node) -> Result<()>;
    /// Mark the node schedulable again.
    async fn uncordon(&self, node: &Node) -> Result<()>;
}

/// OS package operations on one host.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn update(&self, node: &Node) -> Result<()>;
    async fn upgrade(&self, node: &Node, dist_upgrade: bool) -> Result<PatchSummary>;
}

/// Host reboot, fire-and-forget: the connection is expected to drop.
#[async_trait]
pub trait RebootApi: Send + Sync {
    async fn reboot(&self, node: &Node, unreachable_grace: Duration) -> Result<RebootOutcome>;
}

/// External collaborators a node agent acts through.
#[derive(Clone)]
pub struct AgentContext {
    pub cluster: Arc<dyn ClusterApi>,
    pub packages: Arc<dyn PackageManager>,
    pub reboot: Arc<dyn RebootApi>,
    pub probe: Arc<dyn HealthProbe>,
}

/// Per-step budgets and flags, extracted from [`RunConfig`] at run start.
#[derive(Debug, Clone)]
pub struct StepPolicy {
    pub ready_retries: u32,
    pub ready_poll_interval: Duration,
    pub unreachable_grace: Duration,
    pub step_retries: u32,
    pub retry_delay: Duration,
    pub dist_upgrade: bool,
    pub reboot_enabled: bool,
    pub halt_on_patch_failure: bool,
}

impl StepPolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            ready_retries: config.ready_retries,
            ready_poll_interval: config.ready_poll_interval(),
            unreachable_grace: config.unreachable_grace(),
            step_retries: config.step_retries,
            retry_delay: config.retry_delay(),
            dist_upgrade: config.dist_upgrade,
            reboot_enabled: config.reboot,
            halt_on_patch_failure: config.halt_on_patch_failure,
        }
    }
}

/// Retry a step's external call on transient failures, up to `retries`
/// additional attempts. Non-transient errors propagate immediately.
async fn with_retries<T, F, Fut>(
    what: &str,
    node: &str,
    retries: u32,
    delay: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(node, step = what, attempt, error = %e, "transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Progress notes accumulated while stepping a node.
#[derive(Default)]
struct StepRecord {
    attempted: Vec<StepAction>,
    warnings: Vec<String>,
    degraded: bool,
    noop: bool,
}

/// Drives a single node to a terminal state. Each node is owned by exactly
/// one agent invocation for the run's duration.
pub struct NodeAgent {
    node: Node,
    sequence: usize,
    state: NodeState,
    ctx: AgentContext,
    policy: StepPolicy,
    abort: Arc<AtomicBool>,
}

impl NodeAgent {
    pub fn new(
        node: Node,
        sequence: usize,
        ctx: AgentContext,
        policy: StepPolicy,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            node,
            sequence,
            state: NodeState::Pending,
            ctx,
            policy,
            abort,
        }
    }

    /// Run the node to a terminal state and produce its outcome record.
    pub async fn maintain(mut self) -> NodeOutcome {
        let started_at = Utc::now();
        info!(node = %self.node.name, sequence = self.sequence, "starting node maintenance");

        let mut record = StepRecord::default();
        let result = self.run_steps(&mut record).await;

        let disposition = match &result {
            Ok(()) => Disposition::Succeeded,
            Err(Error::Aborted) if self.state == NodeState::Pending => Disposition::Skipped,
            Err(e) => {
                if !self.state.is_terminal() {
                    self.transition(NodeState::ErrorHalted);
                }
                error!(node = %self.node.name, error = %e, "node halted");
                Disposition::Failed
            }
        };

        if disposition == Disposition::Succeeded {
            info!(
                node = %self.node.name,
                degraded = record.degraded,
                noop = record.noop,
                "node maintenance complete"
            );
        }

        NodeOutcome {
            node: self.node.name.clone(),
            role: self.node.role,
            sequence: self.sequence,
            state: self.state,
            disposition,
            attempted: record.attempted,
            warnings: record.warnings,
            degraded: record.degraded,
            noop: record.noop,
            failure: result.err().as_ref().map(FailureNote::from_error),
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: NodeState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        debug!(
            node = %self.node.name,
            from = self.state.as_str(),
            to = next.as_str(),
            "state transition"
        );
        self.state = next;
    }

    /// Operator aborts are honored here, at transition boundaries, and never
    /// mid-step: a node that has begun a reboot is always waited out.
    fn check_abort(&self) -> Result<()> {
        if self.abort.load(Ordering::Relaxed) {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    async fn run_steps(&mut self, record: &mut StepRecord) -> Result<()> {
        let is_cluster = self.node.role == NodeRole::ClusterMember;
        let policy = self.policy.clone();
        let node = self.node.clone();

        self.check_abort()?;

        // Drain must precede patching: never patch a node that is still
        // schedulable. A drain that keeps failing halts the node unpatched.
        if is_cluster {
            self.transition(NodeState::Draining);
            record.attempted.push(StepAction::Drain);
            let cluster = Arc::clone(&self.ctx.cluster);
            with_retries(
                "drain",
                &node.name,
                policy.step_retries,
                policy.retry_delay,
                || cluster.drain(&node),
            )
            .await?;
            self.transition(NodeState::Patching);
        } else {
            self.transition(NodeState::Patching);
        }

        let changed = self.patch(record).await?;

        // An unchanged host has nothing to reboot into; skipping here is what
        // makes re-runs over an already-patched fleet idempotent.
        let needs_reboot = policy.reboot_enabled && changed;

        if needs_reboot {
            self.check_abort()?;
            self.transition(NodeState::Rebooting);
            record.attempted.push(StepAction::Reboot);

            match self
                .ctx
                .reboot
                .reboot(&node, policy.unreachable_grace)
                .await?
            {
                RebootOutcome::ConnectionDropped => {
                    debug!(node = %node.name, "reboot in progress, connection dropped");
                }
                RebootOutcome::StillReachable => {
                    // Fire-and-forget tolerance: proceed, but flag it.
                    warn!(
                        node = %node.name,
                        "host stayed reachable after reboot signal, proceeding anyway"
                    );
                    record.degraded = true;
                    record
                        .warnings
                        .push("host never dropped connection after reboot signal".to_string());
                }
            }

            self.transition(NodeState::WaitingReady);
            record.attempted.push(StepAction::WaitReady);
            let ready = wait_ready(
                self.ctx.probe.as_ref(),
                &node,
                policy.ready_retries,
                policy.ready_poll_interval,
            )
            .await?;
            if ready.unknown_polls > 0 {
                record.warnings.push(format!(
                    "{} readiness polls returned Unknown before the node recovered",
                    ready.unknown_polls
                ));
            }
        } else {
            info!(
                node = %node.name,
                changed,
                reboot_enabled = policy.reboot_enabled,
                "skipping reboot"
            );
            record.noop = !changed;

            // The node never went down, but the ready-before-uncordon gate
            // holds unconditionally: one readiness poll before handing the
            // node back to the scheduler.
            if is_cluster {
                self.transition(NodeState::WaitingReady);
                record.attempted.push(StepAction::WaitReady);
                wait_ready(self.ctx.probe.as_ref(), &node, 1, policy.ready_poll_interval).await?;
            }
        }

        // Ready-before-uncordon: a failed wait above has already propagated,
        // so an unhealthy node is never returned to the schedulable pool.
        if is_cluster {
            self.transition(NodeState::Uncordoning);
            record.attempted.push(StepAction::Uncordon);
            let cluster = Arc::clone(&self.ctx.cluster);
            with_retries(
                "uncordon",
                &node.name,
                policy.step_retries,
                policy.retry_delay,
                || cluster.uncordon(&node),
            )
            .await
            .map_err(|e| {
                // Silent capacity loss: the node is healthy but unschedulable.
                error!(
                    node = %node.name,
                    error = %e,
                    "uncordon failed; node remains cordoned and must be restored manually"
                );
                e
            })?;
        }

        self.transition(NodeState::Done);
        Ok(())
    }

    /// Package update + upgrade. Failures default to continue-with-warning:
    /// the host may already be on latest, and halting the whole node for a
    /// repository hiccup is worse than patching it on the next run.
    async fn patch(&mut self, record: &mut StepRecord) -> Result<bool> {
        let policy = self.policy.clone();
        let node = self.node.clone();
        let packages = Arc::clone(&self.ctx.packages);

        record.attempted.push(StepAction::Update);
        let update_result = with_retries(
            "package update",
            &node.name,
            policy.step_retries,
            policy.retry_delay,
            || packages.update(&node),
        )
        .await;

        let upgrade_result = match update_result {
            Ok(()) => {
                record.attempted.push(StepAction::Upgrade);
                with_retries(
                    "package upgrade",
                    &node.name,
                    policy.step_retries,
                    policy.retry_delay,
                    || packages.upgrade(&node, policy.dist_upgrade),
                )
                .await
                .map(|summary| summary.changed)
            }
            Err(e) => Err(e),
        };

        match upgrade_result {
            Ok(changed) => Ok(changed),
            Err(e) if !policy.halt_on_patch_failure => {
                warn!(node = %node.name, error = %e, "patch failed, continuing per policy");
                record.degraded = true;
                record.warnings.push(format!("patch failed: {e}"));
                // Unknown patch state: assume something may have changed so
                // the reboot still happens.
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{ctx, fast_policy, node, MockFleet};
    use super::*;

    fn no_abort() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    async fn run_one(fleet: &Arc<MockFleet>, node: Node, policy: StepPolicy) -> NodeOutcome {
        NodeAgent::new(node, 0, ctx(fleet), policy, no_abort())
            .maintain()
            .await
    }

    // ── transition table ───────────────────────────────────────────────────

    #[test]
    fn test_happy_path_transitions_are_valid() {
        use NodeState::*;
        for (from, to) in [
            (Pending, Draining),
            (Draining, Patching),
            (Patching, Rebooting),
            (Patching, WaitingReady),
            (Rebooting, WaitingReady),
            (WaitingReady, Uncordoning),
            (Uncordoning, Done),
        ] {
            assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn test_error_halted_reachable_from_any_non_terminal() {
        use NodeState::*;
        for state in [Pending, Draining, Patching, Rebooting, WaitingReady, Uncordoning] {
            assert!(state.can_transition_to(ErrorHalted));
        }
        assert!(!Done.can_transition_to(ErrorHalted));
        assert!(!ErrorHalted.can_transition_to(ErrorHalted));
    }

    #[test]
    fn test_correctness_critical_orderings_rejected() {
        use NodeState::*;
        // patch before drain
        assert!(!Pending.can_transition_to(Rebooting));
        // uncordon without passing the ready gate, rebooted or not
        assert!(!Rebooting.can_transition_to(Uncordoning));
        assert!(!Rebooting.can_transition_to(Done));
        assert!(!Patching.can_transition_to(Uncordoning));
        // no resurrection of terminal states
        assert!(!Done.can_transition_to(Draining));
        assert!(!ErrorHalted.can_transition_to(Draining));
    }

    // ── step flow ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cluster_node_full_pass() {
        let fleet = Arc::new(MockFleet::new());
        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::Done);
        assert_eq!(outcome.disposition, Disposition::Succeeded);
        assert!(!outcome.degraded);
        assert!(!outcome.noop);
        assert_eq!(
            fleet.events(),
            vec!["drain:w1", "update:w1", "upgrade:w1", "reboot:w1", "ready:w1", "uncordon:w1"]
        );
        assert_eq!(
            outcome.attempted,
            vec![
                StepAction::Drain,
                StepAction::Update,
                StepAction::Upgrade,
                StepAction::Reboot,
                StepAction::WaitReady,
                StepAction::Uncordon
            ]
        );
    }

    #[tokio::test]
    async fn test_drain_failure_halts_before_patching() {
        let mut fleet = MockFleet::new();
        fleet.drain_fail.insert("w1".into());
        let fleet = Arc::new(fleet);

        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::ErrorHalted);
        assert_eq!(outcome.disposition, Disposition::Failed);
        assert_eq!(outcome.failure.as_ref().unwrap().kind, "precondition_failed");
        // the node was never patched while schedulable-unsafe
        assert_eq!(fleet.count_prefix("update:"), 0);
        assert_eq!(fleet.count_prefix("upgrade:"), 0);
    }

    #[tokio::test]
    async fn test_patch_failure_continues_by_default() {
        let mut fleet = MockFleet::new();
        fleet.update_fail.insert("w1".into());
        let fleet = Arc::new(fleet);

        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::Done);
        assert_eq!(outcome.disposition, Disposition::Succeeded);
        assert!(outcome.degraded);
        assert!(outcome.warnings.iter().any(|w| w.contains("patch failed")));
        // patch state unknown, so the reboot still happened
        assert_eq!(fleet.count_prefix("reboot:"), 1);
    }

    #[tokio::test]
    async fn test_patch_failure_halts_when_configured() {
        let mut fleet = MockFleet::new();
        fleet.update_fail.insert("w1".into());
        let fleet = Arc::new(fleet);

        let mut policy = fast_policy();
        policy.halt_on_patch_failure = true;
        let outcome = run_one(&fleet, node("w1", NodeRole::ClusterMember), policy).await;

        assert_eq!(outcome.state, NodeState::ErrorHalted);
        assert_eq!(outcome.disposition, Disposition::Failed);
        assert_eq!(fleet.count_prefix("reboot:"), 0);
    }

    #[tokio::test]
    async fn test_health_timeout_leaves_node_cordoned() {
        let mut fleet = MockFleet::new();
        fleet.never_ready.insert("w1".into());
        let fleet = Arc::new(fleet);

        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::ErrorHalted);
        assert_eq!(outcome.failure.as_ref().unwrap().kind, "health_timeout");
        // safety invariant: an unhealthy node is never uncordoned
        assert_eq!(fleet.count_prefix("uncordon:"), 0);
    }

    #[tokio::test]
    async fn test_uncordon_failure_is_surfaced() {
        let mut fleet = MockFleet::new();
        fleet.uncordon_fail.insert("w1".into());
        let fleet = Arc::new(fleet);

        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::ErrorHalted);
        assert_eq!(outcome.disposition, Disposition::Failed);
        // the transient uncordon failure was retried before halting
        assert_eq!(fleet.count_prefix("uncordon:"), 2);
    }

    #[tokio::test]
    async fn test_reboot_staying_reachable_is_degraded_not_failed() {
        let mut fleet = MockFleet::new();
        fleet.reboot_stays_reachable.insert("w1".into());
        let fleet = Arc::new(fleet);

        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::Done);
        assert_eq!(outcome.disposition, Disposition::Succeeded);
        assert!(outcome.degraded);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("never dropped connection")));
    }

    #[tokio::test]
    async fn test_unchanged_upgrade_skips_reboot_and_is_noop() {
        let mut fleet = MockFleet::new();
        fleet.upgrade_changed = false;
        let fleet = Arc::new(fleet);

        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::Done);
        assert!(outcome.noop);
        assert_eq!(fleet.count_prefix("reboot:"), 0);
        // the ready gate still ran before the node was handed back
        assert_eq!(fleet.count_prefix("ready:w1"), 1);
        // drained nodes are still uncordoned on the way out
        assert_eq!(fleet.count_prefix("uncordon:"), 1);
    }

    #[tokio::test]
    async fn test_unready_node_is_not_uncordoned_even_without_reboot() {
        let mut fleet = MockFleet::new();
        fleet.upgrade_changed = false;
        fleet.never_ready.insert("w1".into());
        let fleet = Arc::new(fleet);

        let outcome = run_one(
            &fleet,
            node("w1", NodeRole::ClusterMember),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::ErrorHalted);
        assert_eq!(outcome.failure.as_ref().unwrap().kind, "health_timeout");
        assert_eq!(fleet.count_prefix("reboot:"), 0);
        assert_eq!(fleet.count_prefix("uncordon:"), 0);
    }

    #[tokio::test]
    async fn test_reboot_flag_off_skips_reboot_but_not_noop() {
        let fleet = Arc::new(MockFleet::new());
        let mut policy = fast_policy();
        policy.reboot_enabled = false;

        let outcome = run_one(&fleet, node("w1", NodeRole::ClusterMember), policy).await;

        assert_eq!(outcome.state, NodeState::Done);
        // packages changed, so this pass did real work
        assert!(!outcome.noop);
        assert_eq!(fleet.count_prefix("reboot:"), 0);
    }

    #[tokio::test]
    async fn test_standalone_host_skips_drain_and_uncordon() {
        let fleet = Arc::new(MockFleet::new());
        let outcome = run_one(
            &fleet,
            node("admin", NodeRole::StandaloneHost),
            fast_policy(),
        )
        .await;

        assert_eq!(outcome.state, NodeState::Done);
        assert_eq!(fleet.count_prefix("drain:"), 0);
        assert_eq!(fleet.count_prefix("uncordon:"), 0);
        assert_eq!(fleet.count_prefix("reboot:"), 1);
    }

    #[tokio::test]
    async fn test_abort_before_start_skips_node() {
        let fleet = Arc::new(MockFleet::new());
        let abort = Arc::new(AtomicBool::new(true));

        let outcome = NodeAgent::new(
            node("w1", NodeRole::ClusterMember),
            0,
            ctx(&fleet),
            fast_policy(),
            abort,
        )
        .maintain()
        .await;

        assert_eq!(outcome.disposition, Disposition::Skipped);
        assert_eq!(outcome.state, NodeState::Pending);
        assert!(fleet.events().is_empty());
    }
}
