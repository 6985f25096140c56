//! Node readiness probing
//!
//! Read-only queries against the cluster, plus the bounded polling loop used
//! to gate uncordon after a reboot. The caller always supplies a retry count
//! and inter-poll delay; there is no unbounded wait anywhere in this module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::api::Api;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::inventory::{Node, NodeRole};

/// Tri-state readiness signal. `Unknown` gates like `NotReady` but is counted
/// separately so operators can tell "never became healthy" apart from an
/// explicit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Readiness {
    Ready,
    NotReady,
    Unknown,
}

/// Read-only health query against the external cluster/service state.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_ready(&self, node: &Node) -> Result<Readiness>;
}

/// What the polling loop observed on the way to Ready.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyOutcome {
    /// Polls it took before the node reported Ready.
    pub attempts: u32,
    /// Polls that returned Unknown (or failed outright) along the way.
    pub unknown_polls: u32,
}

/// Poll until the node reports Ready, up to `retries` attempts with `interval`
/// between them (defaults of 30 x 10s give a ~5 minute ceiling). Probe errors
/// are treated as Unknown for gating but logged so the report can distinguish
/// them. Exhausting the budget is a `HealthTimeout`.
pub async fn wait_ready(
    probe: &dyn HealthProbe,
    node: &Node,
    retries: u32,
    interval: Duration,
) -> Result<ReadyOutcome> {
    let mut unknown_polls = 0;

    for attempt in 1..=retries {
        match probe.is_ready(node).await {
            Ok(Readiness::Ready) => {
                debug!(node = %node.name, attempt, "node is ready");
                return Ok(ReadyOutcome {
                    attempts: attempt,
                    unknown_polls,
                });
            }
            Ok(Readiness::NotReady) => {
                debug!(node = %node.name, attempt, "node not ready yet");
            }
            Ok(Readiness::Unknown) => {
                unknown_polls += 1;
                debug!(node = %node.name, attempt, "node readiness unknown");
            }
            Err(e) => {
                // A failing probe must not abort the wait: the node may be
                // mid-reboot and the API server view flapping with it.
                unknown_polls += 1;
                warn!(node = %node.name, attempt, error = %e, "readiness probe failed");
            }
        }

        if attempt < retries {
            tokio::time::sleep(interval).await;
        }
    }

    Err(Error::HealthTimeout {
        node: node.name.clone(),
        attempts: retries,
    })
}

/// Probe backed by the Kubernetes Node `Ready` condition.
pub struct KubeHealthProbe {
    nodes: Api<K8sNode>,
}

impl KubeHealthProbe {
    pub fn new(client: kube::Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl HealthProbe for KubeHealthProbe {
    async fn is_ready(&self, node: &Node) -> Result<Readiness> {
        let k8s_node = self.nodes.get(&node.name).await.map_err(Error::KubeError)?;

        let ready = k8s_node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));

        Ok(match ready.map(|c| c.status.as_str()) {
            Some("True") => Readiness::Ready,
            Some("False") => Readiness::NotReady,
            // Absent or explicitly "Unknown" condition: kubelet has stopped
            // reporting, typical while the host is rebooting.
            _ => Readiness::Unknown,
        })
    }
}

/// Dispatches readiness queries by role: cluster members are asked the API
/// server, standalone hosts are probed directly.
pub struct RoleProbe {
    cluster: Arc<dyn HealthProbe>,
    host: Arc<dyn HealthProbe>,
}

impl RoleProbe {
    pub fn new(cluster: Arc<dyn HealthProbe>, host: Arc<dyn HealthProbe>) -> Self {
        Self { cluster, host }
    }
}

#[async_trait]
impl HealthProbe for RoleProbe {
    async fn is_ready(&self, node: &Node) -> Result<Readiness> {
        match node.role {
            NodeRole::ClusterMember => self.cluster.is_ready(node).await,
            NodeRole::StandaloneHost => self.host.is_ready(node).await,
        }
    }
}
