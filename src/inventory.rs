//! Fleet inventory
//!
//! An inventory is an ordered snapshot of managed hosts with role tags,
//! consumed once at run start. Phase construction lives here too: cluster
//! members are always maintained before standalone (control) hosts, so that
//! if patching the control host disrupts the orchestrator itself, the cluster
//! has already reached a consistent state.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::phase::Phase;

/// Phase name for Kubernetes cluster members.
pub const CLUSTER_PHASE: &str = "cluster-nodes";
/// Phase name for standalone/control hosts, always run last.
pub const HOST_PHASE: &str = "standalone-hosts";

/// Role tag deciding which phase a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// A schedulable Kubernetes node: drained and uncordoned around patching.
    ClusterMember,
    /// A host outside the cluster (e.g. the administration box): patched and
    /// rebooted without drain/uncordon.
    StandaloneHost,
}

/// One managed host. Owned exclusively by the phase that targets it; never
/// shared between concurrent agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Kubernetes node name (also used as the report identifier).
    pub name: String,
    /// SSH-reachable address; defaults to the name when omitted.
    #[serde(default)]
    pub address: Option<String>,
    pub role: NodeRole,
}

impl Node {
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }
}

/// Ordered set of nodes read once at run start.
#[derive(Debug, Clone, Deserialize)]
pub struct Inventory {
    pub nodes: Vec<Node>,
}

impl Inventory {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let inventory: Inventory =
            serde_yaml::from_str(raw).map_err(|e| Error::ConfigError(format!("inventory: {e}")))?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::ConfigError("inventory has no nodes".into()));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(Error::ConfigError("inventory node with empty name".into()));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "duplicate node {} in inventory",
                    node.name
                )));
            }
        }
        Ok(())
    }
}

/// Split the inventory into ordered phases: cluster members first, then
/// standalone hosts. A role with no nodes yields no phase; an empty inventory
/// is a configuration error raised before any node is touched.
pub fn build_phases(inventory: &Inventory) -> Result<Vec<Phase>> {
    inventory.validate()?;

    let cluster: Vec<Node> = inventory
        .nodes
        .iter()
        .filter(|n| n.role == NodeRole::ClusterMember)
        .cloned()
        .collect();
    let hosts: Vec<Node> = inventory
        .nodes
        .iter()
        .filter(|n| n.role == NodeRole::StandaloneHost)
        .cloned()
        .collect();

    let mut phases = Vec::new();
    if !cluster.is_empty() {
        phases.push(Phase::new(CLUSTER_PHASE, cluster));
    }
    if !hosts.is_empty() {
        phases.push(Phase::new(HOST_PHASE, hosts));
    }
    Ok(phases)
}
