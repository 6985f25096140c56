//! Kubernetes cluster adapter
//!
//! Implements drain and uncordon against a real cluster: cordon via a merge
//! patch on `spec.unschedulable`, drain as cordon plus eviction of the
//! node's evictable pods, bounded by the configured drain timeout. DaemonSet
//! and mirror pods are left alone, matching kubectl drain's behavior.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node as K8sNode, Pod};
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams};
use tracing::{debug, info};

use crate::agent::ClusterApi;
use crate::error::{Error, Result};
use crate::inventory::Node;

const EVICTION_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct KubeClusterApi {
    client: kube::Client,
    drain_timeout: Duration,
    dry_run: bool,
}

impl KubeClusterApi {
    pub fn new(client: kube::Client, drain_timeout: Duration, dry_run: bool) -> Self {
        Self {
            client,
            drain_timeout,
            dry_run,
        }
    }

    fn nodes(&self) -> Api<K8sNode> {
        Api::all(self.client.clone())
    }

    async fn set_unschedulable(&self, name: &str, value: bool) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "unschedulable": value } });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }

    async fn evictable_pods(&self, node: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        let list = pods.list(&params).await.map_err(Error::KubeError)?;
        Ok(list.items.into_iter().filter(is_evictable).collect())
    }

    async fn evict(&self, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);

        match api.evict(&name, &EvictParams::default()).await {
            Ok(_) => Ok(()),
            // Disruption budget says not yet; the drain loop polls again.
            Err(kube::Error::Api(e)) if e.code == 429 => {
                debug!(pod = %name, namespace = %namespace, "eviction blocked by disruption budget");
                Ok(())
            }
            // Already gone.
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn drain(&self, node: &Node) -> Result<()> {
        if self.dry_run {
            info!(node = %node.name, "[DRY-RUN] would cordon and drain node");
            return Ok(());
        }

        info!(node = %node.name, "cordoning node");
        self.set_unschedulable(&node.name, true).await?;

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            let pods = self.evictable_pods(&node.name).await?;
            if pods.is_empty() {
                info!(node = %node.name, "drain complete");
                return Ok(());
            }

            debug!(node = %node.name, remaining = pods.len(), "evicting pods");
            for pod in &pods {
                self.evict(pod).await?;
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::PreconditionFailed(format!(
                    "drain of {} timed out with {} pod(s) still running",
                    node.name,
                    pods.len()
                )));
            }
            tokio::time::sleep(EVICTION_POLL_INTERVAL).await;
        }
    }

    async fn uncordon(&self, node: &Node) -> Result<()> {
        if self.dry_run {
            info!(node = %node.name, "[DRY-RUN] would uncordon node");
            return Ok(());
        }
        info!(node = %node.name, "uncordoning node");
        self.set_unschedulable(&node.name, false).await
    }
}

/// Pods kubectl drain would also wait for: not DaemonSet-owned, not mirror
/// pods, not already finished.
fn is_evictable(pod: &Pod) -> bool {
    let daemonset_owned = pod
        .metadata
        .owner_references
        .as_ref()
        .map(|owners| owners.iter().any(|o| o.kind == "DaemonSet"))
        .unwrap_or(false);
    if daemonset_owned {
        return false;
    }

    let mirror = pod
        .metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key("kubernetes.io/config.mirror"))
        .unwrap_or(false);
    if mirror {
        return false;
    }

    !matches!(
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Placeholder for inventories with no cluster members: any call is a
/// configuration error so a mis-tagged node fails loudly instead of being
/// silently patched while schedulable.
pub struct NoClusterApi;

#[async_trait]
impl ClusterApi for NoClusterApi {
    async fn drain(&self, node: &Node) -> Result<()> {
        Err(Error::ConfigError(format!(
            "no cluster interface configured but {} is tagged cluster-member",
            node.name
        )))
    }

    async fn uncordon(&self, node: &Node) -> Result<()> {
        Err(Error::ConfigError(format!(
            "no cluster interface configured but {} is tagged cluster-member",
            node.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("app-1".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: None,
            status: None,
        }
    }

    #[test]
    fn test_plain_pod_is_evictable() {
        assert!(is_evictable(&pod()));
    }

    #[test]
    fn test_daemonset_pod_is_not_evictable() {
        let mut p = pod();
        p.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "DaemonSet".to_string(),
            name: "node-exporter".to_string(),
            uid: "uid".to_string(),
            ..Default::default()
        }]);
        assert!(!is_evictable(&p));
    }

    #[test]
    fn test_replicaset_pod_is_evictable() {
        let mut p = pod();
        p.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "ReplicaSet".to_string(),
            name: "app".to_string(),
            uid: "uid".to_string(),
            ..Default::default()
        }]);
        assert!(is_evictable(&p));
    }

    #[test]
    fn test_mirror_pod_is_not_evictable() {
        let mut p = pod();
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "kubernetes.io/config.mirror".to_string(),
            "hash".to_string(),
        );
        p.metadata.annotations = Some(annotations);
        assert!(!is_evictable(&p));
    }

    #[test]
    fn test_finished_pods_are_not_evictable() {
        for phase in ["Succeeded", "Failed"] {
            let mut p = pod();
            p.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
            assert!(!is_evictable(&p), "phase {phase}");
        }

        let mut running = pod();
        running.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });
        assert!(is_evictable(&running));
    }
}
