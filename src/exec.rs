//! SSH command adapters
//!
//! Thin wrappers around `ssh` for the package-manager and reboot
//! collaborators, and a reachability probe for hosts outside the cluster.
//! Every remote call runs under an explicit timeout; exit code 255 (the ssh
//! client's own failure code) maps to a transient error, any other non-zero
//! exit to a precondition failure on the host.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agent::{PackageManager, PatchSummary, RebootApi, RebootOutcome};
use crate::error::{Error, Result};
use crate::inventory::Node;
use crate::probe::{HealthProbe, Readiness};

const REBOOT_ISSUE_TIMEOUT: Duration = Duration::from_secs(15);
const REACHABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const REACHABILITY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Runs commands on a remote host through the system ssh client.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: Option<String>,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(user: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            user,
            connect_timeout,
        }
    }

    fn target(&self, node: &Node) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", node.address()),
            None => node.address().to_string(),
        }
    }

    async fn run(
        &self,
        node: &Node,
        command: &str,
        timeout: Duration,
    ) -> Result<std::process::Output> {
        debug!(node = %node.name, command, "running remote command");

        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg(self.target(node))
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::Transient(format!(
                    "command on {} timed out after {timeout:?}",
                    node.name
                ))
            })?
            .map_err(Error::IoError)?;
        Ok(output)
    }

    /// Run and require exit code 0, returning stdout.
    async fn run_checked(&self, node: &Node, command: &str, timeout: Duration) -> Result<String> {
        let output = self.run(node, command, timeout).await?;
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            // 255 is ssh itself failing to connect, not the remote command
            Some(255) => Err(Error::Transient(format!(
                "ssh connection to {} failed: {}",
                node.name,
                stderr_snippet(&output)
            ))),
            code => Err(Error::PreconditionFailed(format!(
                "`{command}` on {} exited with {code:?}: {}",
                node.name,
                stderr_snippet(&output)
            ))),
        }
    }
}

fn stderr_snippet(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// apt-based patching over SSH.
pub struct SshPackageManager {
    exec: SshExecutor,
    command_timeout: Duration,
    dry_run: bool,
}

impl SshPackageManager {
    pub fn new(exec: SshExecutor, command_timeout: Duration, dry_run: bool) -> Self {
        Self {
            exec,
            command_timeout,
            dry_run,
        }
    }
}

#[async_trait]
impl PackageManager for SshPackageManager {
    async fn update(&self, node: &Node) -> Result<()> {
        if self.dry_run {
            info!(node = %node.name, "[DRY-RUN] would refresh package indexes");
            return Ok(());
        }
        self.exec
            .run_checked(node, "sudo apt-get -q update", self.command_timeout)
            .await?;
        Ok(())
    }

    async fn upgrade(&self, node: &Node, dist_upgrade: bool) -> Result<PatchSummary> {
        if self.dry_run {
            info!(node = %node.name, dist_upgrade, "[DRY-RUN] would upgrade packages");
            return Ok(PatchSummary { changed: false });
        }

        let action = if dist_upgrade {
            "dist-upgrade"
        } else {
            "upgrade"
        };
        let command = format!(
            "sudo DEBIAN_FRONTEND=noninteractive apt-get -y -q \
             -o Dpkg::Options::=--force-confold {action}"
        );
        let stdout = self
            .exec
            .run_checked(node, &command, self.command_timeout)
            .await?;

        let changed = upgrade_changed_packages(&stdout);
        info!(node = %node.name, changed, "package upgrade finished");
        Ok(PatchSummary { changed })
    }
}

/// apt prints "0 upgraded, 0 newly installed, ..." when there was nothing to
/// do; anything else counts as a change.
fn upgrade_changed_packages(stdout: &str) -> bool {
    !stdout
        .lines()
        .any(|line| line.trim_start().starts_with("0 upgraded, 0 newly installed"))
}

/// Fire-and-forget reboot over SSH: issue the reboot, then watch for the
/// connection to drop within the grace budget.
pub struct SshRebootApi {
    exec: SshExecutor,
    dry_run: bool,
}

impl SshRebootApi {
    pub fn new(exec: SshExecutor, dry_run: bool) -> Self {
        Self { exec, dry_run }
    }
}

#[async_trait]
impl RebootApi for SshRebootApi {
    async fn reboot(&self, node: &Node, unreachable_grace: Duration) -> Result<RebootOutcome> {
        if self.dry_run {
            info!(node = %node.name, "[DRY-RUN] would reboot host");
            return Ok(RebootOutcome::ConnectionDropped);
        }

        info!(node = %node.name, "issuing reboot");
        // The connection is expected to die under us; any outcome of the
        // reboot command itself is acceptable.
        if let Err(e) = self
            .exec
            .run(
                node,
                "sudo shutdown -r now 'fleetpatch maintenance reboot'",
                REBOOT_ISSUE_TIMEOUT,
            )
            .await
        {
            debug!(node = %node.name, error = %e, "reboot command connection ended");
        }

        // Wait for the host to actually go away.
        let deadline = tokio::time::Instant::now() + unreachable_grace;
        loop {
            match self
                .exec
                .run_checked(node, "true", REACHABILITY_PROBE_TIMEOUT)
                .await
            {
                Ok(_) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!(node = %node.name, "host still reachable after reboot signal");
                        return Ok(RebootOutcome::StillReachable);
                    }
                    tokio::time::sleep(REACHABILITY_POLL_INTERVAL).await;
                }
                Err(_) => {
                    debug!(node = %node.name, "host went unreachable, reboot underway");
                    return Ok(RebootOutcome::ConnectionDropped);
                }
            }
        }
    }
}

/// Readiness probe for hosts outside the cluster: reachable over SSH means
/// ready. Used by the standalone-host phase where there is no API server to
/// ask.
pub struct SshReachabilityProbe {
    exec: SshExecutor,
}

impl SshReachabilityProbe {
    pub fn new(exec: SshExecutor) -> Self {
        Self { exec }
    }
}

#[async_trait]
impl HealthProbe for SshReachabilityProbe {
    async fn is_ready(&self, node: &Node) -> Result<Readiness> {
        match self
            .exec
            .run_checked(node, "true", REACHABILITY_PROBE_TIMEOUT)
            .await
        {
            Ok(_) => Ok(Readiness::Ready),
            Err(Error::Transient(_)) => Ok(Readiness::NotReady),
            Err(_) => Ok(Readiness::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::NodeRole;

    #[test]
    fn test_target_includes_user_when_set() {
        let node = Node {
            name: "worker".into(),
            address: Some("10.0.0.5".into()),
            role: NodeRole::ClusterMember,
        };
        let with_user = SshExecutor::new(Some("ops".into()), Duration::from_secs(10));
        assert_eq!(with_user.target(&node), "ops@10.0.0.5");

        let without = SshExecutor::new(None, Duration::from_secs(10));
        assert_eq!(without.target(&node), "10.0.0.5");
    }

    #[test]
    fn test_target_falls_back_to_node_name() {
        let node = Node {
            name: "worker".into(),
            address: None,
            role: NodeRole::ClusterMember,
        };
        let exec = SshExecutor::new(None, Duration::from_secs(10));
        assert_eq!(exec.target(&node), "worker");
    }

    #[test]
    fn test_upgrade_output_with_no_changes() {
        let stdout = "Reading package lists...\n\
                      Building dependency tree...\n\
                      0 upgraded, 0 newly installed, 0 to remove and 0 not upgraded.\n";
        assert!(!upgrade_changed_packages(stdout));
    }

    #[test]
    fn test_upgrade_output_with_changes() {
        let stdout = "Reading package lists...\n\
                      12 upgraded, 0 newly installed, 0 to remove and 3 not upgraded.\n\
                      Setting up linux-image-generic ...\n";
        assert!(upgrade_changed_packages(stdout));
    }

    #[test]
    fn test_empty_upgrade_output_counts_as_changed() {
        // Missing summary line: assume something may have changed so the
        // reboot still happens.
        assert!(upgrade_changed_packages(""));
    }
}
