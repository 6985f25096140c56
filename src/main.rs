use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fleetpatch::agent::AgentContext;
use fleetpatch::cluster::{KubeClusterApi, NoClusterApi};
use fleetpatch::config::RunConfig;
use fleetpatch::exec::{SshExecutor, SshPackageManager, SshReachabilityProbe, SshRebootApi};
use fleetpatch::inventory::{build_phases, Inventory, NodeRole};
use fleetpatch::monitor::{AlertingApi, HttpAlertingApi};
use fleetpatch::orchestrator::MaintenanceOrchestrator;
use fleetpatch::probe::{HealthProbe, KubeHealthProbe, RoleProbe};
use fleetpatch::report::MaintenanceReport;
use fleetpatch::{Error, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a maintenance pass over the inventory
    Run(RunArgs),
    /// Show the phases and node order without touching anything
    Plan(PlanArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Inventory file (YAML) listing nodes and roles
    #[arg(long, env = "FLEETPATCH_INVENTORY")]
    inventory: PathBuf,

    /// Run configuration file (TOML); defaults apply when omitted
    #[arg(long, env = "FLEETPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// SSH user for remote commands (defaults to the current user)
    #[arg(long, env = "FLEETPATCH_SSH_USER")]
    ssh_user: Option<String>,

    /// Write the JSON run report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log intended actions without applying them
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Inventory file (YAML) listing nodes and roles
    #[arg(long, env = "FLEETPATCH_INVENTORY")]
    inventory: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("fleetpatch v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Plan(plan_args) => run_plan(plan_args),
        Commands::Run(run_args) => {
            // Everything owned by the run (clients, the report) is dropped
            // before the process exits.
            let code = run_maintenance(run_args).await?;
            std::process::exit(code)
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let inventory = Inventory::from_file(&args.inventory)?;
    let phases = build_phases(&inventory)?;

    for phase in &phases {
        println!("phase {}:", phase.name);
        for (i, node) in phase.nodes.iter().enumerate() {
            println!("  {}. {} ({})", i + 1, node.name, node.address());
        }
    }
    Ok(())
}

async fn run_maintenance(args: RunArgs) -> Result<i32> {
    init_tracing(args.log_json);

    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    if args.dry_run {
        config.dry_run = true;
    }

    let inventory = Inventory::from_file(&args.inventory)?;
    let phases = build_phases(&inventory)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        nodes = inventory.nodes.len(),
        dry_run = config.dry_run,
        "starting fleetpatch"
    );

    let exec = SshExecutor::new(args.ssh_user.clone(), Duration::from_secs(10));
    let has_cluster_members = inventory
        .nodes
        .iter()
        .any(|n| n.role == NodeRole::ClusterMember);

    // Only talk to the API server when the inventory actually contains
    // cluster members; a hosts-only inventory must work without a kubeconfig.
    let (cluster, cluster_probe): (Arc<dyn fleetpatch::agent::ClusterApi>, Arc<dyn HealthProbe>) =
        if has_cluster_members {
            let client = kube::Client::try_default()
                .await
                .map_err(Error::KubeError)?;
            info!("connected to Kubernetes cluster");
            (
                Arc::new(KubeClusterApi::new(
                    client.clone(),
                    config.drain_timeout(),
                    config.dry_run,
                )),
                Arc::new(KubeHealthProbe::new(client)),
            )
        } else {
            (
                Arc::new(NoClusterApi),
                Arc::new(SshReachabilityProbe::new(exec.clone())),
            )
        };

    let host_probe = Arc::new(SshReachabilityProbe::new(exec.clone()));
    let ctx = AgentContext {
        cluster,
        packages: Arc::new(SshPackageManager::new(
            exec.clone(),
            config.reboot_timeout(),
            config.dry_run,
        )),
        reboot: Arc::new(SshRebootApi::new(exec, config.dry_run)),
        probe: Arc::new(RoleProbe::new(cluster_probe, host_probe)),
    };

    let alerting: Arc<dyn AlertingApi> = if config.monitor.enabled {
        Arc::new(HttpAlertingApi::new(
            &config.monitor.base_url,
            &config.monitor.api_key,
            Duration::from_secs(config.monitor.timeout_secs),
        )?)
    } else {
        Arc::new(DisabledAlerting)
    };

    let orchestrator = MaintenanceOrchestrator::new(ctx, alerting, config);

    // Ctrl-C requests a graceful stop: the current node finishes its step,
    // everything not yet started is recorded as skipped.
    let abort = orchestrator.abort_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next safe boundary");
            abort.store(true, Ordering::Relaxed);
        }
    });

    let report = orchestrator.run(phases).await?;
    emit_report(&report, args.report.as_deref())?;

    info!("{}", report.summary());
    for problem in report.problem_nodes() {
        warn!(%problem, "node needs attention");
    }

    Ok(report.status.exit_code())
}

fn emit_report(report: &MaintenanceReport, path: Option<&std::path::Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(Error::SerializationError)?;
    match path {
        Some(path) => {
            std::fs::write(path, &json)?;
            info!(path = %path.display(), "run report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Stand-in when the monitor integration is disabled; the gate never calls it.
struct DisabledAlerting;

#[async_trait::async_trait]
impl AlertingApi for DisabledAlerting {
    async fn pause_all(&self, _duration: Duration) -> Result<()> {
        Ok(())
    }

    async fn resume_all(&self) -> Result<()> {
        Ok(())
    }
}
