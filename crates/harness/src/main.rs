//! Agent performance harness CLI.
//!
//! Two run modes: `managed` attaches to an existing cluster through the
//! ambient kubeconfig and drives the full scenario list; `minikube` owns a
//! throwaway single-node cluster end to end.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agent_perf::cluster::Driver;
use agent_perf::config::HarnessConfig;
use agent_perf::minikube;

/// Cilium agent performance harness.
#[derive(Parser)]
#[command(
    name = "agent-perf",
    version,
    about = "Benchmark the agent's resource overhead on a Kubernetes cluster",
    long_about = "Deploy the agent and a Prometheus monitoring stack, run load\n\
                  scenarios while the cluster soaks, and report the agent's CPU,\n\
                  memory, BPF, and regeneration metrics from range queries.\n\n\
                  Credentials come from the ambient kubeconfig; set CLUSTER_NAME\n\
                  to scope metric selectors when several clusters share one\n\
                  Prometheus."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Namespace the agent is (or will be) deployed in.
    #[arg(long, default_value = "cilium-perf")]
    namespace: String,

    /// Namespace holding the monitoring stack.
    #[arg(long, default_value = "cilium-monitoring")]
    monitoring_namespace: String,

    /// Name of the Prometheus service.
    #[arg(long, default_value = "prometheus")]
    prometheus_service: String,

    /// Minutes to let the cluster run before sampling metrics.
    #[arg(long, default_value_t = 7)]
    soak_minutes: u64,

    /// Width of the query window, in minutes.
    #[arg(long, default_value_t = 5)]
    lookback_minutes: u64,

    /// Directory holding the agent, monitoring, and load manifests.
    #[arg(long, default_value = "manifests")]
    manifest_dir: PathBuf,
}

impl CommonArgs {
    fn into_config(self, deploy_agent: bool) -> HarnessConfig {
        HarnessConfig {
            agent_namespace: self.namespace,
            monitoring_namespace: self.monitoring_namespace,
            prometheus_service: self.prometheus_service,
            deploy_agent,
            soak: Duration::from_secs(self.soak_minutes * 60),
            lookback: Duration::from_secs(self.lookback_minutes * 60),
            manifest_dir: self.manifest_dir,
            cluster_name: None,
        }
        .with_ambient_cluster_name()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark against an already-provisioned managed cluster.
    ///
    /// Runs the baseline, small-load, and big-load scenarios in sequence,
    /// each in its own namespace, and reports agent metrics after every
    /// soak.
    Managed {
        #[command(flatten)]
        common: CommonArgs,

        /// Deploy the agent and monitoring stack before running scenarios.
        /// Leave unset if they are already running.
        #[arg(long)]
        deploy_agent: bool,
    },

    /// Benchmark on a fresh single-node minikube cluster.
    ///
    /// Starts minikube with CNI networking, runs the baseline scenario,
    /// and deletes the cluster afterwards. Fails if minikube is already
    /// running.
    Minikube {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,agent_perf=debug")
    } else {
        EnvFilter::new("warn,agent_perf=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Managed {
            common,
            deploy_agent,
        } => {
            let config = common.into_config(deploy_agent);
            let client = kube::Client::try_default().await?;
            Driver::new(client, config).run_managed().await
        }
        Commands::Minikube { common } => {
            let config = common.into_config(true);

            if minikube::is_running().await? {
                anyhow::bail!(
                    "minikube is already running; delete it and let the harness set it up"
                );
            }
            minikube::start().await?;

            let client = kube::Client::try_default().await?;
            Driver::new(client, config).run_minikube().await?;

            minikube::delete().await
        }
    }
}
