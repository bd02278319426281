//! End-to-end performance harness for the Cilium agent.
//!
//! The harness attaches to (or provisions) a Kubernetes cluster, deploys
//! the agent and a Prometheus monitoring stack, runs load scenarios while
//! the cluster soaks, and reports the agent's resource usage from range
//! queries. It is a benchmarking tool: every setup failure is fatal and the
//! run is discarded, never partially reported.
//!
//! # Example
//!
//! ```ignore
//! use agent_perf::cluster::Driver;
//! use agent_perf::config::HarnessConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = kube::Client::try_default().await?;
//!     let config = HarnessConfig::default().with_ambient_cluster_name();
//!     Driver::new(client, config).run_managed().await
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod manifest;
pub mod metrics;
pub mod minikube;
pub mod readiness;
pub mod run;
