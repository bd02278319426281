//! Harness configuration.
//!
//! All tunables live in one explicit structure handed to the driver; nothing
//! is read from globals after startup. The only ambient input is the
//! `CLUSTER_NAME` environment variable, captured once at build time and used
//! to scope Prometheus label selectors when set.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable naming the cluster under test, used to scope metric
/// label selectors when several clusters share one Prometheus.
pub const CLUSTER_NAME_ENV: &str = "CLUSTER_NAME";

/// Full harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Namespace the agent is (or will be) deployed in.
    pub agent_namespace: String,
    /// Namespace holding the monitoring stack.
    pub monitoring_namespace: String,
    /// Name of the Prometheus service in the monitoring namespace.
    pub prometheus_service: String,
    /// Whether the harness deploys the agent itself, or assumes it is
    /// already running.
    pub deploy_agent: bool,
    /// How long to let the cluster run before sampling metrics.
    pub soak: Duration,
    /// Width of the range-query window at collection time.
    pub lookback: Duration,
    /// Directory holding the agent/monitoring/load manifests.
    pub manifest_dir: PathBuf,
    /// Cluster name for metric label scoping, from `CLUSTER_NAME`.
    pub cluster_name: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            agent_namespace: "cilium-perf".to_string(),
            monitoring_namespace: "cilium-monitoring".to_string(),
            prometheus_service: "prometheus".to_string(),
            deploy_agent: false,
            soak: Duration::from_secs(7 * 60),
            lookback: Duration::from_secs(5 * 60),
            manifest_dir: PathBuf::from("manifests"),
            cluster_name: None,
        }
    }
}

impl HarnessConfig {
    /// Capture the ambient cluster name, treating an empty value as unset.
    #[must_use]
    pub fn with_ambient_cluster_name(mut self) -> Self {
        self.cluster_name = std::env::var(CLUSTER_NAME_ENV)
            .ok()
            .filter(|name| !name.is_empty());
        self
    }

    /// Path to the agent manifest.
    #[must_use]
    pub fn agent_manifest(&self) -> PathBuf {
        self.manifest_dir.join("agent.yaml")
    }

    /// Path to the monitoring stack manifest.
    #[must_use]
    pub fn monitoring_manifest(&self) -> PathBuf {
        self.manifest_dir.join("monitoring.yaml")
    }

    /// Path to the Prometheus exposure manifest.
    #[must_use]
    pub fn expose_manifest(&self) -> PathBuf {
        self.manifest_dir.join("expose-prometheus.yaml")
    }

    /// In-cluster URL of the Prometheus service, for runs where it is not
    /// exposed externally.
    #[must_use]
    pub fn in_cluster_prometheus_url(&self) -> String {
        format!(
            "http://{}.{}.svc",
            self.prometheus_service, self.monitoring_namespace
        )
    }
}
