//! Cluster lifecycle driver.
//!
//! Orchestrates one benchmark run: precondition checks, agent deployment,
//! monitoring deployment, Prometheus exposure, the soak, and metrics
//! collection. Every step failure is immediately fatal; a run whose
//! environment was not set up exactly as intended is discarded, not
//! salvaged.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::info;

use crate::config::HarnessConfig;
use crate::manifest::{self, ManifestError, Resource};
use crate::metrics;
use crate::minikube;
use crate::readiness::wait_for_pods_ready;

/// The agent must not be deployed into the cluster's own system namespace
/// on managed clusters.
const PROTECTED_NAMESPACE: &str = "kube-system";

/// Label selecting the managed metrics-server add-on.
const METRICS_SERVER_LABEL: &str = "k8s-app=metrics-server";

const AGENT_READY_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const METRICS_SERVER_READY_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const MONITORING_READY_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const SCENARIO_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Ready pods expected from the agent manifest on a single-node cluster.
const MINIKUBE_AGENT_READY_PODS: usize = 1;

/// Ready pods expected from the monitoring stack.
const MONITORING_READY_PODS_MANAGED: usize = 2;
const MONITORING_READY_PODS_MINIKUBE: usize = 1;

/// Expected agent pod count on a managed cluster: one agent daemonset pod
/// and one node-init daemonset pod per node, plus the operator deployment.
#[must_use]
pub fn expected_agent_pods(node_count: usize) -> usize {
    node_count * 2 + 1
}

/// Whether a namespace is off-limits for the agent deployment.
#[must_use]
pub fn is_protected_namespace(namespace: &str) -> bool {
    namespace == PROTECTED_NAMESPACE
}

/// One load scenario: manifests to deploy and the pod count they produce.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub manifests: Vec<PathBuf>,
    pub pod_count: usize,
}

/// The static scenario list for a managed-cluster run.
#[must_use]
pub fn default_scenarios(manifest_dir: &Path) -> Vec<Scenario> {
    vec![
        Scenario {
            name: "baseline".to_string(),
            manifests: vec![],
            pod_count: 0,
        },
        Scenario {
            name: "small-load".to_string(),
            manifests: vec![manifest_dir.join("load-small.yaml")],
            pod_count: 3,
        },
        Scenario {
            name: "big-load".to_string(),
            manifests: vec![manifest_dir.join("load-big.yaml")],
            pod_count: 50,
        },
    ]
}

/// Copy only the exposure-relevant fields onto a live service spec.
///
/// Everything else on the live object (cluster IP, metadata, status,
/// remaining spec fields) is left untouched so the update does not fight
/// the API server over server-assigned values.
pub fn apply_expose_fields(live: &mut Service, desired: &Service) {
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let live_spec = live.spec.get_or_insert_with(ServiceSpec::default);
    live_spec.ports = desired_spec.ports;
    live_spec.selector = desired_spec.selector;
    live_spec.type_ = desired_spec.type_;
}

/// Pick the first external IP advertised by any node.
#[must_use]
pub fn node_external_ip(nodes: &[Node]) -> Option<String> {
    nodes
        .iter()
        .filter_map(|n| n.status.as_ref())
        .filter_map(|s| s.addresses.as_ref())
        .flatten()
        .find(|addr| addr.type_ == "ExternalIP")
        .map(|addr| addr.address.clone())
}

/// Drives one benchmark run against a cluster.
pub struct Driver {
    client: Client,
    config: HarnessConfig,
}

impl Driver {
    #[must_use]
    pub fn new(client: Client, config: HarnessConfig) -> Self {
        Self { client, config }
    }

    /// Verify the run can proceed at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent namespace is a protected system
    /// namespace.
    pub fn check_preconditions(&self) -> Result<()> {
        if is_protected_namespace(&self.config.agent_namespace) {
            anyhow::bail!(
                "agent namespace {:?} is a protected system namespace",
                self.config.agent_namespace
            );
        }
        Ok(())
    }

    async fn node_count(&self) -> Result<usize> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .context("failed to list nodes")?;
        Ok(list.items.len())
    }

    /// Deploy the agent on a managed cluster and wait for it to settle.
    ///
    /// After the agent's own pods are ready, the managed metrics-server
    /// pods are deleted so their replacements come up under the agent's
    /// networking, and the harness waits for that hand-over to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if any apply, list, delete, or readiness wait fails.
    pub async fn deploy_agent(&self) -> Result<()> {
        let ns = &self.config.agent_namespace;
        manifest::apply_file(&self.client, ns, &self.config.agent_manifest()).await?;

        let nodes = self.node_count().await?;
        let expected = expected_agent_pods(nodes);
        info!(nodes, expected, "Waiting for agent pods");
        wait_for_pods_ready(&self.client, ns, None, expected, AGENT_READY_TIMEOUT)
            .await
            .context("agent pods not ready")?;

        self.takeover_metrics_server().await
    }

    async fn takeover_metrics_server(&self) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), PROTECTED_NAMESPACE);
        let lp = ListParams::default().labels(METRICS_SERVER_LABEL);
        let list = pods
            .list(&lp)
            .await
            .context("failed to list metrics-server pods")?;

        for pod in &list.items {
            let name = pod.name_any();
            info!(pod = %name, label = METRICS_SERVER_LABEL, "Deleting pod for agent takeover");
            pods.delete(&name, &DeleteParams::default())
                .await
                .with_context(|| format!("failed to delete pod {name:?}"))?;
        }

        wait_for_pods_ready(
            &self.client,
            PROTECTED_NAMESPACE,
            Some(METRICS_SERVER_LABEL),
            1,
            METRICS_SERVER_READY_TIMEOUT,
        )
        .await
        .context("metrics-server pod not ready after takeover")
    }

    /// Deploy the agent manifest on a single-node cluster.
    ///
    /// Single-node manifests pin everything into the system namespace and
    /// produce a fixed pod count, so no node arithmetic is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the apply or the readiness wait fails.
    pub async fn deploy_agent_minikube(&self) -> Result<()> {
        manifest::apply_file(
            &self.client,
            PROTECTED_NAMESPACE,
            &self.config.agent_manifest(),
        )
        .await?;

        wait_for_pods_ready(
            &self.client,
            PROTECTED_NAMESPACE,
            None,
            MINIKUBE_AGENT_READY_PODS,
            AGENT_READY_TIMEOUT,
        )
        .await
        .context("agent pods not ready")
    }

    /// Deploy the monitoring stack and wait for its pods.
    ///
    /// # Errors
    ///
    /// Returns an error if the apply or the readiness wait fails.
    pub async fn deploy_monitoring(&self, expected_pods: usize) -> Result<()> {
        let ns = &self.config.monitoring_namespace;
        manifest::apply_file(&self.client, ns, &self.config.monitoring_manifest()).await?;

        wait_for_pods_ready(
            &self.client,
            ns,
            None,
            expected_pods,
            MONITORING_READY_TIMEOUT,
        )
        .await
        .context("monitoring stack not ready")
    }

    /// Patch the live Prometheus service so it becomes externally
    /// reachable, touching only the ports, selector, and type fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the exposure manifest contains anything other
    /// than services, or any API call fails.
    pub async fn expose_prometheus(&self) -> Result<()> {
        let ns = &self.config.monitoring_namespace;
        let path = self.config.expose_manifest();
        let data = std::fs::read(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), ns);
        for resource in manifest::decode_documents(&data)? {
            let Resource::Service(desired) = resource else {
                return Err(ManifestError::UnsupportedKind {
                    kind: resource.kind().to_string(),
                }
                .into());
            };
            let name = desired
                .metadata
                .name
                .clone()
                .context("exposure service has no name")?;

            let mut live = services
                .get(&name)
                .await
                .with_context(|| format!("failed to get service {name:?}"))?;
            apply_expose_fields(&mut live, &desired);
            info!(service = %name, namespace = %ns, "Exposing service");
            services
                .replace(&name, &PostParams::default(), &live)
                .await
                .with_context(|| format!("failed to update service {name:?}"))?;
        }
        Ok(())
    }

    /// Resolve the external URL of the exposed Prometheus service via its
    /// node port and any node's external IP.
    ///
    /// # Errors
    ///
    /// Returns an error if the service has no node port or no node
    /// advertises an external IP.
    pub async fn prometheus_url(&self) -> Result<String> {
        let services: Api<Service> =
            Api::namespaced(self.client.clone(), &self.config.monitoring_namespace);
        let svc = services
            .get(&self.config.prometheus_service)
            .await
            .with_context(|| {
                format!(
                    "failed to get service {:?}",
                    self.config.prometheus_service
                )
            })?;

        let node_port = svc
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.first())
            .and_then(|port| port.node_port)
            .context("prometheus service has no node port")?;

        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .context("failed to list nodes")?;
        let external_ip =
            node_external_ip(&list.items).context("could not find a node external IP")?;

        Ok(format!("http://{external_ip}:{node_port}"))
    }

    /// Let the cluster run so Prometheus accumulates steady-state samples.
    pub async fn soak(&self) {
        info!(
            "Letting the cluster run for {:?} to gather metrics",
            self.config.soak
        );
        tokio::time::sleep(self.config.soak).await;
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        namespaces
            .create(&PostParams::default(), &ns)
            .await
            .with_context(|| format!("failed to create namespace {name:?}"))?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        namespaces
            .delete(name, &DeleteParams::default())
            .await
            .with_context(|| format!("failed to delete namespace {name:?}"))?;
        Ok(())
    }

    /// Run one load scenario in a fresh namespace: deploy its manifests,
    /// wait for its pods, soak, and report metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the scenario namespace is still
    /// deleted on the happy path only (a failed run leaves it for
    /// inspection).
    pub async fn run_scenario(&self, scenario: &Scenario, prometheus_url: &str) -> Result<()> {
        let ns = format!("{}-{}", self.config.agent_namespace, scenario.name);
        info!(scenario = %scenario.name, namespace = %ns, "Running scenario");
        self.create_namespace(&ns).await?;

        for manifest_path in &scenario.manifests {
            manifest::apply_file(&self.client, &ns, manifest_path).await?;
            wait_for_pods_ready(
                &self.client,
                &ns,
                None,
                scenario.pod_count,
                SCENARIO_READY_TIMEOUT,
            )
            .await
            .with_context(|| format!("scenario {:?} pods not ready", scenario.name))?;
        }

        self.soak().await;
        metrics::report(
            prometheus_url,
            self.config.lookback,
            self.config.cluster_name.as_deref(),
        )
        .await?;

        self.delete_namespace(&ns).await
    }

    /// Full managed-cluster run: preconditions, optional agent and
    /// monitoring deployment, then every scenario in order.
    ///
    /// # Errors
    ///
    /// Fatal on the first failing step.
    pub async fn run_managed(&self) -> Result<()> {
        self.check_preconditions()?;

        if self.config.deploy_agent {
            self.deploy_agent().await?;
            self.deploy_monitoring(MONITORING_READY_PODS_MANAGED).await?;
            self.expose_prometheus().await?;
        }

        let prometheus_url = if self.config.deploy_agent {
            self.prometheus_url().await?
        } else {
            self.config.in_cluster_prometheus_url()
        };

        for scenario in default_scenarios(&self.config.manifest_dir) {
            self.run_scenario(&scenario, &prometheus_url).await?;
        }
        Ok(())
    }

    /// Full single-node run: deploy agent and monitoring, expose
    /// Prometheus, soak, and report the CPU rate.
    ///
    /// # Errors
    ///
    /// Fatal on the first failing step.
    pub async fn run_minikube(&self) -> Result<()> {
        self.deploy_agent_minikube().await?;
        self.deploy_monitoring(MONITORING_READY_PODS_MINIKUBE).await?;
        self.expose_prometheus().await?;

        self.soak().await;

        let url = minikube::service_url(
            &self.config.prometheus_service,
            &self.config.monitoring_namespace,
        )
        .await?;
        metrics::cpu_report(&url, self.config.lookback).await
    }
}
