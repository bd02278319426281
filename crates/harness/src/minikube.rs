//! Minikube cluster lifecycle.
//!
//! Single-node runs own the whole cluster lifecycle: the harness refuses to
//! reuse a running minikube (its state would be unknown), starts a fresh one
//! with the CNI network plugin, and deletes it when the run completes.

use anyhow::{Context, Result};
use tracing::info;

use crate::run;

/// Whether a minikube cluster is currently running.
///
/// # Errors
///
/// Returns an error if the minikube binary cannot be spawned.
pub async fn is_running() -> Result<bool> {
    run::command_succeeds("minikube", &["status"]).await
}

/// Start a fresh minikube with CNI networking, as the agent requires.
///
/// # Errors
///
/// Returns an error if minikube fails to start.
pub async fn start() -> Result<()> {
    info!("Starting minikube");
    run::command("minikube", &["start", "--network-plugin=cni"])
        .await
        .context("failed to start minikube")
}

/// Delete the minikube cluster.
///
/// # Errors
///
/// Returns an error if minikube fails to delete.
pub async fn delete() -> Result<()> {
    info!("Deleting minikube");
    run::command("minikube", &["delete"])
        .await
        .context("failed to delete minikube")
}

/// Resolve the externally reachable URL of a NodePort service.
///
/// # Errors
///
/// Returns an error if the minikube helper fails.
pub async fn service_url(service: &str, namespace: &str) -> Result<String> {
    run::command_output("minikube", &["service", service, "--url", "-n", namespace])
        .await
        .with_context(|| format!("failed to resolve URL of service {service:?} in {namespace:?}"))
}
