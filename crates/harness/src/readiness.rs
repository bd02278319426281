//! Pod readiness polling.
//!
//! The driver needs exactly one readiness primitive: block until at least N
//! pods in a namespace (optionally label-filtered) report the `Ready`
//! condition, or give up after a bounded timeout. Polling interval is fixed;
//! there is no backoff and no retry beyond the timeout itself.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Poll interval between pod list calls.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("timed out after {timeout:?} waiting for {expected} ready pods in {namespace:?} (last observed: {observed})")]
    Timeout {
        namespace: String,
        expected: usize,
        observed: usize,
        timeout: Duration,
    },

    #[error("failed to list pods in {namespace:?}: {source}")]
    List {
        namespace: String,
        #[source]
        source: kube::Error,
    },
}

/// Whether a pod reports the `Ready` condition with status `True`.
#[must_use]
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Count ready pods in a list.
#[must_use]
pub fn ready_count(pods: &[Pod]) -> usize {
    pods.iter().filter(|p| is_pod_ready(p)).count()
}

/// Wait until at least `expected` pods in `namespace` are ready.
///
/// An `expected` of zero returns immediately after one successful list call.
///
/// # Errors
///
/// Returns [`ReadinessError::Timeout`] when the deadline elapses, or
/// [`ReadinessError::List`] if the pod list call itself fails.
pub async fn wait_for_pods_ready(
    client: &Client,
    namespace: &str,
    label_selector: Option<&str>,
    expected: usize,
    timeout: Duration,
) -> Result<(), ReadinessError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let mut lp = ListParams::default();
    if let Some(labels) = label_selector {
        lp = lp.labels(labels);
    }

    info!(namespace, expected, ?timeout, "Waiting for pods to become ready");
    let deadline = Instant::now() + timeout;

    loop {
        let list = pods.list(&lp).await.map_err(|source| ReadinessError::List {
            namespace: namespace.to_string(),
            source,
        })?;
        let observed = ready_count(&list.items);
        if observed >= expected {
            info!(namespace, observed, "Pods ready");
            return Ok(());
        }
        debug!(namespace, observed, expected, "Pods not ready yet");

        if Instant::now() + POLL_INTERVAL > deadline {
            return Err(ReadinessError::Timeout {
                namespace: namespace.to_string(),
                expected,
                observed,
                timeout,
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn pod_with_conditions(conditions: Vec<PodCondition>) -> Pod {
        Pod {
            status: Some(PodStatus {
                conditions: Some(conditions),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    fn condition(type_: &str, status: &str) -> PodCondition {
        PodCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..PodCondition::default()
        }
    }

    #[test]
    fn test_pod_without_status_is_not_ready() {
        assert!(!is_pod_ready(&Pod::default()));
    }

    #[test]
    fn test_pod_with_ready_condition_true() {
        let pod = pod_with_conditions(vec![
            condition("PodScheduled", "True"),
            condition("Ready", "True"),
        ]);
        assert!(is_pod_ready(&pod));
    }

    #[test]
    fn test_pod_with_ready_condition_false() {
        let pod = pod_with_conditions(vec![condition("Ready", "False")]);
        assert!(!is_pod_ready(&pod));
    }

    #[test]
    fn test_ready_count() {
        let pods = vec![
            pod_with_conditions(vec![condition("Ready", "True")]),
            pod_with_conditions(vec![condition("Ready", "False")]),
            Pod::default(),
            pod_with_conditions(vec![condition("Ready", "True")]),
        ];
        assert_eq!(ready_count(&pods), 2);
    }
}
