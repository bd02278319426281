//! Prometheus range queries and the usage report.
//!
//! Thin client over the Prometheus HTTP API (`/api/v1/query_range`). The
//! harness evaluates a fixed list of aggregate expressions over the soak
//! window and prints the raw series; it asserts nothing. Thresholding is a
//! human (or downstream tooling) concern.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

/// Per-call timeout for query evaluation.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Range-query step.
const QUERY_STEP_SECONDS: u64 = 60;

/// Agent metrics sampled by the report.
pub const AGENT_METRICS: &[&str] = &[
    // Total user and system CPU time spent, in seconds.
    "cilium_process_cpu_seconds_total",
    // Virtual memory size in bytes.
    "cilium_process_virtual_memory_bytes",
    // Resident memory size in bytes.
    "cilium_process_resident_memory_bytes",
    // Duration of the agent bootstrap sequence.
    "cilium_agent_bootstrap_seconds",
    // BPF maps kernel max memory usage in bytes.
    "cilium_bpf_maps_virtual_memory_max_bytes",
    // BPF programs kernel max memory usage in bytes.
    "cilium_bpf_progs_virtual_memory_max_bytes",
    // Endpoint regeneration time stats, labeled by scope.
    "cilium_endpoint_regeneration_time_stats_seconds",
    // Policy regeneration time stats, labeled by scope.
    "cilium_policy_regeneration_time_stats_seconds",
];

/// Aggregations applied to each metric.
const AGGREGATIONS: &[&str] = &["min", "max", "avg"];

/// CPU usage as a percentage, from the monitoring stack's own dashboards.
pub const CPU_RATE_EXPR: &str = "max(irate(cilium_process_cpu_seconds_total[1m]))*100";

/// Build the label selector scoping queries to the agent, optionally pinned
/// to one cluster.
#[must_use]
pub fn agent_selector(cluster_name: Option<&str>) -> String {
    match cluster_name {
        Some(name) => format!("{{k8s_app=\"cilium\",test_cluster_name=\"{name}\"}}"),
        None => "{k8s_app=\"cilium\"}".to_string(),
    }
}

/// The full expression list for a report: metrics x aggregations, in
/// declaration order.
#[must_use]
pub fn aggregate_exprs(cluster_name: Option<&str>) -> Vec<String> {
    let selector = agent_selector(cluster_name);
    let mut exprs = Vec::with_capacity(AGENT_METRICS.len() * AGGREGATIONS.len());
    for metric in AGENT_METRICS {
        for op in AGGREGATIONS {
            exprs.push(format!("{op}({metric}{selector})"));
        }
    }
    exprs
}

/// One time series in a matrix result.
#[derive(Debug, Deserialize)]
pub struct Series {
    pub metric: BTreeMap<String, String>,
    /// `[timestamp, value]` pairs; Prometheus encodes values as strings.
    pub values: Vec<(f64, String)>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    data: Option<QueryData>,
    error: Option<String>,
}

/// Client for the Prometheus HTTP query API.
pub struct PromClient {
    http: reqwest::Client,
    base_url: String,
}

impl PromClient {
    /// Create a client against a Prometheus base URL (no trailing slash
    /// required).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Evaluate `expr` over `[now - lookback, now]` at a 1-minute step.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or a
    /// Prometheus-level error response.
    pub async fn query_range(&self, expr: &str, lookback: Duration) -> Result<Vec<Series>> {
        let end = Utc::now().timestamp();
        let start = end - i64::try_from(lookback.as_secs()).unwrap_or(i64::MAX);
        let url = format!("{}/api/v1/query_range", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", expr),
                ("start", &start.to_string()),
                ("end", &end.to_string()),
                ("step", &QUERY_STEP_SECONDS.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("range query {expr:?} failed"))?
            .error_for_status()
            .with_context(|| format!("range query {expr:?} rejected"))?;

        let body: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("failed to decode response for {expr:?}"))?;

        if body.status != "success" {
            anyhow::bail!(
                "range query {expr:?} returned status {:?}: {}",
                body.status,
                body.error.unwrap_or_default()
            );
        }

        let data = body
            .data
            .with_context(|| format!("range query {expr:?} returned no data section"))?;
        if data.result_type != "matrix" {
            anyhow::bail!(
                "range query {expr:?} returned {:?}, expected a matrix",
                data.result_type
            );
        }
        Ok(data.result)
    }
}

fn print_series(expr: &str, series: &[Series]) {
    println!("{expr}:");
    if series.is_empty() {
        println!("  (no data)");
        return;
    }
    for s in series {
        let labels: Vec<String> = s
            .metric
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect();
        println!("  {{{}}}", labels.join(","));
        for (ts, value) in &s.values {
            println!("    {ts} {value}");
        }
    }
}

/// Run the full aggregate report against Prometheus and print it.
///
/// # Errors
///
/// Fails on the first query that cannot be evaluated.
pub async fn report(base_url: &str, lookback: Duration, cluster_name: Option<&str>) -> Result<()> {
    info!(base_url, ?lookback, "Querying agent metrics");
    let client = PromClient::new(base_url)?;

    println!("Results:");
    for expr in aggregate_exprs(cluster_name) {
        let series = client.query_range(&expr, lookback).await?;
        print_series(&expr, &series);
    }
    Ok(())
}

/// Print the CPU-rate report used by single-node runs.
///
/// # Errors
///
/// Fails if the query cannot be evaluated.
pub async fn cpu_report(base_url: &str, lookback: Duration) -> Result<()> {
    info!(base_url, ?lookback, "Querying agent CPU rate");
    let client = PromClient::new(base_url)?;
    let series = client.query_range(CPU_RATE_EXPR, lookback).await?;
    println!("Result:");
    print_series(CPU_RATE_EXPR, &series);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_selector_without_cluster_name() {
        assert_eq!(agent_selector(None), r#"{k8s_app="cilium"}"#);
    }

    #[test]
    fn test_selector_with_cluster_name() {
        assert_eq!(
            agent_selector(Some("perf-1")),
            r#"{k8s_app="cilium",test_cluster_name="perf-1"}"#
        );
    }

    #[test]
    fn test_aggregate_exprs_cover_all_metrics_in_order() {
        let exprs = aggregate_exprs(None);
        assert_eq!(exprs.len(), AGENT_METRICS.len() * 3);
        assert_eq!(
            exprs[0],
            r#"min(cilium_process_cpu_seconds_total{k8s_app="cilium"})"#
        );
        assert_eq!(
            exprs[1],
            r#"max(cilium_process_cpu_seconds_total{k8s_app="cilium"})"#
        );
        assert_eq!(
            exprs[2],
            r#"avg(cilium_process_cpu_seconds_total{k8s_app="cilium"})"#
        );
        // Last metric, last aggregation.
        assert_eq!(
            exprs.last().unwrap(),
            &r#"avg(cilium_policy_regeneration_time_stats_seconds{k8s_app="cilium"})"#.to_string()
        );
    }

    #[tokio::test]
    async fn test_query_range_decodes_matrix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .and(query_param("query", "up"))
            .and(query_param("step", "60"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "resultType": "matrix",
                    "result": [{
                        "metric": {"k8s_app": "cilium"},
                        "values": [[1700000000.0, "1"], [1700000060.0, "1"]]
                    }]
                }
            })))
            .mount(&server)
            .await;

        let client = PromClient::new(&server.uri()).unwrap();
        let series = client
            .query_range("up", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].metric["k8s_app"], "cilium");
        assert_eq!(series[0].values.len(), 2);
        assert_eq!(series[0].values[0].1, "1");
    }

    #[tokio::test]
    async fn test_query_range_surfaces_prometheus_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "error": "parse error at char 3"
            })))
            .mount(&server)
            .await;

        let client = PromClient::new(&server.uri()).unwrap();
        let err = client
            .query_range("up{", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn test_query_range_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = PromClient::new(&server.uri()).unwrap();
        assert!(client
            .query_range("up", Duration::from_secs(60))
            .await
            .is_err());
    }
}
