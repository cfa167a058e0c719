//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cluster_agent_shutdowns_total` (counter): shutdowns by outcome (graceful, forced)
//! - `cluster_agent_shutdown_hooks_total` (counter): hook outcomes by service, status
//! - `cluster_agent_in_flight_connections` (gauge): connections being served
//! - `cluster_agent_serving` (gauge): 1=serving, 0=not serving
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op
//! - Prometheus exporter is opt-in

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_counter!(
        "cluster_agent_shutdowns_total",
        "Completed shutdowns by outcome"
    );
    metrics::describe_counter!(
        "cluster_agent_shutdown_hooks_total",
        "Subsystem shutdown hook outcomes"
    );
    metrics::describe_gauge!(
        "cluster_agent_in_flight_connections",
        "Connections currently being served"
    );
    metrics::describe_gauge!("cluster_agent_serving", "Overall serving status");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a completed shutdown. `outcome` is `graceful` or `forced`.
pub fn record_shutdown(outcome: &'static str) {
    metrics::counter!("cluster_agent_shutdowns_total", "outcome" => outcome).increment(1);
}

/// Record one subsystem hook outcome.
pub fn record_hook_outcome(service: &str, status: &'static str) {
    metrics::counter!(
        "cluster_agent_shutdown_hooks_total",
        "service" => service.to_string(),
        "status" => status
    )
    .increment(1);
}

pub fn set_in_flight_connections(count: u64) {
    metrics::gauge!("cluster_agent_in_flight_connections").set(count as f64);
}

pub fn set_serving(serving: bool) {
    metrics::gauge!("cluster_agent_serving").set(if serving { 1.0 } else { 0.0 });
}
