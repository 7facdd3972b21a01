//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_requests_total` (counter): dispatch outcomes
//! - `balancer_request_duration_seconds` (histogram): time per client cycle
//! - `balancer_active_connections` (gauge): in-flight client connections
//! - `balancer_backend_healthy` (gauge): 1=healthy, 0=anything else
//! - `balancer_reconnect_attempts_total` (counter): connect attempts by result
//! - `balancer_membership_size` (gauge): identities in the last snapshot
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_dispatch(outcome: &'static str, start: Instant) {
    counter!("balancer_requests_total", "outcome" => outcome).increment(1);
    histogram!("balancer_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("balancer_backend_healthy", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_reconnect_attempt(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("balancer_reconnect_attempts_total", "result" => result).increment(1);
}

pub fn record_membership_size(size: usize) {
    gauge!("balancer_membership_size").set(size as f64);
}

pub fn record_active_connections(active: u64) {
    gauge!("balancer_active_connections").set(active as f64);
}
