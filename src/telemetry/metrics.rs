//! Prometheus metrics export

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    info!("Prometheus metrics server started on {}", addr);
    Ok(())
}

fn register_metrics() {
    // Connection metrics
    describe_counter!("spv_client_connect_attempts_total", "Connection attempts made by the failover loop");
    describe_counter!("spv_client_connect_failures_total", "Connection attempts that failed");
    describe_gauge!("spv_client_connected", "Whether a server connection is currently established");

    // RPC metrics
    describe_counter!("spv_client_rpc_requests_total", "RPC requests sent");
    describe_counter!("spv_client_rpc_failures_total", "RPC requests that resolved with an error");
    describe_histogram!("spv_client_rpc_latency_ms", "RPC round-trip latency");

    // Subscription metrics
    describe_counter!("spv_client_notifications_total", "Server push notifications dispatched");
    describe_counter!("spv_client_notifications_dropped_total", "Server pushes for unrecognized methods");
}

pub fn record_connect_attempt() {
    counter!("spv_client_connect_attempts_total").increment(1);
}

pub fn record_connect_failure() {
    counter!("spv_client_connect_failures_total").increment(1);
}

pub fn record_connection_status(connected: bool) {
    gauge!("spv_client_connected").set(if connected { 1.0 } else { 0.0 });
}

pub fn record_rpc_request() {
    counter!("spv_client_rpc_requests_total").increment(1);
}

pub fn record_rpc_failure() {
    counter!("spv_client_rpc_failures_total").increment(1);
}

pub fn record_rpc_latency(latency_ms: f64) {
    histogram!("spv_client_rpc_latency_ms").record(latency_ms);
}

pub fn record_notification() {
    counter!("spv_client_notifications_total").increment(1);
}

pub fn record_notification_dropped() {
    counter!("spv_client_notifications_dropped_total").increment(1);
}
