//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): finished requests by vhost, status
//! - `proxy_request_duration_seconds` (histogram): request latency by vhost
//! - `proxy_active_connections` (gauge): open client connections
//! - `proxy_backend_health` (gauge): 1=alive, 0=dead, per host
//! - `proxy_queue_rejections_total` (counter): admission rejections by vhost
//! - `proxy_retries_total` (counter): forwarding failures by vhost and class
//!
//! All recorders are no-ops until `init_metrics` installs the exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(vhost: &str, status: u16, elapsed: Duration) {
    counter!(
        "proxy_requests_total",
        "vhost" => vhost.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "vhost" => vhost.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_queue_rejection(vhost: &str) {
    counter!("proxy_queue_rejections_total", "vhost" => vhost.to_string()).increment(1);
}

pub fn record_retry(vhost: &str, class: &'static str) {
    counter!("proxy_retries_total", "vhost" => vhost.to_string(), "class" => class).increment(1);
}

pub fn set_backend_health(host_id: &str, alive: bool) {
    gauge!("proxy_backend_health", "host" => host_id.to_string()).set(if alive { 1.0 } else { 0.0 });
}

pub fn connection_opened() {
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}
