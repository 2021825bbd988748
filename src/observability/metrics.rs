//! Metrics collection and exposition.
//!
//! # Metrics
//! - `voice_connections_active` (gauge): connected guilds right now
//! - `voice_reconnects_scheduled_total` (counter): reconnect attempts armed
//! - `voice_circuit_opened_total` (counter): circuit breaker open events
//! - `voice_heartbeat_misses_total` (counter): heartbeat roster mismatches
//! - `voice_joins_total` (counter): successful joins, by kind (fresh/restore)
//!
//! # Design Decisions
//! - The `metrics` facade is always recorded into; without an installed
//!   exporter the calls are no-ops, so library users pay nothing
//! - Exposition is Prometheus over HTTP, enabled by config

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);

    match builder.install() {
        Ok(()) => {
            tracing::info!(address = %addr, "Metrics exporter listening");
            describe_metrics();
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install metrics exporter");
        }
    }
}

fn describe_metrics() {
    describe_gauge!(
        "voice_connections_active",
        "Number of guilds with a live voice connection"
    );
    describe_counter!(
        "voice_reconnects_scheduled_total",
        "Reconnect attempts armed"
    );
    describe_counter!(
        "voice_circuit_opened_total",
        "Circuit breaker open transitions"
    );
    describe_counter!(
        "voice_heartbeat_misses_total",
        "Heartbeat probes that found the wrong channel"
    );
    describe_counter!("voice_joins_total", "Successful voice joins");
}

/// Record the current number of active connections.
pub fn record_active_connections(count: usize) {
    gauge!("voice_connections_active").set(count as f64);
}

/// Record that a reconnect attempt was armed.
pub fn record_reconnect_scheduled() {
    counter!("voice_reconnects_scheduled_total").increment(1);
}

/// Record a circuit breaker open transition.
pub fn record_circuit_opened() {
    counter!("voice_circuit_opened_total").increment(1);
}

/// Record a heartbeat roster mismatch.
pub fn record_heartbeat_miss() {
    counter!("voice_heartbeat_misses_total").increment(1);
}

/// Record a successful join. `kind` is "fresh", "restore" or "reconnect".
pub fn record_join(kind: &'static str) {
    counter!("voice_joins_total", "kind" => kind).increment(1);
}
