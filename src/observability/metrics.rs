//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_sessions_total` (counter): SSH connections accepted
//! - `bridge_active_sessions` (gauge): live SSH connections
//! - `bridge_session_duration_seconds` (histogram): connection lifetimes
//! - `bridge_handshake_failures_total` (counter)
//! - `bridge_channels_rejected_total` (counter): by channel type
//! - `bridge_channels_total` (counter): by outcome
//! - `bridge_channel_duration_seconds` (histogram): by outcome
//! - `bridge_bytes_relayed_total` (counter): body bytes written back
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_session_opened() {
    counter!("bridge_sessions_total").increment(1);
    gauge!("bridge_active_sessions").increment(1.0);
}

pub fn record_session_closed(opened_at: Instant) {
    gauge!("bridge_active_sessions").decrement(1.0);
    histogram!("bridge_session_duration_seconds").record(opened_at.elapsed().as_secs_f64());
}

pub fn record_handshake_failure() {
    counter!("bridge_handshake_failures_total").increment(1);
}

pub fn record_channel_rejected(channel_type: &'static str) {
    counter!("bridge_channels_rejected_total", "channel_type" => channel_type).increment(1);
}

pub fn record_channel(outcome: &'static str, started: Instant) {
    counter!("bridge_channels_total", "outcome" => outcome).increment(1);
    histogram!("bridge_channel_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_bytes_relayed(bytes: usize) {
    counter!("bridge_bytes_relayed_total").increment(bytes as u64);
}
