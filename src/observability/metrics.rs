//! Metrics collection and exposition.
//!
//! # Metrics
//! - `breaker_calls_total` (counter): recorded calls by breaker, kind
//! - `breaker_not_permitted_calls_total` (counter): rejected calls by breaker
//! - `breaker_state_transitions_total` (counter): transitions by breaker, from, to
//! - `breaker_state` (gauge): numeric state code (0=closed .. 5=metrics_only)
//! - `breaker_failure_rate` / `breaker_slow_call_rate` (gauge): last evaluated rates
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter is installed by the binary only

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::breaker::state::CircuitState;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_call(breaker: &str, kind: &'static str) {
    counter!("breaker_calls_total", "breaker" => breaker.to_string(), "kind" => kind).increment(1);
}

pub fn record_not_permitted(breaker: &str) {
    counter!("breaker_not_permitted_calls_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "breaker_state_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_state(breaker, to);
}

pub fn record_state(breaker: &str, state: CircuitState) {
    gauge!("breaker_state", "breaker" => breaker.to_string()).set(f64::from(state as u8));
}

pub fn record_rates(breaker: &str, failure_rate: Option<f32>, slow_call_rate: Option<f32>) {
    if let Some(rate) = failure_rate {
        gauge!("breaker_failure_rate", "breaker" => breaker.to_string()).set(f64::from(rate));
    }
    if let Some(rate) = slow_call_rate {
        gauge!("breaker_slow_call_rate", "breaker" => breaker.to_string()).set(f64::from(rate));
    }
}
