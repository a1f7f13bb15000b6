//! Configuration schema definitions.
//!
//! This module defines the externalized settings: shared configuration
//! fragments, per-backend fragments and ambient options. All types derive
//! Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::breaker::config::SlidingWindowType;
use crate::breaker::state::CircuitState;

/// Name of the shared fragment every other fragment ultimately inherits from.
pub const DEFAULT_CONFIG_KEY: &str = "default";

/// Root settings for all circuit breakers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    /// Order of the breaker relative to other protective layers.
    /// Consumed by the interception layer, not by the breakers.
    pub circuit_breaker_aspect_order: i32,

    /// Shared fragments, keyed by configuration name.
    pub configs: HashMap<String, BackendProperties>,

    /// Per-backend fragments, keyed by backend name.
    pub backends: HashMap<String, BackendProperties>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            circuit_breaker_aspect_order: i32::MAX - 1,
            configs: HashMap::new(),
            backends: HashMap::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// A partially specified breaker configuration.
///
/// Unset fields are inherited from `base_config`, then from the `default`
/// shared fragment, then from the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(from = "RawBackendProperties")]
pub struct BackendProperties {
    pub failure_rate_threshold: Option<f32>,
    pub slow_call_rate_threshold: Option<f32>,
    pub slow_call_duration_threshold_ms: Option<u64>,
    pub sliding_window_type: Option<SlidingWindowType>,
    pub window_size_closed: Option<u32>,
    pub window_size_half_open: Option<u32>,
    pub minimum_number_of_calls: Option<u32>,
    pub wait_duration_in_open_state_ms: Option<u64>,
    pub automatic_transition_from_open_to_half_open_enabled: Option<bool>,
    /// Key of a predicate registered in the `PredicateRegistry`.
    pub record_failure_predicate: Option<String>,
    /// Error kinds always counted as failures.
    pub record_exceptions: Option<Vec<String>>,
    /// Error kinds never counted.
    pub ignore_exceptions: Option<Vec<String>>,
    pub event_consumer_buffer_size: Option<usize>,
    pub register_health_indicator: Option<bool>,
    pub initial_state: Option<CircuitState>,
    /// Shared fragment to inherit unset fields from.
    pub base_config: Option<String>,
}

impl BackendProperties {
    /// Fill every unset field from `base`. Fields set here always win;
    /// `base_config` is never inherited.
    pub fn inherit_from(mut self, base: &BackendProperties) -> Self {
        macro_rules! inherit {
            ($($field:ident),* $(,)?) => {
                $(
                    if self.$field.is_none() {
                        self.$field = base.$field.clone();
                    }
                )*
            };
        }
        inherit!(
            failure_rate_threshold,
            slow_call_rate_threshold,
            slow_call_duration_threshold_ms,
            sliding_window_type,
            window_size_closed,
            window_size_half_open,
            minimum_number_of_calls,
            wait_duration_in_open_state_ms,
            automatic_transition_from_open_to_half_open_enabled,
            record_failure_predicate,
            record_exceptions,
            ignore_exceptions,
            event_consumer_buffer_size,
            register_health_indicator,
            initial_state,
        );
        self
    }
}

/// On-disk shape of a fragment, including deprecated aliases.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBackendProperties {
    failure_rate_threshold: Option<f32>,
    slow_call_rate_threshold: Option<f32>,
    slow_call_duration_threshold_ms: Option<u64>,
    sliding_window_type: Option<SlidingWindowType>,
    window_size_closed: Option<u32>,
    window_size_half_open: Option<u32>,
    minimum_number_of_calls: Option<u32>,
    wait_duration_in_open_state_ms: Option<u64>,
    /// Deprecated alias of `wait_duration_in_open_state_ms`.
    wait_interval: Option<u64>,
    automatic_transition_from_open_to_half_open_enabled: Option<bool>,
    record_failure_predicate: Option<String>,
    record_exceptions: Option<Vec<String>>,
    ignore_exceptions: Option<Vec<String>>,
    event_consumer_buffer_size: Option<usize>,
    register_health_indicator: Option<bool>,
    initial_state: Option<CircuitState>,
    base_config: Option<String>,
}

impl From<RawBackendProperties> for BackendProperties {
    fn from(raw: RawBackendProperties) -> Self {
        let wait_duration_in_open_state_ms = match (raw.wait_duration_in_open_state_ms, raw.wait_interval) {
            (Some(ms), Some(_)) => {
                tracing::warn!("Both wait_duration_in_open_state_ms and deprecated wait_interval set, ignoring wait_interval");
                Some(ms)
            }
            (None, Some(ms)) => {
                tracing::warn!(wait_interval = ms, "wait_interval is deprecated, use wait_duration_in_open_state_ms");
                Some(ms)
            }
            (ms, None) => ms,
        };

        Self {
            failure_rate_threshold: raw.failure_rate_threshold,
            slow_call_rate_threshold: raw.slow_call_rate_threshold,
            slow_call_duration_threshold_ms: raw.slow_call_duration_threshold_ms,
            sliding_window_type: raw.sliding_window_type,
            window_size_closed: raw.window_size_closed,
            window_size_half_open: raw.window_size_half_open,
            minimum_number_of_calls: raw.minimum_number_of_calls,
            wait_duration_in_open_state_ms,
            automatic_transition_from_open_to_half_open_enabled: raw
                .automatic_transition_from_open_to_half_open_enabled,
            record_failure_predicate: raw.record_failure_predicate,
            record_exceptions: raw.record_exceptions,
            ignore_exceptions: raw.ignore_exceptions,
            event_consumer_buffer_size: raw.event_consumer_buffer_size,
            register_health_indicator: raw.register_health_indicator,
            initial_state: raw.initial_state,
            base_config: raw.base_config.filter(|name| !name.is_empty()),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
