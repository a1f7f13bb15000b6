//! Resolved circuit breaker configuration.
//!
//! A `CircuitBreakerConfig` is fully populated and validated; it is built
//! either programmatically through [`CircuitBreakerConfigBuilder`] or by the
//! resolver from merged configuration fragments. Once built it is never
//! mutated, only replaced.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::classify::{FailureClassifier, FailurePredicate};
use crate::breaker::clock::Clock;
use crate::breaker::state::CircuitState;
use crate::config::validation::{validate_config, ValidationError};
use crate::recorder::{CountWindow, OutcomeRecorder, TimeWindow};

pub const DEFAULT_FAILURE_RATE_THRESHOLD: f32 = 50.0;
pub const DEFAULT_SLOW_CALL_RATE_THRESHOLD: f32 = 100.0;
pub const DEFAULT_SLOW_CALL_DURATION_THRESHOLD: Duration = Duration::from_secs(60);
pub const DEFAULT_WINDOW_SIZE_CLOSED: u32 = 100;
pub const DEFAULT_WINDOW_SIZE_HALF_OPEN: u32 = 10;
pub const DEFAULT_MINIMUM_NUMBER_OF_CALLS: u32 = 100;
pub const DEFAULT_WAIT_DURATION_IN_OPEN_STATE: Duration = Duration::from_secs(60);
pub const DEFAULT_EVENT_CONSUMER_BUFFER_SIZE: usize = 100;

/// How the closed-state window is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlidingWindowType {
    /// Window size is a number of calls.
    #[default]
    CountBased,
    /// Window size is a number of seconds.
    TimeBased,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerConfig {
    /// Failure percentage at or above which the breaker opens.
    pub failure_rate_threshold: f32,
    /// Slow call percentage at or above which the breaker opens.
    pub slow_call_rate_threshold: f32,
    /// Calls running longer than this are counted as slow.
    pub slow_call_duration_threshold: Duration,
    pub sliding_window_type: SlidingWindowType,
    /// Calls (count based) or seconds (time based) in the closed window.
    pub window_size_closed: u32,
    /// Trial calls permitted, and evaluated, while half-open.
    pub window_size_half_open: u32,
    /// Calls required before rates are evaluated in the closed window.
    pub minimum_number_of_calls: u32,
    pub wait_duration_in_open_state: Duration,
    pub automatic_transition_from_open_to_half_open_enabled: bool,
    pub classifier: FailureClassifier,
    pub event_consumer_buffer_size: usize,
    pub register_health_indicator: bool,
    pub initial_state: CircuitState,
    /// Name of the shared configuration this one was derived from.
    pub configuration_name: Option<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: DEFAULT_FAILURE_RATE_THRESHOLD,
            slow_call_rate_threshold: DEFAULT_SLOW_CALL_RATE_THRESHOLD,
            slow_call_duration_threshold: DEFAULT_SLOW_CALL_DURATION_THRESHOLD,
            sliding_window_type: SlidingWindowType::CountBased,
            window_size_closed: DEFAULT_WINDOW_SIZE_CLOSED,
            window_size_half_open: DEFAULT_WINDOW_SIZE_HALF_OPEN,
            minimum_number_of_calls: DEFAULT_MINIMUM_NUMBER_OF_CALLS,
            wait_duration_in_open_state: DEFAULT_WAIT_DURATION_IN_OPEN_STATE,
            automatic_transition_from_open_to_half_open_enabled: false,
            classifier: FailureClassifier::default(),
            event_consumer_buffer_size: DEFAULT_EVENT_CONSUMER_BUFFER_SIZE,
            register_health_indicator: true,
            initial_state: CircuitState::Closed,
            configuration_name: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Fresh window for the Closed and MetricsOnly states.
    pub(crate) fn closed_window(&self, clock: &Arc<dyn Clock>) -> Arc<dyn OutcomeRecorder> {
        match self.sliding_window_type {
            SlidingWindowType::CountBased => Arc::new(CountWindow::new(
                self.window_size_closed,
                self.minimum_number_of_calls,
            )),
            SlidingWindowType::TimeBased => Arc::new(TimeWindow::new(
                self.window_size_closed,
                self.minimum_number_of_calls,
                clock.clone(),
            )),
        }
    }

    /// Fresh window for HalfOpen, evaluated once every trial call completed.
    pub(crate) fn half_open_window(&self) -> Arc<dyn OutcomeRecorder> {
        Arc::new(CountWindow::full(self.window_size_half_open))
    }
}

/// Builder for [`CircuitBreakerConfig`]; unset fields keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_duration_threshold = threshold;
        self
    }

    pub fn sliding_window_type(mut self, window_type: SlidingWindowType) -> Self {
        self.config.sliding_window_type = window_type;
        self
    }

    pub fn window_size_closed(mut self, size: u32) -> Self {
        self.config.window_size_closed = size;
        self
    }

    pub fn window_size_half_open(mut self, size: u32) -> Self {
        self.config.window_size_half_open = size;
        self
    }

    pub fn minimum_number_of_calls(mut self, calls: u32) -> Self {
        self.config.minimum_number_of_calls = calls;
        self
    }

    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    pub fn automatic_transition_from_open_to_half_open(mut self, enabled: bool) -> Self {
        self.config.automatic_transition_from_open_to_half_open_enabled = enabled;
        self
    }

    pub fn record_exceptions<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ignore = self.config.classifier.ignore_exceptions().to_vec();
        self.config.classifier = self.rebuild_classifier(
            kinds.into_iter().map(Into::into).collect(),
            ignore,
        );
        self
    }

    pub fn ignore_exceptions<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let record = self.config.classifier.record_exceptions().to_vec();
        self.config.classifier = self.rebuild_classifier(
            record,
            kinds.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn record_failure_predicate(
        mut self,
        name: impl Into<String>,
        predicate: FailurePredicate,
    ) -> Self {
        self.config.classifier = self.config.classifier.with_predicate(name, predicate);
        self
    }

    pub fn event_consumer_buffer_size(mut self, size: usize) -> Self {
        self.config.event_consumer_buffer_size = size;
        self
    }

    pub fn register_health_indicator(mut self, enabled: bool) -> Self {
        self.config.register_health_indicator = enabled;
        self
    }

    pub fn initial_state(mut self, state: CircuitState) -> Self {
        self.config.initial_state = state;
        self
    }

    pub fn configuration_name(mut self, name: impl Into<String>) -> Self {
        self.config.configuration_name = Some(name.into());
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<CircuitBreakerConfig, Vec<ValidationError>> {
        validate_config(&self.config)?;
        Ok(self.config)
    }

    fn rebuild_classifier(&self, record: Vec<String>, ignore: Vec<String>) -> FailureClassifier {
        let classifier = FailureClassifier::new(record, ignore);
        match (
            self.config.classifier.predicate_name(),
            self.config.classifier.predicate(),
        ) {
            (Some(name), Some(predicate)) => classifier.with_predicate(name, predicate),
            _ => classifier,
        }
    }
}
