//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (percentages, window sizes, wait duration)
//! - Reject states a breaker cannot start in
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CircuitBreakerConfig → Result<(), Vec<ValidationError>>
//! - Runs at resolution time, never on the call path

use std::fmt;
use std::time::Duration;

use crate::breaker::config::CircuitBreakerConfig;

pub const MIN_WAIT_DURATION_IN_OPEN_STATE: Duration = Duration::from_secs(1);

/// A single invalid field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_percentage(field: &'static str, value: f32, errors: &mut Vec<ValidationError>) {
    if !(1.0..=100.0).contains(&value) {
        errors.push(ValidationError::new(
            field,
            format!("must be between 1 and 100, got {}", value),
        ));
    }
}

fn check_positive(field: &'static str, value: u64, errors: &mut Vec<ValidationError>) {
    if value < 1 {
        errors.push(ValidationError::new(field, "must be at least 1"));
    }
}

pub fn validate_config(config: &CircuitBreakerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_percentage("failure_rate_threshold", config.failure_rate_threshold, &mut errors);
    check_percentage("slow_call_rate_threshold", config.slow_call_rate_threshold, &mut errors);
    check_positive("window_size_closed", u64::from(config.window_size_closed), &mut errors);
    check_positive("window_size_half_open", u64::from(config.window_size_half_open), &mut errors);
    check_positive(
        "minimum_number_of_calls",
        u64::from(config.minimum_number_of_calls),
        &mut errors,
    );

    if config.wait_duration_in_open_state < MIN_WAIT_DURATION_IN_OPEN_STATE {
        errors.push(ValidationError::new(
            "wait_duration_in_open_state",
            format!(
                "must be at least 1s, got {}ms",
                config.wait_duration_in_open_state.as_millis()
            ),
        ));
    }

    check_positive(
        "event_consumer_buffer_size",
        config.event_consumer_buffer_size as u64,
        &mut errors,
    );

    if !config.initial_state.is_valid_initial() {
        errors.push(ValidationError::new(
            "initial_state",
            format!("a breaker cannot start in {}", config.initial_state),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
