//! Breaker states and the immutable per-state record swapped on transition.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::breaker::config::CircuitBreakerConfig;
use crate::recorder::OutcomeRecorder;

/// State of a circuit breaker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through and are recorded.
    Closed = 0,
    /// Backend assumed down, calls are rejected.
    Open = 1,
    /// A bounded number of trial calls decide between Closed and Open.
    HalfOpen = 2,
    /// Calls pass through, nothing is recorded.
    Disabled = 3,
    /// Calls are always rejected until an operator changes the state.
    ForcedOpen = 4,
    /// Calls pass through and are evaluated, but never rejected.
    MetricsOnly = 5,
}

impl CircuitState {
    pub const ALL: [CircuitState; 6] = [
        CircuitState::Closed,
        CircuitState::Open,
        CircuitState::HalfOpen,
        CircuitState::Disabled,
        CircuitState::ForcedOpen,
        CircuitState::MetricsOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::Disabled => "DISABLED",
            CircuitState::ForcedOpen => "FORCED_OPEN",
            CircuitState::MetricsOnly => "METRICS_ONLY",
        }
    }

    /// Whether calls made in this state feed the outcome window.
    pub fn records_outcomes(self) -> bool {
        !matches!(self, CircuitState::Disabled | CircuitState::ForcedOpen)
    }

    /// States a breaker may be constructed in.
    pub fn is_valid_initial(self) -> bool {
        matches!(
            self,
            CircuitState::Closed
                | CircuitState::Disabled
                | CircuitState::ForcedOpen
                | CircuitState::MetricsOnly
        )
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that changes together on a transition.
///
/// Never mutated after publication except for the half-open permit counter;
/// a transition builds a new record and swaps it in atomically.
#[derive(Debug)]
pub(crate) struct StateRecord {
    pub state: CircuitState,
    pub config: Arc<CircuitBreakerConfig>,
    pub recorder: Arc<dyn OutcomeRecorder>,
    /// When the breaker entered Open (Open only).
    pub opened_at: Option<Instant>,
    /// Remaining trial calls (HalfOpen only).
    pub permits: AtomicU32,
    /// Incremented on every swap; identifies a specific Open period.
    pub epoch: u64,
}

impl StateRecord {
    /// Take one half-open permit, if any are left.
    pub fn try_take_permit(&self) -> bool {
        let mut prev = self.permits.load(Ordering::Relaxed);
        loop {
            if prev == 0 {
                return false;
            }
            match self.permits.compare_exchange_weak(
                prev,
                prev - 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => prev = x,
            }
        }
    }

    /// Hand back a half-open slot taken from this record, never exceeding the
    /// half-open budget it started with.
    pub fn return_permit(&self) -> bool {
        let budget = self.config.window_size_half_open;
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |p| (p < budget).then(|| p + 1))
            .is_ok()
    }
}
