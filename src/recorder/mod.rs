//! Outcome recording subsystem.
//!
//! # Data Flow
//! ```text
//! Completed call:
//!     → breaker classifies it (success/failure, slow or not)
//!     → OutcomeRecorder::record(outcome, duration)
//!     → running totals updated under a short critical section
//!     → Snapshot returned to the breaker for threshold evaluation
//!
//! Window variants:
//!     count.rs: ring buffer of the last N outcomes
//!     time.rs:  N one-second buckets, rotated as time advances
//! ```
//!
//! # Design Decisions
//! - Totals are maintained incrementally; no rescan per call
//! - `record` returns the snapshot taken under the same lock, so the
//!   evaluation that triggers a transition sees consistent counts
//! - Rates are `None` until the minimum number of calls is reached

pub mod count;
pub mod time;

use std::fmt;
use std::time::Duration;

pub use count::CountWindow;
pub use time::TimeWindow;

/// Outcome of a single completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    SlowSuccess,
    Failure,
    SlowFailure,
}

impl Outcome {
    /// Build an outcome from the call result and whether it ran too long.
    pub fn new(failed: bool, slow: bool) -> Self {
        match (failed, slow) {
            (false, false) => Outcome::Success,
            (false, true) => Outcome::SlowSuccess,
            (true, false) => Outcome::Failure,
            (true, true) => Outcome::SlowFailure,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Failure | Outcome::SlowFailure)
    }

    pub fn is_slow(self) -> bool {
        matches!(self, Outcome::SlowSuccess | Outcome::SlowFailure)
    }
}

/// Aggregated counters shared by both window variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Totals {
    pub calls: u32,
    pub failed: u32,
    pub slow: u32,
    pub slow_failed: u32,
    pub duration: Duration,
}

impl Totals {
    pub fn add(&mut self, outcome: Outcome, duration: Duration) {
        self.calls += 1;
        self.duration = self.duration.saturating_add(duration);
        if outcome.is_failure() {
            self.failed += 1;
        }
        if outcome.is_slow() {
            self.slow += 1;
        }
        if outcome == Outcome::SlowFailure {
            self.slow_failed += 1;
        }
    }

    pub fn remove(&mut self, other: &Totals) {
        self.calls = self.calls.saturating_sub(other.calls);
        self.failed = self.failed.saturating_sub(other.failed);
        self.slow = self.slow.saturating_sub(other.slow);
        self.slow_failed = self.slow_failed.saturating_sub(other.slow_failed);
        self.duration = self.duration.saturating_sub(other.duration);
    }
}

/// Point-in-time view of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    total_calls: u32,
    failed_calls: u32,
    slow_calls: u32,
    slow_failed_calls: u32,
    total_duration: Duration,
    minimum_calls: u32,
}

impl Snapshot {
    pub(crate) fn from_totals(totals: &Totals, minimum_calls: u32) -> Self {
        Self {
            total_calls: totals.calls,
            failed_calls: totals.failed,
            slow_calls: totals.slow,
            slow_failed_calls: totals.slow_failed,
            total_duration: totals.duration,
            minimum_calls,
        }
    }

    pub fn total_calls(&self) -> u32 {
        self.total_calls
    }

    pub fn failed_calls(&self) -> u32 {
        self.failed_calls
    }

    pub fn successful_calls(&self) -> u32 {
        self.total_calls - self.failed_calls
    }

    pub fn slow_calls(&self) -> u32 {
        self.slow_calls
    }

    pub fn slow_failed_calls(&self) -> u32 {
        self.slow_failed_calls
    }

    /// Whether enough calls were recorded for the rates to be meaningful.
    pub fn is_ready(&self) -> bool {
        self.total_calls > 0 && self.total_calls >= self.minimum_calls
    }

    /// Failure percentage, or `None` while there is not enough data.
    pub fn failure_rate(&self) -> Option<f32> {
        self.rate(self.failed_calls)
    }

    /// Slow call percentage, or `None` while there is not enough data.
    pub fn slow_call_rate(&self) -> Option<f32> {
        self.rate(self.slow_calls)
    }

    pub fn average_duration(&self) -> Duration {
        if self.total_calls == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.total_calls
    }

    fn rate(&self, count: u32) -> Option<f32> {
        if !self.is_ready() {
            return None;
        }
        Some(count as f32 * 100.0 / self.total_calls as f32)
    }
}

/// A bounded window of call outcomes.
///
/// Implementations must be safe to share between threads recording
/// concurrently.
pub trait OutcomeRecorder: Send + Sync + fmt::Debug {
    /// Record one outcome and return the window state right after it.
    fn record(&self, outcome: Outcome, duration: Duration) -> Snapshot;

    /// Current window state.
    fn snapshot(&self) -> Snapshot;

    /// Drop every recorded outcome.
    fn reset(&self);

    fn failure_rate(&self) -> Option<f32> {
        self.snapshot().failure_rate()
    }

    fn slow_call_rate(&self) -> Option<f32> {
        self.snapshot().slow_call_rate()
    }

    fn total_calls(&self) -> u32 {
        self.snapshot().total_calls()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_not_ready_until_minimum() {
        let mut totals = Totals::default();
        totals.add(Outcome::Failure, Duration::from_millis(10));
        let snapshot = Snapshot::from_totals(&totals, 2);
        assert!(!snapshot.is_ready());
        assert_eq!(snapshot.failure_rate(), None);

        totals.add(Outcome::SlowSuccess, Duration::from_millis(30));
        let snapshot = Snapshot::from_totals(&totals, 2);
        assert_eq!(snapshot.failure_rate(), Some(50.0));
        assert_eq!(snapshot.slow_call_rate(), Some(50.0));
        assert_eq!(snapshot.average_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_duration_total_saturates() {
        let mut totals = Totals::default();
        totals.add(Outcome::SlowSuccess, Duration::MAX);
        totals.add(Outcome::SlowFailure, Duration::MAX);
        assert_eq!(totals.duration, Duration::MAX);
        assert_eq!(totals.calls, 2);
        let snapshot = Snapshot::from_totals(&totals, 1);
        assert_eq!(snapshot.average_duration(), Duration::MAX / 2);
    }

    #[test]
    fn test_outcome_flags() {
        assert_eq!(Outcome::new(true, true), Outcome::SlowFailure);
        assert!(Outcome::SlowFailure.is_failure());
        assert!(Outcome::SlowFailure.is_slow());
        assert!(!Outcome::Success.is_slow());
    }
}
