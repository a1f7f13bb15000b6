//! Circuit breaker state machine.
//!
//! # States
//! - Closed: normal operation, outcomes recorded in the closed window
//! - Open: calls rejected until the wait duration elapsed
//! - Half-Open: a bounded number of trial calls decide the next state
//! - Disabled / Forced-Open / Metrics-Only: operator-held, never left on
//!   outcomes alone
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      window ready and failure or slow rate ≥ threshold
//! Open      → Half-Open: wait duration elapsed (on next permission check,
//!                        or on a timer when automatic transition is enabled)
//! Half-Open → Closed:    every trial call completed, both rates below threshold
//! Half-Open → Open:      every trial call completed, either rate ≥ threshold
//! any       → any:       explicit operator action
//! ```
//!
//! # Design Decisions
//! - State, configuration and active window live in one immutable record
//!   behind an `ArcSwap`; a transition is a compare-and-swap of that record,
//!   so concurrent callers either see the old record or the complete new one
//!   and a crossing observed by many threads transitions exactly once
//! - No thread is owned by a breaker; all work runs on the caller

pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod permit;
pub mod state;

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

pub use classify::{CallError, Classification, FailureClassifier, PredicateRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, SlidingWindowType};
pub use error::{BreakerError, CallNotPermitted, IllegalStateTransition};
pub use events::BreakerEvent;
pub use permit::CallPermit;
pub use state::CircuitState;

use crate::observability::metrics;
use crate::recorder::{Outcome, Snapshot};
use events::EventPublisher;
use state::StateRecord;

/// Result of comparing a window snapshot against the thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Verdict {
    NotEnoughCalls,
    BelowThresholds,
    FailureRateExceeded(f32),
    SlowCallRateExceeded(f32),
}

impl Verdict {
    fn evaluate(snapshot: &Snapshot, config: &CircuitBreakerConfig) -> Self {
        let (Some(failure_rate), Some(slow_rate)) =
            (snapshot.failure_rate(), snapshot.slow_call_rate())
        else {
            return Verdict::NotEnoughCalls;
        };
        if failure_rate >= config.failure_rate_threshold {
            Verdict::FailureRateExceeded(failure_rate)
        } else if slow_rate >= config.slow_call_rate_threshold {
            Verdict::SlowCallRateExceeded(slow_rate)
        } else {
            Verdict::BelowThresholds
        }
    }
}

struct Inner {
    name: String,
    record: ArcSwap<StateRecord>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
}

/// Handle to a named circuit breaker. Clones share the same breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let config = Arc::new(config);
        let events = EventPublisher::new(config.event_consumer_buffer_size);
        let initial = config.initial_state;
        let record = build_record(initial, config, &clock, 0);
        metrics::record_state(&name, initial);
        let breaker = Self {
            inner: Arc::new(Inner {
                name,
                record: ArcSwap::from_pointee(record),
                clock,
                events,
            }),
        };
        breaker.schedule_if_open(&breaker.inner.record.load());
        breaker
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.inner.record.load().config.clone()
    }

    /// Current state, applying a due automatic Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        let current = self.inner.record.load_full();
        if current.state == CircuitState::Open
            && current
                .config
                .automatic_transition_from_open_to_half_open_enabled
            && self.wait_elapsed(&current)
        {
            self.transition(&current, CircuitState::HalfOpen);
            return self.inner.record.load().state;
        }
        current.state
    }

    /// Counters of the active window.
    pub fn metrics(&self) -> Snapshot {
        self.inner.record.load().recorder.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.inner.events.subscribe()
    }

    /// Decide whether a call may proceed.
    ///
    /// The returned permit records the outcome against the state it was
    /// granted in; dropping it unused hands a half-open slot back.
    pub fn try_acquire_permission(&self) -> Result<CallPermit, CallNotPermitted> {
        loop {
            let current = self.inner.record.load_full();
            match current.state {
                CircuitState::Closed | CircuitState::MetricsOnly | CircuitState::Disabled => {
                    return Ok(CallPermit::new(self.clone(), current, false))
                }
                CircuitState::HalfOpen => {
                    if current.try_take_permit() {
                        return Ok(CallPermit::new(self.clone(), current, true));
                    }
                    return Err(self.reject(&current, None));
                }
                CircuitState::Open => {
                    if self.wait_elapsed(&current) {
                        // Lost races are fine: re-read whatever won.
                        self.transition(&current, CircuitState::HalfOpen);
                        continue;
                    }
                    let retry_after = self.remaining_wait(&current);
                    return Err(self.reject(&current, retry_after));
                }
                CircuitState::ForcedOpen => return Err(self.reject(&current, None)),
            }
        }
    }

    /// Record a successful call made without a permit, against the
    /// current state.
    pub fn on_success(&self, duration: Duration) {
        self.record(&self.inner.record.load_full(), duration, false, None);
    }

    /// Record a call made without a permit that ended with `error`,
    /// classified by the current configuration.
    pub fn on_failure(&self, duration: Duration, error: &dyn CallError) {
        self.record_error(&self.inner.record.load_full(), duration, error);
    }

    /// Report an error that is not counted at all. Half-open slots are only
    /// returned through [`CallPermit`].
    pub fn on_ignored_error(&self, duration: Duration, error: &dyn CallError) {
        self.ignore(&self.inner.record.load_full(), duration, error);
    }

    /// Operator-driven transition to any state.
    pub fn transition_to(&self, to: CircuitState) -> Result<(), IllegalStateTransition> {
        loop {
            let current = self.inner.record.load_full();
            if current.state == to {
                return Err(IllegalStateTransition {
                    name: self.inner.name.clone(),
                    state: to,
                });
            }
            if self.transition(&current, to) {
                return Ok(());
            }
        }
    }

    /// Back to Closed with an empty window.
    pub fn reset(&self) {
        let current = self.inner.record.load();
        let record = build_record(
            CircuitState::Closed,
            current.config.clone(),
            &self.inner.clock,
            current.epoch + 1,
        );
        let previous = self.inner.record.swap(Arc::new(record));
        tracing::info!(breaker = %self.inner.name, previous_state = %previous.state, "Circuit breaker reset");
        metrics::record_state(&self.inner.name, CircuitState::Closed);
        self.inner.events.publish(|| BreakerEvent::Reset {
            name: self.inner.name.clone(),
        });
    }

    /// Replace the configuration and window in one swap, keeping the state.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let config = Arc::new(config);
        let previous = self.inner.record.rcu(|current| {
            let mut record =
                build_record(current.state, config.clone(), &self.inner.clock, current.epoch + 1);
            record.opened_at = current.opened_at;
            record
        });
        tracing::info!(
            breaker = %self.inner.name,
            state = %previous.state,
            configuration = ?config.configuration_name,
            "Circuit breaker reconfigured"
        );
        self.schedule_if_open(&self.inner.record.load());
    }

    /// Run `f` through the breaker, timing it with the breaker's clock.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: CallError,
    {
        let permit = self.try_acquire_permission()?;
        let start = self.inner.clock.now();
        let result = f();
        self.complete(permit, start, result)
    }

    pub async fn call_async<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CallError,
    {
        // A dropped future drops the permit, which frees its half-open slot.
        let permit = self.try_acquire_permission()?;
        let start = self.inner.clock.now();
        let result = f().await;
        self.complete(permit, start, result)
    }

    fn complete<T, E: CallError>(
        &self,
        permit: CallPermit,
        start: std::time::Instant,
        result: Result<T, E>,
    ) -> Result<T, BreakerError<E>> {
        let duration = self.inner.clock.now().saturating_duration_since(start);
        match result {
            Ok(value) => {
                permit.on_success(duration);
                Ok(value)
            }
            Err(e) => {
                permit.on_failure(duration, &e);
                Err(BreakerError::Call(e))
            }
        }
    }

    /// Classify `error` and record it against `current`. Returns whether
    /// the call was counted.
    fn record_error(
        &self,
        current: &Arc<StateRecord>,
        duration: Duration,
        error: &dyn CallError,
    ) -> bool {
        match current.config.classifier.classify(error) {
            Classification::Ignored => {
                self.ignore(current, duration, error);
                false
            }
            Classification::Success => {
                self.record(current, duration, false, None);
                true
            }
            Classification::Failure => {
                self.record(current, duration, true, Some(error.kind()));
                true
            }
        }
    }

    fn ignore(&self, current: &StateRecord, duration: Duration, error: &dyn CallError) {
        if !current.state.records_outcomes() {
            return;
        }
        tracing::debug!(breaker = %self.inner.name, kind = error.kind(), "Ignored error");
        metrics::record_call(&self.inner.name, "ignored");
        self.inner.events.publish(|| BreakerEvent::IgnoredError {
            name: self.inner.name.clone(),
            duration,
            kind: error.kind().to_string(),
        });
    }

    /// Record an outcome into `current`'s window and evaluate it. A stale
    /// record is still updated, but its transitions lose the swap.
    fn record(
        &self,
        current: &Arc<StateRecord>,
        duration: Duration,
        failed: bool,
        kind: Option<&str>,
    ) {
        let name = &self.inner.name;
        if !current.state.records_outcomes() {
            return;
        }

        if failed {
            self.inner.events.publish(|| BreakerEvent::Error {
                name: name.clone(),
                duration,
                kind: kind.unwrap_or_default().to_string(),
            });
        } else {
            self.inner.events.publish(|| BreakerEvent::Success {
                name: name.clone(),
                duration,
            });
        }

        let slow = duration > current.config.slow_call_duration_threshold;
        let outcome = Outcome::new(failed, slow);
        metrics::record_call(name, outcome_label(outcome));
        let snapshot = current.recorder.record(outcome, duration);

        match current.state {
            CircuitState::Closed => {
                let verdict = Verdict::evaluate(&snapshot, &current.config);
                if matches!(
                    verdict,
                    Verdict::FailureRateExceeded(_) | Verdict::SlowCallRateExceeded(_)
                ) {
                    self.publish_exceeded(verdict);
                    metrics::record_rates(name, snapshot.failure_rate(), snapshot.slow_call_rate());
                    self.transition(current, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => match Verdict::evaluate(&snapshot, &current.config) {
                Verdict::NotEnoughCalls => {}
                Verdict::BelowThresholds => {
                    metrics::record_rates(name, snapshot.failure_rate(), snapshot.slow_call_rate());
                    self.transition(current, CircuitState::Closed);
                }
                exceeded => {
                    self.publish_exceeded(exceeded);
                    metrics::record_rates(name, snapshot.failure_rate(), snapshot.slow_call_rate());
                    self.transition(current, CircuitState::Open);
                }
            },
            CircuitState::MetricsOnly => {
                let verdict = Verdict::evaluate(&snapshot, &current.config);
                if verdict != Verdict::NotEnoughCalls {
                    metrics::record_rates(name, snapshot.failure_rate(), snapshot.slow_call_rate());
                }
                self.publish_exceeded(verdict);
            }
            _ => {}
        }
    }

    fn publish_exceeded(&self, verdict: Verdict) {
        let name = &self.inner.name;
        match verdict {
            Verdict::FailureRateExceeded(rate) => {
                self.inner.events.publish(|| BreakerEvent::FailureRateExceeded {
                    name: name.clone(),
                    rate,
                })
            }
            Verdict::SlowCallRateExceeded(rate) => {
                self.inner.events.publish(|| BreakerEvent::SlowCallRateExceeded {
                    name: name.clone(),
                    rate,
                })
            }
            Verdict::NotEnoughCalls | Verdict::BelowThresholds => {}
        }
    }

    /// Swap `current` for a fresh record in state `to`.
    ///
    /// Returns false when another caller already replaced `current`.
    fn transition(&self, current: &Arc<StateRecord>, to: CircuitState) -> bool {
        let next = Arc::new(build_record(
            to,
            current.config.clone(),
            &self.inner.clock,
            current.epoch + 1,
        ));
        let previous = self.inner.record.compare_and_swap(current, next.clone());
        if !Arc::ptr_eq(&*previous, current) {
            return false;
        }

        let name = &self.inner.name;
        let from = current.state;
        if to == CircuitState::Open {
            tracing::warn!(breaker = %name, from = %from, to = %to, "Circuit breaker opening");
        } else {
            tracing::info!(breaker = %name, from = %from, to = %to, "Circuit breaker state change");
        }
        metrics::record_transition(name, from, to);
        self.inner.events.publish(|| BreakerEvent::StateTransition {
            name: name.clone(),
            from,
            to,
        });

        self.schedule_if_open(&next);
        true
    }

    fn schedule_if_open(&self, record: &StateRecord) {
        if record.state != CircuitState::Open
            || !record.config.automatic_transition_from_open_to_half_open_enabled
        {
            return;
        }
        let wait = self.remaining_wait(record).unwrap_or_default();
        self.schedule_half_open(record.epoch, wait);
    }

    /// Fire the Open → Half-Open transition at the deadline when running
    /// inside a Tokio runtime; otherwise `state()` applies it lazily.
    fn schedule_half_open(&self, epoch: u64, wait: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let breaker = CircuitBreaker { inner };
            let current = breaker.inner.record.load_full();
            if current.state == CircuitState::Open && current.epoch == epoch {
                breaker.transition(&current, CircuitState::HalfOpen);
            }
        });
    }

    fn wait_elapsed(&self, record: &StateRecord) -> bool {
        self.remaining_wait(record).is_none()
    }

    fn remaining_wait(&self, record: &StateRecord) -> Option<Duration> {
        let opened_at = record.opened_at?;
        let elapsed = self.inner.clock.now().saturating_duration_since(opened_at);
        let wait = record.config.wait_duration_in_open_state;
        (elapsed < wait).then(|| wait - elapsed)
    }

    fn reject(&self, record: &StateRecord, retry_after: Option<Duration>) -> CallNotPermitted {
        let name = &self.inner.name;
        tracing::debug!(breaker = %name, state = %record.state, "Call not permitted");
        metrics::record_not_permitted(name);
        self.inner.events.publish(|| BreakerEvent::NotPermitted { name: name.clone() });
        CallNotPermitted {
            name: name.clone(),
            state: record.state,
            retry_after,
        }
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "successful",
        Outcome::SlowSuccess => "slow_successful",
        Outcome::Failure => "failed",
        Outcome::SlowFailure => "slow_failed",
    }
}

fn build_record(
    state: CircuitState,
    config: Arc<CircuitBreakerConfig>,
    clock: &Arc<dyn Clock>,
    epoch: u64,
) -> StateRecord {
    let (recorder, permits) = match state {
        CircuitState::HalfOpen => (config.half_open_window(), config.window_size_half_open),
        _ => (config.closed_window(clock), 0),
    };
    let opened_at = (state == CircuitState::Open).then(|| clock.now());
    StateRecord {
        state,
        config,
        recorder,
        opened_at,
        permits: AtomicU32::new(permits),
        epoch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(10);

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::with_clock("backend", config, Arc::new(clock.clone()));
        (breaker, clock)
    }

    fn small_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .window_size_closed(10)
            .window_size_half_open(4)
            .failure_rate_threshold(50.0)
            .wait_duration_in_open_state(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn drive(breaker: &CircuitBreaker, failures: usize, successes: usize) {
        for _ in 0..failures {
            breaker.try_acquire_permission().unwrap().on_failure(MS, &"boom");
        }
        for _ in 0..successes {
            breaker.try_acquire_permission().unwrap().on_success(MS);
        }
    }

    #[test]
    fn test_starts_closed_and_permits_until_window_full() {
        let (breaker, _) = breaker(small_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        drive(&breaker, 9, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_rate(), None);
    }

    #[test]
    fn test_threshold_crossing_opens() {
        let (breaker, _) = breaker(small_config());
        drive(&breaker, 5, 5);
        assert_eq!(breaker.state(), CircuitState::Open);
        // Closed history is discarded.
        assert_eq!(breaker.metrics().total_calls(), 0);

        let err = breaker.try_acquire_permission().unwrap_err();
        assert_eq!(err.state, CircuitState::Open);
        assert_eq!(err.retry_after, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_one_failure_below_threshold_stays_closed() {
        let (breaker, _) = breaker(small_config());
        drive(&breaker, 4, 6);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_rate(), Some(40.0));
    }

    #[test]
    fn test_slow_calls_open_independently() {
        let config = CircuitBreakerConfig::builder()
            .window_size_closed(4)
            .slow_call_rate_threshold(50.0)
            .slow_call_duration_threshold(Duration::from_millis(100))
            .build()
            .unwrap();
        let (breaker, _) = breaker(config);
        let mut events = breaker.subscribe();
        for _ in 0..2 {
            breaker.on_success(Duration::from_millis(500));
        }
        breaker.on_success(MS);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.on_success(MS);
        assert_eq!(breaker.state(), CircuitState::Open);

        let exceeded = std::iter::from_fn(|| events.try_recv().ok())
            .find(|e| matches!(e, BreakerEvent::SlowCallRateExceeded { .. }));
        assert_eq!(
            exceeded,
            Some(BreakerEvent::SlowCallRateExceeded {
                name: "backend".into(),
                rate: 50.0
            })
        );
    }

    #[test]
    fn test_open_to_half_open_after_wait() {
        let (breaker, clock) = breaker(small_config());
        drive(&breaker, 10, 0);
        clock.advance(Duration::from_secs(4));
        assert!(breaker.try_acquire_permission().is_err());
        // Lazy transition: state query alone does not move it.
        clock.advance(Duration::from_secs(1));
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.try_acquire_permission().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_automatic_transition_on_observation() {
        let config = CircuitBreakerConfig::builder()
            .window_size_closed(2)
            .automatic_transition_from_open_to_half_open(true)
            .wait_duration_in_open_state(Duration::from_secs(2))
            .build()
            .unwrap();
        let (breaker, clock) = breaker(config);
        drive(&breaker, 2, 0);
        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(2));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_call_budget() {
        let (breaker, clock) = breaker(small_config());
        drive(&breaker, 10, 0);
        clock.advance(Duration::from_secs(5));
        let permits: Vec<_> = (0..4)
            .map(|_| breaker.try_acquire_permission().unwrap())
            .collect();
        assert!(permits.iter().all(|p| p.state() == CircuitState::HalfOpen));
        let err = breaker.try_acquire_permission().unwrap_err();
        assert_eq!(err.state, CircuitState::HalfOpen);

        // An abandoned permit frees its slot.
        drop(permits);
        assert!(breaker.try_acquire_permission().is_ok());
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let (breaker, clock) = breaker(small_config());
        drive(&breaker, 10, 0);
        clock.advance(Duration::from_secs(5));
        drive(&breaker, 1, 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_calls(), 0);
    }

    #[test]
    fn test_half_open_reopens_on_failures() {
        let (breaker, clock) = breaker(small_config());
        drive(&breaker, 10, 0);
        clock.advance(Duration::from_secs(5));
        drive(&breaker, 2, 2);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire_permission().is_err());
    }

    #[test]
    fn test_ignored_errors_are_not_counted() {
        let config = CircuitBreakerConfig::builder()
            .window_size_closed(2)
            .ignore_exceptions(["not_found"])
            .build()
            .unwrap();
        let (breaker, _) = breaker(config);
        for _ in 0..5 {
            breaker.on_failure(MS, &"not_found");
        }
        assert_eq!(breaker.metrics().total_calls(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_ignored_error_returns_half_open_permit() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::builder()
                .window_size_closed(2)
                .window_size_half_open(1)
                .ignore_exceptions(["cancelled"])
                .build()
                .unwrap(),
        );
        drive(&breaker, 2, 0);
        clock.advance(Duration::from_secs(60));
        breaker
            .try_acquire_permission()
            .unwrap()
            .on_failure(MS, &"cancelled");
        let permit = breaker.try_acquire_permission().unwrap();
        assert!(breaker.try_acquire_permission().is_err());
        permit.on_success(MS);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_closed_permit_finishing_in_half_open_leaves_budget_alone() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::builder()
                .window_size_closed(2)
                .window_size_half_open(2)
                .ignore_exceptions(["cancelled"])
                .build()
                .unwrap(),
        );
        let slow_ignored = breaker.try_acquire_permission().unwrap();
        let slow_failed = breaker.try_acquire_permission().unwrap();
        drive(&breaker, 2, 0);
        clock.advance(Duration::from_secs(60));
        let first = breaker.try_acquire_permission().unwrap();
        let second = breaker.try_acquire_permission().unwrap();
        assert_eq!(first.state(), CircuitState::HalfOpen);

        // Calls admitted while closed finish during half-open.
        assert_eq!(slow_ignored.state(), CircuitState::Closed);
        slow_ignored.on_failure(MS, &"cancelled");
        slow_failed.on_failure(MS, &"boom");
        assert!(breaker.try_acquire_permission().is_err());
        assert_eq!(breaker.metrics().total_calls(), 0);

        first.on_success(MS);
        second.on_success(MS);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_permit_returns_slot_to_its_own_record() {
        let (breaker, clock) = breaker(small_config());
        drive(&breaker, 10, 0);
        clock.advance(Duration::from_secs(5));
        let stale = breaker.try_acquire_permission().unwrap();
        breaker.reconfigure(small_config());
        drop(stale);
        let permits: Vec<_> = (0..4)
            .map(|_| breaker.try_acquire_permission().unwrap())
            .collect();
        assert!(breaker.try_acquire_permission().is_err());
        drop(permits);
    }

    #[tokio::test]
    async fn test_cancelled_async_call_frees_half_open_slot() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::builder()
                .window_size_closed(2)
                .window_size_half_open(1)
                .build()
                .unwrap(),
        );
        drive(&breaker, 2, 0);
        clock.advance(Duration::from_secs(60));

        for _ in 0..3 {
            let hung = breaker.call_async(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, String>(())
            });
            assert!(tokio::time::timeout(Duration::from_millis(5), hung).await.is_err());
            assert_eq!(breaker.state(), CircuitState::HalfOpen);
        }

        let ok = breaker.call_async(|| async { Ok::<_, String>(1) }).await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_disabled_bypasses_everything() {
        let (breaker, _) = breaker(small_config());
        breaker.transition_to(CircuitState::Disabled).unwrap();
        let mut events = breaker.subscribe();
        drive(&breaker, 20, 5);
        assert_eq!(breaker.state(), CircuitState::Disabled);
        assert_eq!(breaker.metrics().total_calls(), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_forced_open_publishes_no_outcomes() {
        let (breaker, _) = breaker(small_config());
        let admitted = breaker.try_acquire_permission().unwrap();
        breaker.transition_to(CircuitState::ForcedOpen).unwrap();
        let mut events = breaker.subscribe();
        breaker.on_success(MS);
        breaker.on_failure(MS, &"boom");
        let outcomes = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, BreakerEvent::Success { .. } | BreakerEvent::Error { .. }))
            .count();
        assert_eq!(outcomes, 0);
        // Admitted before the operator action, so it still counts.
        admitted.on_failure(MS, &"boom");
        assert!(matches!(events.try_recv(), Ok(BreakerEvent::Error { .. })));
    }

    fn time_based_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .sliding_window_type(SlidingWindowType::TimeBased)
            .window_size_closed(10)
            .minimum_number_of_calls(4)
            .failure_rate_threshold(50.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_time_window_opens_on_threshold() {
        let (breaker, clock) = breaker(time_based_config());
        drive(&breaker, 1, 1);
        clock.advance(Duration::from_secs(1));
        drive(&breaker, 1, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_rate(), None);
        drive(&breaker, 1, 0);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_time_window_forgets_old_failures() {
        let (breaker, clock) = breaker(time_based_config());
        drive(&breaker, 3, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
        clock.advance(Duration::from_secs(11));
        drive(&breaker, 1, 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_calls(), 4);
        assert_eq!(breaker.metrics().failure_rate(), Some(25.0));
    }

    #[test]
    fn test_forced_open_rejects_without_recording() {
        let (breaker, clock) = breaker(small_config());
        breaker.transition_to(CircuitState::ForcedOpen).unwrap();
        clock.advance(Duration::from_secs(600));
        let err = breaker.try_acquire_permission().unwrap_err();
        assert_eq!(err.state, CircuitState::ForcedOpen);
        breaker.on_failure(MS, &"boom");
        assert_eq!(breaker.metrics().total_calls(), 0);
    }

    #[test]
    fn test_metrics_only_never_rejects() {
        let (breaker, _) = breaker(small_config());
        breaker.transition_to(CircuitState::MetricsOnly).unwrap();
        let mut events = breaker.subscribe();
        drive(&breaker, 10, 0);
        assert_eq!(breaker.state(), CircuitState::MetricsOnly);
        assert_eq!(breaker.metrics().failure_rate(), Some(100.0));
        assert!(breaker.try_acquire_permission().is_ok());
        let exceeded = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, BreakerEvent::FailureRateExceeded { .. }))
            .count();
        assert_eq!(exceeded, 1);
    }

    #[test]
    fn test_transition_to_same_state_is_illegal() {
        let (breaker, _) = breaker(small_config());
        let err = breaker.transition_to(CircuitState::Closed).unwrap_err();
        assert_eq!(err.to_string(), "circuit breaker 'backend' is already CLOSED");
    }

    #[test]
    fn test_initial_state_from_config() {
        let config = CircuitBreakerConfig::builder()
            .initial_state(CircuitState::ForcedOpen)
            .build()
            .unwrap();
        let (breaker, _) = breaker(config);
        assert_eq!(breaker.state(), CircuitState::ForcedOpen);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reconfigure_swaps_config_and_window() {
        let (breaker, _) = breaker(small_config());
        drive(&breaker, 3, 0);
        let replacement = CircuitBreakerConfig::builder()
            .window_size_closed(3)
            .build()
            .unwrap();
        breaker.reconfigure(replacement);
        assert_eq!(breaker.config().window_size_closed, 3);
        assert_eq!(breaker.metrics().total_calls(), 0);
        drive(&breaker, 2, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_call_helper_classifies_results() {
        let (breaker, _) = breaker(
            CircuitBreakerConfig::builder()
                .window_size_closed(2)
                .build()
                .unwrap(),
        );
        let ok: Result<u32, BreakerError<String>> = breaker.call(|| Ok(7));
        assert_eq!(ok.unwrap(), 7);
        let err = breaker.call(|| Err::<u32, _>("refused".to_string())).unwrap_err();
        assert_eq!(err.into_call_error().as_deref(), Some("refused"));
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker.call(|| Ok::<_, String>(1)).unwrap_err();
        assert!(rejected.is_not_permitted());
    }

    #[test]
    fn test_transition_events_published() {
        let (breaker, clock) = breaker(small_config());
        let mut events = breaker.subscribe();
        drive(&breaker, 10, 0);
        clock.advance(Duration::from_secs(5));
        breaker.try_acquire_permission().unwrap();

        let transitions: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|e| match e {
                BreakerEvent::StateTransition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen)
            ]
        );
    }
}
