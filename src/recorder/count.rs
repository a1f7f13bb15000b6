//! Count-based window: a ring buffer of the last N outcomes.

use std::time::Duration;

use parking_lot::Mutex;

use super::{Outcome, OutcomeRecorder, Snapshot, Totals};

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<(Outcome, Duration)>>,
    head: usize,
    totals: Totals,
}

/// Fixed-capacity ring buffer of call outcomes.
///
/// Overwriting the oldest slot subtracts it from the running totals, so
/// recording stays O(1).
#[derive(Debug)]
pub struct CountWindow {
    ring: Mutex<Ring>,
    minimum_calls: u32,
}

impl CountWindow {
    /// Create a window holding `size` outcomes.
    ///
    /// Rates stay unavailable until `minimum_calls` outcomes are recorded;
    /// the minimum is clamped to the window size.
    pub fn new(size: u32, minimum_calls: u32) -> Self {
        let size = size.max(1);
        Self {
            ring: Mutex::new(Ring {
                slots: vec![None; size as usize],
                head: 0,
                totals: Totals::default(),
            }),
            minimum_calls: minimum_calls.clamp(1, size),
        }
    }

    /// A window that is ready only once it is full.
    pub fn full(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }
}

impl OutcomeRecorder for CountWindow {
    fn record(&self, outcome: Outcome, duration: Duration) -> Snapshot {
        let mut ring = self.ring.lock();
        let head = ring.head;
        if let Some((evicted, evicted_duration)) = ring.slots[head].take() {
            let mut old = Totals::default();
            old.add(evicted, evicted_duration);
            ring.totals.remove(&old);
        }
        ring.slots[head] = Some((outcome, duration));
        ring.totals.add(outcome, duration);
        ring.head = (head + 1) % ring.slots.len();
        Snapshot::from_totals(&ring.totals, self.minimum_calls)
    }

    fn snapshot(&self) -> Snapshot {
        let ring = self.ring.lock();
        Snapshot::from_totals(&ring.totals, self.minimum_calls)
    }

    fn reset(&self) {
        let mut ring = self.ring.lock();
        ring.slots.iter_mut().for_each(|slot| *slot = None);
        ring.head = 0;
        ring.totals = Totals::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_not_ready_while_filling() {
        let window = CountWindow::full(4);
        for _ in 0..3 {
            let snapshot = window.record(Outcome::Failure, MS);
            assert_eq!(snapshot.failure_rate(), None);
        }
        let snapshot = window.record(Outcome::Success, MS);
        assert_eq!(snapshot.failure_rate(), Some(75.0));
        assert_eq!(window.total_calls(), 4);
    }

    #[test]
    fn test_oldest_outcome_is_evicted() {
        let window = CountWindow::full(3);
        window.record(Outcome::Failure, MS);
        window.record(Outcome::Success, MS);
        window.record(Outcome::Success, MS);
        assert_eq!(window.snapshot().failed_calls(), 1);

        // Overwrites the failure.
        let snapshot = window.record(Outcome::SlowSuccess, MS);
        assert_eq!(snapshot.total_calls(), 3);
        assert_eq!(snapshot.failed_calls(), 0);
        assert_eq!(snapshot.slow_calls(), 1);
        assert_eq!(snapshot.failure_rate(), Some(0.0));
    }

    #[test]
    fn test_minimum_calls_clamped_to_size() {
        let window = CountWindow::new(2, 100);
        window.record(Outcome::Failure, MS);
        let snapshot = window.record(Outcome::Failure, MS);
        assert_eq!(snapshot.failure_rate(), Some(100.0));
    }

    #[test]
    fn test_reset_clears_window() {
        let window = CountWindow::full(2);
        window.record(Outcome::SlowFailure, MS);
        window.record(Outcome::Failure, MS);
        window.reset();
        let snapshot = window.snapshot();
        assert_eq!(snapshot.total_calls(), 0);
        assert_eq!(snapshot.slow_failed_calls(), 0);
        assert_eq!(window.capacity(), 2);
    }
}
