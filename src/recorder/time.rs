//! Time-based window: one bucket per second over the last N seconds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Outcome, OutcomeRecorder, Snapshot, Totals};
use crate::breaker::clock::Clock;

#[derive(Debug)]
struct Buckets {
    /// Slot `s % len` holds the outcomes of second `s`.
    slots: Vec<Totals>,
    /// Latest second the buckets were rotated to.
    current: u64,
    totals: Totals,
}

impl Buckets {
    /// Rotate every bucket between the last seen second and `now`,
    /// evicting what they held from the running totals.
    fn advance(&mut self, now: u64) {
        if now <= self.current {
            return;
        }
        let len = self.slots.len() as u64;
        let steps = (now - self.current).min(len);
        for second in (now + 1 - steps)..=now {
            let idx = (second % len) as usize;
            let stale = std::mem::take(&mut self.slots[idx]);
            self.totals.remove(&stale);
        }
        self.current = now;
    }
}

/// Sliding window aggregating outcomes of the last `seconds` seconds.
#[derive(Debug)]
pub struct TimeWindow {
    buckets: Mutex<Buckets>,
    origin: Instant,
    clock: Arc<dyn Clock>,
    minimum_calls: u32,
}

impl TimeWindow {
    pub fn new(seconds: u32, minimum_calls: u32, clock: Arc<dyn Clock>) -> Self {
        let seconds = seconds.max(1);
        Self {
            buckets: Mutex::new(Buckets {
                slots: vec![Totals::default(); seconds as usize],
                current: 0,
                totals: Totals::default(),
            }),
            origin: clock.now(),
            clock,
            minimum_calls: minimum_calls.max(1),
        }
    }

    fn elapsed_seconds(&self) -> u64 {
        self.clock.now().saturating_duration_since(self.origin).as_secs()
    }
}

impl OutcomeRecorder for TimeWindow {
    fn record(&self, outcome: Outcome, duration: Duration) -> Snapshot {
        let now = self.elapsed_seconds();
        let mut buckets = self.buckets.lock();
        buckets.advance(now);
        let idx = (now % buckets.slots.len() as u64) as usize;
        buckets.slots[idx].add(outcome, duration);
        buckets.totals.add(outcome, duration);
        Snapshot::from_totals(&buckets.totals, self.minimum_calls)
    }

    fn snapshot(&self) -> Snapshot {
        let now = self.elapsed_seconds();
        let mut buckets = self.buckets.lock();
        buckets.advance(now);
        Snapshot::from_totals(&buckets.totals, self.minimum_calls)
    }

    fn reset(&self) {
        let now = self.elapsed_seconds();
        let mut buckets = self.buckets.lock();
        buckets.slots.iter_mut().for_each(|slot| *slot = Totals::default());
        buckets.current = now;
        buckets.totals = Totals::default();
    }
}
