//! Permission to run one call through a breaker.
//!
//! A permit remembers the state record that granted it. The outcome is
//! recorded into that record's window, so a call admitted while Closed
//! never lands in a later half-open window. A half-open permit that is
//! dropped without a counted outcome (cancelled future, ignored error)
//! returns its half-open slot to the record that handed it out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::classify::CallError;
use super::state::{CircuitState, StateRecord};
use super::CircuitBreaker;

#[must_use = "dropping a permit without an outcome records nothing"]
pub struct CallPermit {
    breaker: CircuitBreaker,
    record: Arc<StateRecord>,
    holds_slot: bool,
}

impl CallPermit {
    pub(super) fn new(breaker: CircuitBreaker, record: Arc<StateRecord>, holds_slot: bool) -> Self {
        Self {
            breaker,
            record,
            holds_slot,
        }
    }

    /// State the breaker was in when the call was admitted.
    pub fn state(&self) -> CircuitState {
        self.record.state
    }

    pub fn on_success(mut self, duration: Duration) {
        self.holds_slot = false;
        self.breaker.record(&self.record, duration, false, None);
    }

    /// Classify `error` with the configuration the call was admitted under.
    /// An ignored error frees the half-open slot instead of consuming it.
    pub fn on_failure(mut self, duration: Duration, error: &dyn CallError) {
        let counted = self.breaker.record_error(&self.record, duration, error);
        if counted {
            self.holds_slot = false;
        }
    }

    pub fn on_ignored_error(self, duration: Duration, error: &dyn CallError) {
        self.breaker.ignore(&self.record, duration, error);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.holds_slot && self.record.return_permit() {
            tracing::trace!(breaker = %self.breaker.name(), epoch = self.record.epoch, "Half-open slot returned");
        }
    }
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name())
            .field("state", &self.record.state)
            .field("epoch", &self.record.epoch)
            .finish()
    }
}
