//! Breaker event stream for observability collaborators.
//!
//! Publishing never blocks: events go into a bounded broadcast channel and
//! slow subscribers lose the oldest ones.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::breaker::state::CircuitState;

#[derive(Debug, Clone, PartialEq)]
pub enum BreakerEvent {
    Success {
        name: String,
        duration: Duration,
    },
    Error {
        name: String,
        duration: Duration,
        kind: String,
    },
    IgnoredError {
        name: String,
        duration: Duration,
        kind: String,
    },
    NotPermitted {
        name: String,
    },
    StateTransition {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    Reset {
        name: String,
    },
    FailureRateExceeded {
        name: String,
        rate: f32,
    },
    SlowCallRateExceeded {
        name: String,
        rate: f32,
    },
}

impl BreakerEvent {
    pub fn name(&self) -> &str {
        match self {
            BreakerEvent::Success { name, .. }
            | BreakerEvent::Error { name, .. }
            | BreakerEvent::IgnoredError { name, .. }
            | BreakerEvent::NotPermitted { name }
            | BreakerEvent::StateTransition { name, .. }
            | BreakerEvent::Reset { name }
            | BreakerEvent::FailureRateExceeded { name, .. }
            | BreakerEvent::SlowCallRateExceeded { name, .. } => name,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EventPublisher {
    tx: broadcast::Sender<BreakerEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.tx.subscribe()
    }

    /// Build and send an event only when someone listens.
    pub fn publish(&self, event: impl FnOnce() -> BreakerEvent) {
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(event());
        }
    }
}
