//! Breaker call-path errors.

use std::time::Duration;

use thiserror::Error;

use crate::breaker::state::CircuitState;

/// Returned by `try_acquire_permission` when the breaker rejects a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is {state} and does not permit further calls")]
pub struct CallNotPermitted {
    pub name: String,
    pub state: CircuitState,
    /// Time left until the breaker becomes eligible for probing, when known.
    pub retry_after: Option<Duration>,
}

/// Returned when an operator requests the state the breaker is already in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is already {state}")]
pub struct IllegalStateTransition {
    pub name: String,
    pub state: CircuitState,
}

/// Result of a call made through [`CircuitBreaker::call`](super::CircuitBreaker::call).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    NotPermitted(#[from] CallNotPermitted),
    #[error("{0}")]
    Call(E),
}

impl<E> BreakerError<E> {
    pub fn is_not_permitted(&self) -> bool {
        matches!(self, BreakerError::NotPermitted(_))
    }

    pub fn into_call_error(self) -> Option<E> {
        match self {
            BreakerError::Call(e) => Some(e),
            BreakerError::NotPermitted(_) => None,
        }
    }
}
