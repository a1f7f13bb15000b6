//! Circuit breakers with inherited, hot-reloadable configuration.
//!
//! ```text
//! BreakerRegistry ──resolve──▶ ConfigResolver ──▶ CircuitBreakerConfig
//!       │
//!       └──▶ CircuitBreaker ──▶ OutcomeRecorder (count or time window)
//! ```

pub mod breaker;
pub mod config;
pub mod observability;
pub mod recorder;
pub mod registry;

pub use breaker::{
    BreakerError, BreakerEvent, CallError, CallNotPermitted, CallPermit, CircuitBreaker,
    CircuitBreakerConfig, CircuitState, PredicateRegistry,
};
pub use config::{BreakerSettings, ConfigError, ConfigResolver};
pub use registry::BreakerRegistry;
