//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers produce:
//!     → logging.rs (structured log events on transitions, rejections, reloads)
//!     → metrics.rs (counters and gauges per breaker)
//!     → breaker event stream (broadcast, for external collaborators)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Nothing on the call path blocks on a consumer
//! - Metrics are cheap (facade no-ops when no recorder is installed)

pub mod logging;
pub mod metrics;
