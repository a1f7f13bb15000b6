//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize into BreakerSettings)
//!     → resolver.rs (merge fragment chains, cache results)
//!     → validation.rs (range checks on every resolved model)
//!     → Arc<CircuitBreakerConfig> (immutable, shared with breakers)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new settings
//!     → BreakerRegistry::reload validates everything
//!     → atomic swap of the resolver, breakers reconfigured
//! ```
//!
//! # Design Decisions
//! - Resolved configuration is immutable; changes require a reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod resolver;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_settings, ConfigError};
pub use resolver::ConfigResolver;
pub use schema::{BackendProperties, BreakerSettings, ObservabilityConfig};
pub use validation::ValidationError;
