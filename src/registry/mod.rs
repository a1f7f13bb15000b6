//! Breaker registry.
//!
//! # Data Flow
//! ```text
//! get_or_create(name)
//!     → breakers map hit?           → existing breaker
//!     → ConfigResolver::resolve     (cached, immutable)
//!     → insert-if-absent            → new breaker
//!
//! reload(settings)                 (one at a time)
//!     → new ConfigResolver, validate_all
//!     → re-resolve every live breaker (any error aborts)
//!     → swap resolver
//!     → reconfigure changed breakers
//! ```
//!
//! # Design Decisions
//! - At most one breaker per name, even under concurrent first access
//! - Reads never populate the map; only `get_or_create*` and `register` do
//! - A reload is applied to every breaker or to none
//! - A breaker created from a resolver that was swapped out meanwhile is
//!   re-resolved against the current one before it is handed out

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, PredicateRegistry, SystemClock};
use crate::config::loader::ConfigError;
use crate::config::resolver::ConfigResolver;
use crate::config::schema::BreakerSettings;

/// Where the configuration of a registered breaker came from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSource {
    Backend,
    Named(String),
    /// Handed in by the caller; reloads leave it alone.
    Explicit,
}

#[derive(Debug)]
struct Entry {
    breaker: CircuitBreaker,
    source: ConfigSource,
}

/// Process-wide map from breaker name to live breaker.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Entry>,
    resolver: ArcSwap<ConfigResolver>,
    reload_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self::with_predicates(settings, PredicateRegistry::default())
    }

    pub fn with_predicates(settings: BreakerSettings, predicates: PredicateRegistry) -> Self {
        Self::with_clock(
            ConfigResolver::with_predicates(settings, predicates),
            Arc::new(SystemClock),
        )
    }

    /// Build a registry, rejecting settings with any invalid fragment.
    pub fn from_settings(
        settings: BreakerSettings,
        predicates: PredicateRegistry,
    ) -> Result<Self, ConfigError> {
        let resolver = ConfigResolver::with_predicates(settings, predicates);
        resolver.validate_all()?;
        Ok(Self::with_clock(resolver, Arc::new(SystemClock)))
    }

    /// Breakers created by this registry read time from `clock`.
    pub fn with_clock(resolver: ConfigResolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            resolver: ArcSwap::from_pointee(resolver),
            reload_lock: Mutex::new(()),
            clock,
        }
    }

    /// Breaker for a backend, created from its resolved configuration on
    /// first access.
    pub fn get_or_create(&self, name: &str) -> Result<CircuitBreaker, ConfigError> {
        if let Some(entry) = self.breakers.get(name) {
            return Ok(entry.breaker.clone());
        }
        let resolver = self.resolver.load_full();
        let config = resolver.resolve(name)?;
        Ok(self.create(&resolver, name, config, ConfigSource::Backend))
    }

    /// Breaker configured from the shared configuration `config_name`.
    ///
    /// An existing breaker is returned as is, whatever it was created from.
    pub fn get_or_create_with_config(
        &self,
        name: &str,
        config_name: &str,
    ) -> Result<CircuitBreaker, ConfigError> {
        if let Some(entry) = self.breakers.get(name) {
            return Ok(entry.breaker.clone());
        }
        let resolver = self.resolver.load_full();
        let config = resolver.resolve_named(config_name)?;
        let source = ConfigSource::Named(config_name.to_string());
        Ok(self.create(&resolver, name, config, source))
    }

    /// Register a breaker with an explicit configuration.
    ///
    /// An existing breaker keeps its identity and state and takes the new
    /// configuration.
    pub fn register(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        let _guard = self.reload_lock.lock();
        match self.breakers.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.breaker.reconfigure(config);
                entry.source = ConfigSource::Explicit;
                entry.breaker.clone()
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let breaker = CircuitBreaker::with_clock(name, config, self.clock.clone());
                tracing::info!(breaker = %name, "Circuit breaker registered");
                vacant.insert(Entry {
                    breaker: breaker.clone(),
                    source: ConfigSource::Explicit,
                });
                breaker
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.get(name).map(|entry| entry.breaker.clone())
    }

    /// Drop a breaker from the registry. Handles already given out keep
    /// working but are no longer reachable by name.
    pub fn remove(&self, name: &str) -> Option<CircuitBreaker> {
        let (_, entry) = self.breakers.remove(name)?;
        tracing::info!(breaker = %name, "Circuit breaker removed");
        Some(entry.breaker)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Number of breakers in each state, in `CircuitState::ALL` order.
    pub fn summary(&self) -> Vec<(CircuitState, usize)> {
        let mut counts: HashMap<CircuitState, usize> = HashMap::new();
        for entry in self.breakers.iter() {
            *counts.entry(entry.breaker.state()).or_default() += 1;
        }
        CircuitState::ALL
            .iter()
            .map(|state| (*state, counts.get(state).copied().unwrap_or(0)))
            .collect()
    }

    /// Order of the breaker relative to other protective layers.
    pub fn aspect_order(&self) -> i32 {
        self.resolver.load().settings().circuit_breaker_aspect_order
    }

    /// Current resolver, for inspecting resolved configurations.
    pub fn resolver(&self) -> Arc<ConfigResolver> {
        self.resolver.load_full()
    }

    /// Apply new settings to the registry and every live breaker.
    ///
    /// Nothing changes unless every fragment and every live breaker
    /// resolves under the new settings. Breakers keep their state; those
    /// whose configuration changed get a fresh window.
    pub fn reload(&self, settings: BreakerSettings) -> Result<usize, ConfigError> {
        let _guard = self.reload_lock.lock();
        let predicates = self.resolver.load().predicates().clone();
        let resolver = ConfigResolver::with_predicates(settings, predicates);
        resolver.validate_all()?;
        for entry in self.breakers.iter() {
            resolve_source(&resolver, entry.key(), &entry.source)?;
        }

        let resolver = Arc::new(resolver);
        self.resolver.store(resolver.clone());

        // Breakers created meanwhile are either seen here or catch up
        // themselves in `create`.
        let mut changed = 0;
        let live: Vec<(String, CircuitBreaker, ConfigSource)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.breaker.clone(), entry.source.clone()))
            .collect();
        for (name, breaker, source) in live {
            if apply(&resolver, &name, &breaker, &source) {
                changed += 1;
            }
        }
        tracing::info!(breakers = self.breakers.len(), changed, "Breaker settings reloaded");
        Ok(changed)
    }

    /// Insert a breaker built from `config`, which `resolver` produced.
    fn create(
        &self,
        resolver: &Arc<ConfigResolver>,
        name: &str,
        config: Arc<CircuitBreakerConfig>,
        source: ConfigSource,
    ) -> CircuitBreaker {
        let breaker = self.insert_if_absent(name, config, source);
        if Arc::ptr_eq(resolver, &*self.resolver.load()) {
            return breaker;
        }

        // A reload swapped the resolver in between; it may have missed us.
        let _guard = self.reload_lock.lock();
        let current = self.resolver.load_full();
        let source = self.breakers.get(name).map(|entry| entry.source.clone());
        if let Some(source) = source {
            apply(&current, name, &breaker, &source);
        }
        breaker
    }

    fn insert_if_absent(
        &self,
        name: &str,
        config: Arc<CircuitBreakerConfig>,
        source: ConfigSource,
    ) -> CircuitBreaker {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    breaker = %name,
                    configuration = ?config.configuration_name,
                    state = %config.initial_state,
                    "Circuit breaker created"
                );
                Entry {
                    breaker: CircuitBreaker::with_clock(
                        name,
                        config.as_ref().clone(),
                        self.clock.clone(),
                    ),
                    source,
                }
            })
            .breaker
            .clone()
    }
}

/// Reconfigure `breaker` if `resolver` gives it a different
/// configuration. Returns whether it changed.
fn apply(
    resolver: &ConfigResolver,
    name: &str,
    breaker: &CircuitBreaker,
    source: &ConfigSource,
) -> bool {
    match resolve_source(resolver, name, source) {
        Ok(Some(config)) if *config != *breaker.config() => {
            breaker.reconfigure(config.as_ref().clone());
            true
        }
        Ok(_) => false,
        Err(e) => {
            tracing::warn!(breaker = %name, error = %e, "Keeping previous configuration");
            false
        }
    }
}

/// Resolve the configuration a breaker was created from; `None` for
/// explicitly registered breakers.
fn resolve_source(
    resolver: &ConfigResolver,
    name: &str,
    source: &ConfigSource,
) -> Result<Option<Arc<CircuitBreakerConfig>>, ConfigError> {
    match source {
        ConfigSource::Backend => resolver.resolve(name).map(Some),
        ConfigSource::Named(config_name) => resolver.resolve_named(config_name).map(Some),
        ConfigSource::Explicit => Ok(None),
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::ManualClock;
    use crate::config::loader::parse_settings;

    fn registry(toml_str: &str) -> BreakerRegistry {
        BreakerRegistry::new(parse_settings(toml_str).unwrap())
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = registry("[backends.payments]\nwindow_size_closed = 4");
        let first = registry.get_or_create("payments").unwrap();
        let second = registry.get_or_create("payments").unwrap();

        first.transition_to(CircuitState::ForcedOpen).unwrap();
        assert_eq!(second.state(), CircuitState::ForcedOpen);
        assert_eq!(first.config().window_size_closed, 4);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_does_not_create() {
        let registry = BreakerRegistry::default();
        assert!(registry.find("payments").is_none());
        assert!(registry.is_empty());
        registry.get_or_create("payments").unwrap();
        assert!(registry.find("payments").is_some());
    }

    #[test]
    fn test_invalid_backend_is_not_registered() {
        let registry = registry("[backends.bad]\nwindow_size_closed = 0");
        assert!(matches!(
            registry.get_or_create("bad"),
            Err(ConfigError::Validation { .. })
        ));
        assert!(registry.find("bad").is_none());
    }

    #[test]
    fn test_from_settings_rejects_invalid_fragment() {
        let settings = parse_settings("[configs.broken]\nfailure_rate_threshold = 150.0").unwrap();
        assert!(BreakerRegistry::from_settings(settings, PredicateRegistry::new()).is_err());
    }

    #[test]
    fn test_get_or_create_with_config() {
        let registry = registry("[configs.strict]\nfailure_rate_threshold = 10.0");
        let breaker = registry.get_or_create_with_config("inventory", "strict").unwrap();
        assert_eq!(breaker.config().failure_rate_threshold, 10.0);
        assert_eq!(breaker.config().configuration_name.as_deref(), Some("strict"));
    }

    #[test]
    fn test_register_reconfigures_existing_breaker() {
        let registry = BreakerRegistry::default();
        let original = registry.get_or_create("search").unwrap();
        let config = CircuitBreakerConfig::builder()
            .window_size_closed(3)
            .build()
            .unwrap();
        let registered = registry.register("search", config);

        assert_eq!(original.config().window_size_closed, 3);
        assert_eq!(registered.name(), "search");
    }

    #[test]
    fn test_remove_and_names() {
        let registry = BreakerRegistry::default();
        registry.get_or_create("b").unwrap();
        registry.get_or_create("a").unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.names(), vec!["b"]);
    }

    #[test]
    fn test_summary_counts_states() {
        let registry = BreakerRegistry::default();
        registry.get_or_create("a").unwrap();
        registry.get_or_create("b").unwrap();
        registry
            .get_or_create("c")
            .unwrap()
            .transition_to(CircuitState::Disabled)
            .unwrap();

        let summary = registry.summary();
        assert_eq!(summary.len(), CircuitState::ALL.len());
        assert!(summary.contains(&(CircuitState::Closed, 2)));
        assert!(summary.contains(&(CircuitState::Disabled, 1)));
        assert!(summary.contains(&(CircuitState::Open, 0)));
    }

    #[test]
    fn test_aspect_order() {
        assert_eq!(BreakerRegistry::default().aspect_order(), i32::MAX - 1);
        assert_eq!(registry("circuit_breaker_aspect_order = 5").aspect_order(), 5);
    }

    #[test]
    fn test_reload_reconfigures_and_keeps_state() {
        let clock = Arc::new(ManualClock::new());
        let registry = BreakerRegistry::with_clock(
            ConfigResolver::new(parse_settings("[backends.api]\nwindow_size_closed = 5").unwrap()),
            clock.clone(),
        );
        let api = registry.get_or_create("api").unwrap();
        api.transition_to(CircuitState::ForcedOpen).unwrap();
        let explicit = registry.register(
            "manual",
            CircuitBreakerConfig::builder().window_size_closed(2).build().unwrap(),
        );

        let changed = registry
            .reload(parse_settings("[backends.api]\nwindow_size_closed = 8").unwrap())
            .unwrap();

        assert_eq!(changed, 1);
        assert_eq!(api.config().window_size_closed, 8);
        assert_eq!(api.state(), CircuitState::ForcedOpen);
        assert_eq!(explicit.config().window_size_closed, 2);
    }

    #[test]
    fn test_breaker_created_from_replaced_resolver_catches_up() {
        let registry = registry("[backends.api]\nwindow_size_closed = 5");
        let stale = registry.resolver();
        registry
            .reload(parse_settings("[backends.api]\nwindow_size_closed = 9").unwrap())
            .unwrap();

        let config = stale.resolve("api").unwrap();
        let api = registry.create(&stale, "api", config, ConfigSource::Backend);
        assert_eq!(api.config().window_size_closed, 9);
        assert_eq!(registry.get_or_create("api").unwrap().config().window_size_closed, 9);
    }

    #[test]
    fn test_concurrent_reloads_and_creation_converge() {
        let registry = Arc::new(registry("[backends.api]\nwindow_size_closed = 5"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        let settings = format!("[backends.api]\nwindow_size_closed = {}", 6 + i);
                        registry.reload(parse_settings(&settings).unwrap()).unwrap();
                    } else {
                        registry.get_or_create("api").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected = registry.resolver().resolve("api").unwrap();
        assert_eq!(*registry.find("api").unwrap().config(), *expected);
    }

    #[test]
    fn test_failed_reload_changes_nothing() {
        let registry = registry("circuit_breaker_aspect_order = 1\n[backends.api]\nwindow_size_closed = 5");
        let api = registry.get_or_create("api").unwrap();

        let result = registry.reload(
            parse_settings("circuit_breaker_aspect_order = 2\n[backends.api]\nwindow_size_closed = 0").unwrap(),
        );

        assert!(result.is_err());
        assert_eq!(api.config().window_size_closed, 5);
        assert_eq!(registry.aspect_order(), 1);
    }
}
