//! Configuration resolution.
//!
//! # Responsibilities
//! - Merge a backend fragment with its `base_config` chain and the
//!   `default` shared fragment
//! - Reject base-config cycles
//! - Freeze named failure predicates into the resolved configuration
//! - Cache every resolved configuration; results never change for the
//!   lifetime of the resolver
//!
//! # Resolution Order
//! ```text
//! backends[name]
//!     → configs[base_config]        (missing name: falls back to "default")
//!     → configs[its base_config]    ...
//!     → configs["default"]          (unless already part of the chain)
//!     → built-in defaults
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::breaker::classify::PredicateRegistry;
use crate::breaker::config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
use crate::config::loader::ConfigError;
use crate::config::schema::{BackendProperties, BreakerSettings, DEFAULT_CONFIG_KEY};
use crate::config::validation::ValidationError;

/// Turns named fragments into validated, immutable configurations.
#[derive(Debug)]
pub struct ConfigResolver {
    settings: BreakerSettings,
    predicates: PredicateRegistry,
    backends: DashMap<String, Arc<CircuitBreakerConfig>>,
    named: DashMap<String, Arc<CircuitBreakerConfig>>,
}

impl ConfigResolver {
    pub fn new(settings: BreakerSettings) -> Self {
        Self::with_predicates(settings, PredicateRegistry::default())
    }

    pub fn with_predicates(settings: BreakerSettings, predicates: PredicateRegistry) -> Self {
        Self {
            settings,
            predicates,
            backends: DashMap::new(),
            named: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn predicates(&self) -> &PredicateRegistry {
        &self.predicates
    }

    /// Resolve the configuration of a backend.
    ///
    /// A backend without a fragment gets the `default` shared fragment, or
    /// the built-in defaults when that is absent too.
    pub fn resolve(&self, backend: &str) -> Result<Arc<CircuitBreakerConfig>, ConfigError> {
        if let Some(config) = self.backends.get(backend) {
            return Ok(config.clone());
        }

        let config = match self.settings.backends.get(backend) {
            Some(props) => {
                let merged = self.merge_chain(backend, None, props)?;
                self.build(backend, &merged, props.base_config.clone())?
            }
            None => {
                tracing::debug!(backend = %backend, "No backend fragment, using shared default");
                self.resolve_named(DEFAULT_CONFIG_KEY)?.as_ref().clone()
            }
        };

        let config = Arc::new(config);
        Ok(self
            .backends
            .entry(backend.to_string())
            .or_insert(config)
            .clone())
    }

    /// Resolve a shared configuration by name. Unknown names fall back to
    /// `default`.
    pub fn resolve_named(&self, config_name: &str) -> Result<Arc<CircuitBreakerConfig>, ConfigError> {
        if let Some(config) = self.named.get(config_name) {
            return Ok(config.clone());
        }

        let config = match self.shared_fragment(config_name) {
            Some((name, props)) => {
                let merged = self.merge_chain(config_name, Some(name), props)?;
                self.build(config_name, &merged, Some(config_name.to_string()))?
            }
            None => {
                let builder = CircuitBreakerConfig::builder().configuration_name(config_name);
                builder.build().map_err(|errors| ConfigError::Validation {
                    name: config_name.to_string(),
                    errors,
                })?
            }
        };

        let config = Arc::new(config);
        Ok(self
            .named
            .entry(config_name.to_string())
            .or_insert(config)
            .clone())
    }

    /// Resolve every backend and shared fragment, reporting the first error.
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        let mut configs: Vec<_> = self.settings.configs.keys().collect();
        configs.sort();
        for name in configs {
            self.resolve_named(name)?;
        }
        let mut backends: Vec<_> = self.settings.backends.keys().collect();
        backends.sort();
        for name in backends {
            self.resolve(name)?;
        }
        Ok(())
    }

    fn shared_fragment<'a>(&'a self, name: &'a str) -> Option<(&'a str, &'a BackendProperties)> {
        if let Some(props) = self.settings.configs.get(name) {
            return Some((name, props));
        }
        if name != DEFAULT_CONFIG_KEY {
            tracing::warn!(config = %name, "Shared configuration not found, falling back to default");
        }
        self.settings
            .configs
            .get(DEFAULT_CONFIG_KEY)
            .map(|props| (DEFAULT_CONFIG_KEY, props))
    }

    /// Walk `props`' inheritance chain, filling unset fields from each
    /// ancestor in turn.
    ///
    /// `id` is the shared name of `props` when it is itself a shared
    /// fragment; backend fragments live in a separate namespace. Explicit
    /// `base_config` links are followed first; the `default` fragment (and
    /// its own chain) is layered underneath unless already visited.
    fn merge_chain(
        &self,
        name: &str,
        id: Option<&str>,
        props: &BackendProperties,
    ) -> Result<BackendProperties, ConfigError> {
        let mut chain: Vec<String> = id.map(str::to_string).into_iter().collect();
        let merged = self.follow_base_configs(name, props.clone(), props, &mut chain, 0)?;

        if chain.iter().any(|seen| seen == DEFAULT_CONFIG_KEY) {
            return Ok(merged);
        }
        let Some(default) = self.settings.configs.get(DEFAULT_CONFIG_KEY) else {
            return Ok(merged);
        };
        chain.push(DEFAULT_CONFIG_KEY.to_string());
        let segment = chain.len() - 1;
        let merged = self.follow_base_configs(name, merged.inherit_from(default), default, &mut chain, segment)?;

        tracing::trace!(name = %name, chain = ?chain, "Resolved configuration chain");
        Ok(merged)
    }

    /// Follow explicit `base_config` links starting at `props`.
    ///
    /// Revisiting a fragment of the current segment (`chain[segment..]`) is a
    /// cycle; revisiting one from an earlier segment stops the walk since
    /// everything beyond it is already merged.
    fn follow_base_configs(
        &self,
        name: &str,
        mut merged: BackendProperties,
        props: &BackendProperties,
        chain: &mut Vec<String>,
        segment: usize,
    ) -> Result<BackendProperties, ConfigError> {
        let mut current = props;
        while let Some(base) = current.base_config.as_deref() {
            if chain[segment..].iter().any(|seen| seen == base) {
                chain.push(base.to_string());
                return Err(ConfigError::CycleDetected {
                    name: name.to_string(),
                    chain: chain.clone(),
                });
            }
            if chain[..segment].iter().any(|seen| seen == base) {
                break;
            }
            let Some(parent) = self.settings.configs.get(base) else {
                tracing::warn!(base_config = %base, "Base configuration not found, falling back to default");
                break;
            };
            chain.push(base.to_string());
            merged = merged.inherit_from(parent);
            current = parent;
        }
        Ok(merged)
    }

    fn build(
        &self,
        name: &str,
        props: &BackendProperties,
        configuration_name: Option<String>,
    ) -> Result<CircuitBreakerConfig, ConfigError> {
        let mut errors = Vec::new();
        let mut builder = apply_properties(CircuitBreakerConfig::builder(), props);

        if let Some(key) = props.record_failure_predicate.as_deref() {
            match self.predicates.get(key) {
                Some(predicate) => builder = builder.record_failure_predicate(key, predicate),
                None => errors.push(ValidationError::new(
                    "record_failure_predicate",
                    format!("unknown predicate '{}'", key),
                )),
            }
        }
        if let Some(configuration_name) = configuration_name {
            builder = builder.configuration_name(configuration_name);
        }

        match builder.build() {
            Ok(config) if errors.is_empty() => Ok(config),
            Ok(_) => Err(ConfigError::Validation {
                name: name.to_string(),
                errors,
            }),
            Err(mut invalid) => {
                invalid.append(&mut errors);
                Err(ConfigError::Validation {
                    name: name.to_string(),
                    errors: invalid,
                })
            }
        }
    }
}

fn apply_properties(
    mut builder: CircuitBreakerConfigBuilder,
    props: &BackendProperties,
) -> CircuitBreakerConfigBuilder {
    if let Some(v) = props.failure_rate_threshold {
        builder = builder.failure_rate_threshold(v);
    }
    if let Some(v) = props.slow_call_rate_threshold {
        builder = builder.slow_call_rate_threshold(v);
    }
    if let Some(ms) = props.slow_call_duration_threshold_ms {
        builder = builder.slow_call_duration_threshold(Duration::from_millis(ms));
    }
    if let Some(v) = props.sliding_window_type {
        builder = builder.sliding_window_type(v);
    }
    if let Some(v) = props.window_size_closed {
        builder = builder.window_size_closed(v);
    }
    if let Some(v) = props.window_size_half_open {
        builder = builder.window_size_half_open(v);
    }
    if let Some(v) = props.minimum_number_of_calls {
        builder = builder.minimum_number_of_calls(v);
    }
    if let Some(ms) = props.wait_duration_in_open_state_ms {
        builder = builder.wait_duration_in_open_state(Duration::from_millis(ms));
    }
    if let Some(v) = props.automatic_transition_from_open_to_half_open_enabled {
        builder = builder.automatic_transition_from_open_to_half_open(v);
    }
    if let Some(kinds) = &props.record_exceptions {
        builder = builder.record_exceptions(kinds.iter().cloned());
    }
    if let Some(kinds) = &props.ignore_exceptions {
        builder = builder.ignore_exceptions(kinds.iter().cloned());
    }
    if let Some(v) = props.event_consumer_buffer_size {
        builder = builder.event_consumer_buffer_size(v);
    }
    if let Some(v) = props.register_health_indicator {
        builder = builder.register_health_indicator(v);
    }
    if let Some(v) = props.initial_state {
        builder = builder.initial_state(v);
    }
    builder
}
