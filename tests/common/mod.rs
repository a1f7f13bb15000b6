//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use breakwater::breaker::{BreakerEvent, CircuitBreakerConfig, ManualClock};
use breakwater::config::{BreakerSettings, ConfigResolver};
use breakwater::BreakerRegistry;

/// Count window of `size` that evaluates once full and opens at 50%.
pub fn count_config(size: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .window_size_closed(size)
        .minimum_number_of_calls(size)
        .window_size_half_open(2)
        .wait_duration_in_open_state(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Registry whose breakers all read time from the returned clock.
pub fn manual_registry(settings: BreakerSettings) -> (BreakerRegistry, ManualClock) {
    let clock = ManualClock::new();
    let registry = BreakerRegistry::with_clock(ConfigResolver::new(settings), Arc::new(clock.clone()));
    (registry, clock)
}

/// Write `contents` to a fresh file under the system temp directory.
pub fn write_settings(test_name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("breakwater-{}-{}", test_name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("breakwater.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

/// Every event currently buffered.
pub fn drain(rx: &mut broadcast::Receiver<BreakerEvent>) -> Vec<BreakerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
