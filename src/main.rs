//! Breakwater operator CLI.
//!
//! ```text
//! breakwater --config breakers.toml validate
//! breakwater --config breakers.toml resolve payments
//! breakwater --config breakers.toml resolve-config default
//! breakwater --config breakers.toml list
//! breakwater --config breakers.toml watch
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use breakwater::breaker::PredicateRegistry;
use breakwater::config::watcher::ConfigWatcher;
use breakwater::config::{load_settings, BreakerSettings, ConfigResolver};
use breakwater::observability::{logging, metrics};
use breakwater::BreakerRegistry;

#[derive(Parser)]
#[command(name = "breakwater")]
#[command(about = "Inspect and run circuit breaker configurations", long_about = None)]
struct Cli {
    /// Settings file (TOML).
    #[arg(short, long, default_value = "breakwater.toml")]
    config: PathBuf,

    /// Overrides `observability.log_level`.
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every backend and shared configuration
    Validate,
    /// Print the resolved configuration of a backend
    Resolve { backend: String },
    /// Print a resolved shared configuration
    ResolveConfig { name: String },
    /// List configured backends and shared configurations
    List,
    /// Run breakers for every backend and reload on file changes
    Watch,
}

#[derive(Serialize)]
struct Listing {
    aspect_order: i32,
    backends: Vec<String>,
    configs: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.observability.log_level.clone());
    logging::init_logging(&level);

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: BreakerSettings) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Validate => {
            ConfigResolver::new(settings.clone()).validate_all()?;
            println!(
                "OK: {} backend(s), {} shared configuration(s)",
                settings.backends.len(),
                settings.configs.len()
            );
        }
        Commands::Resolve { backend } => {
            let config = ConfigResolver::new(settings).resolve(&backend)?;
            println!("{}", serde_json::to_string_pretty(&*config)?);
        }
        Commands::ResolveConfig { name } => {
            let config = ConfigResolver::new(settings).resolve_named(&name)?;
            println!("{}", serde_json::to_string_pretty(&*config)?);
        }
        Commands::List => {
            let mut backends: Vec<String> = settings.backends.keys().cloned().collect();
            backends.sort();
            let mut configs: Vec<String> = settings.configs.keys().cloned().collect();
            configs.sort();
            let listing = Listing {
                aspect_order: settings.circuit_breaker_aspect_order,
                backends,
                configs,
            };
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Commands::Watch => watch(cli.config, settings).await?,
    }
    Ok(())
}

async fn watch(path: PathBuf, settings: BreakerSettings) -> Result<(), Box<dyn std::error::Error>> {
    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut backends: Vec<String> = settings.backends.keys().cloned().collect();
    backends.sort();
    let registry = BreakerRegistry::from_settings(settings, PredicateRegistry::new())?;
    for backend in &backends {
        let breaker = registry.get_or_create(backend)?;
        tracing::info!(breaker = %backend, state = %breaker.state(), "Breaker ready");
    }

    let (watcher, mut updates) = ConfigWatcher::new(&path);
    let _watcher = watcher.run()?;

    loop {
        tokio::select! {
            Some(settings) = updates.recv() => {
                match registry.reload(settings) {
                    Ok(changed) => log_summary(&registry, changed),
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected new settings, keeping current configuration");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    log_summary(&registry, 0);
    Ok(())
}

fn log_summary(registry: &BreakerRegistry, changed: usize) {
    let summary: Vec<String> = registry
        .summary()
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(state, count)| format!("{}={}", state, count))
        .collect();
    tracing::info!(breakers = registry.len(), changed, states = %summary.join(","), "Registry summary");
}
