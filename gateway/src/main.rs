// Parley Gateway
// Main entry point for the parley binary

use clap::Parser;
use parley_gateway::api;
use parley_gateway::cli::{Cli, Command, ConfigAction};
use parley_gateway::config::Config;
use parley_gateway::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    tracing::info!("Parley Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize telemetry with the CLI override or config-driven level
    // (only takes effect if RUST_LOG env var is not set)
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    match cli.command {
        Command::Serve => {
            tracing::info!("Starting gateway...");
            api::serve(config).await
        }

        Command::Status => {
            let url = format!("http://{}:{}/health", config.server.bind, config.server.port);
            match reqwest::get(&url).await {
                Ok(response) if response.status().is_success() => {
                    println!("Gateway is running at {}", url);
                    Ok(())
                }
                Ok(response) => {
                    println!("Gateway responded with status {}", response.status());
                    Ok(())
                }
                Err(_) => {
                    println!("Gateway is not running.");
                    Ok(())
                }
            }
        }

        Command::Config { action } => match action {
            ConfigAction::Show => {
                let rendered = toml::to_string_pretty(&config)?;
                println!("{}", rendered);
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", Config::default_config_path()?.display());
                Ok(())
            }
        },
    }
}
