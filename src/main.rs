//! Copilot Trust Gateway - trust boundary for chat extensions
//!
//! Verifies platform request signatures and runs the end-user OAuth flow.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use copilot_trust_gateway::{
    Error,
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    keys::{KeyFetcher, KeySource},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    let result = match cli.command {
        Some(Command::Keys) => run_keys(&cli).await,
        Some(Command::CheckConfig) => run_check_config(&cli),
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Print the current signing key's identity
async fn run_keys(cli: &Cli) -> Result<(), Error> {
    let config = load_config(cli)?;
    let fetcher = KeyFetcher::new(&config.keys)?;
    info!(url = fetcher.url(), "Fetching signing keys");

    let key = fetcher.fetch().await?;
    println!("Identifier:  {}", key.identifier().unwrap_or("-"));
    println!("Algorithm:   {}", key.algorithm().as_str());
    println!("Fingerprint: {}", key.fingerprint());
    Ok(())
}

/// Validate configuration and print a redacted summary
fn run_check_config(cli: &Cli) -> Result<(), Error> {
    let config = load_config(cli)?;
    config.validate()?;

    println!("{}", serde_json::to_string_pretty(&config.redacted_summary()).map_err(|e| Error::Internal(e.to_string()))?);
    println!("\nConfiguration OK");
    Ok(())
}

/// Run the gateway server
async fn run_server(cli: &Cli) -> Result<(), Error> {
    let config = load_config(cli)?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        upstream = config.agent.upstream_url.is_some(),
        "Starting Copilot Trust Gateway"
    );

    let gateway = Gateway::new(config)?;
    gateway.run().await?;

    info!("Gateway shutdown complete");
    Ok(())
}
