//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Copilot Trust Gateway - signature verification and OAuth for chat extensions
#[derive(Parser, Debug)]
#[command(name = "copilot-trust-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "COPILOT_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "COPILOT_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "COPILOT_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "COPILOT_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "COPILOT_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Fetch the platform's current signing key and print its fingerprint
    Keys,

    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["copilot-trust-gateway"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_subcommands_and_overrides() {
        let cli = Cli::try_parse_from([
            "copilot-trust-gateway",
            "--port",
            "8080",
            "check-config",
            "--config",
            "gateway.yaml",
        ])
        .unwrap();

        assert_eq!(cli.command, Some(Command::CheckConfig));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.config, Some(PathBuf::from("gateway.yaml")));
    }

    #[test]
    fn keys_subcommand() {
        let cli = Cli::try_parse_from(["copilot-trust-gateway", "keys", "--log-format", "json"]).unwrap();
        assert_eq!(cli.command, Some(Command::Keys));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }
}
