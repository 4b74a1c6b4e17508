//! Command-line interface definition for TalkAI
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for serving the chat API and checking configuration.

use clap::{Parser, Subcommand};

/// TalkAI - customer-support chat service for e-commerce stores
///
/// Serves the chat widget API: message persistence, bounded conversation
/// history, and LLM completions relayed as JSON or SSE streams.
#[derive(Parser, Debug, Clone)]
#[command(name = "talkai")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for TalkAI
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the bind address from config (e.g. 0.0.0.0:8787)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Load and validate the configuration, then exit
    Check,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::try_parse_from(["talkai", "serve"]);
        assert!(cli.is_ok());
        let cli = cli.unwrap();
        assert!(matches!(cli.command, Commands::Serve { bind: None }));
        assert_eq!(cli.config, "config/config.yaml");
    }

    #[test]
    fn test_cli_parse_serve_with_bind() {
        let cli = Cli::try_parse_from(["talkai", "serve", "--bind", "0.0.0.0:9000"]);
        assert!(cli.is_ok());
        if let Commands::Serve { bind } = cli.unwrap().command {
            assert_eq!(bind, Some("0.0.0.0:9000".to_string()));
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn test_cli_parse_check() {
        let cli = Cli::try_parse_from(["talkai", "check"]);
        assert!(cli.is_ok());
        assert!(matches!(cli.unwrap().command, Commands::Check));
    }

    #[test]
    fn test_cli_parse_with_config_and_verbose() {
        let cli = Cli::try_parse_from(["talkai", "--config", "custom.yaml", "-v", "check"]);
        assert!(cli.is_ok());
        let cli = cli.unwrap();
        assert_eq!(cli.config, "custom.yaml");
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_parse_missing_command() {
        assert!(Cli::try_parse_from(["talkai"]).is_err());
    }

    #[test]
    fn test_cli_parse_invalid_command() {
        assert!(Cli::try_parse_from(["talkai", "invalid"]).is_err());
    }
}
