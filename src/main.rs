//! TalkAI - customer-support chat service
//!
//! Main entry point for the TalkAI API server.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use talkai::cli::{Cli, Commands};
use talkai::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                tracing::debug!("Using bind override from CLI: {}", bind);
                config.server.bind = bind;
            }

            // Fail fast on missing required values before binding
            config.validate()?;

            tracing::info!("Starting TalkAI server");
            talkai::server::serve(config).await?;
            Ok(())
        }
        Commands::Check => {
            config.validate()?;
            println!("Configuration OK");
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "talkai=debug" } else { "talkai=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
