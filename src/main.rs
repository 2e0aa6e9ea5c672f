//! Turnstream - streaming session client
//!
#![doc = "Main entry point for the turnstream command-line client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use turnstream::cli::{Cli, Commands};
use turnstream::commands;
use turnstream::commands::chat::TurnArgs;
use turnstream::config::{Config, LoggingConfig};
use turnstream::engine::SubmitTarget;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; its warnings go to stderr until tracing is set up
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load_reporting(config_path, &cli, std::io::stderr)?;

    init_tracing(&config.logging);

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat {
            persona,
            message,
            session,
            name,
            no_stream,
        } => {
            tracing::debug!("Submitting to persona {}", persona);
            let args = TurnArgs {
                target: SubmitTarget::Persona {
                    persona_id: persona,
                },
                message,
                session,
                name,
                participants: Vec::new(),
                no_stream,
            };
            commands::chat::run_turn(config, args).await?;
            Ok(())
        }
        Commands::Agency {
            agency,
            seat,
            message,
            session,
            goal,
            participants,
            no_stream,
        } => {
            tracing::debug!("Submitting to agency {} seat {}", agency, seat);
            let args = TurnArgs {
                target: SubmitTarget::AgencySeat {
                    agency_id: agency,
                    seat_id: seat,
                    goal,
                },
                message,
                session,
                name: None,
                participants,
                no_stream,
            };
            commands::chat::run_turn(config, args).await?;
            Ok(())
        }
        Commands::Sessions { command } => {
            commands::sessions::handle_sessions(config, command).await?;
            Ok(())
        }
    }
}

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over the configured level. Logs go to stderr so streamed
/// replies on stdout stay clean.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("turnstream={}", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
