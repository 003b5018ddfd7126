//! Relay Server
//!
//! Run with: cargo run -- serve
//!
//! # Configuration
//!
//! Loaded from `--config`, or the first of `~/.config/relay/config.toml`,
//! `/etc/relay/config.toml` and `./config.toml`. Environment variables
//! (`RELAY_HOST`, `RELAY_PORT`, `RELAY_MAX_MESSAGE_SIZE`, `RELAY_LOG_LEVEL`,
//! `RELAY_LOG_FORMAT`) override file values; `RUST_LOG` overrides the level.

use anyhow::Context;
use clap::{Parser, Subcommand};
use relay::config::{generate_default_config, Config, LoggingConfig};
use relay::{serve, AppState};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time WebSocket message relay with rooms")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print a commented default config file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = match config {
                Some(path) => Config::load_with_env(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => Config::load_default(),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            init_tracing(&config.logging);
            run(config).await
        }
        Commands::InitConfig => {
            print!("{}", generate_default_config());
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("relay={},tower_http=debug", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting relay v{}", env!("CARGO_PKG_VERSION"));

    let api_config = config.api_config();
    let session_config = config.session_config();
    tracing::info!(
        max_message_size = session_config.max_message_size,
        send_buffer = session_config.send_buffer,
        ping_period = ?session_config.ping_period,
        pong_wait = ?session_config.pong_wait,
        "Session settings"
    );

    let state = AppState::new(api_config.clone(), session_config, config.hub_config());
    serve(state, &api_config).await.context("server failed")?;

    tracing::info!("Relay stopped");
    Ok(())
}
