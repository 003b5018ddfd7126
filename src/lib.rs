//! # Relay
//!
//! Real-time message relay: WebSocket clients exchange JSON envelopes through a
//! central hub, either globally or inside private rooms.
//!
//! ## Features
//!
//! - **Global broadcast**: Envelopes relayed to every connected client
//! - **Rooms**: Create, join, quick-join and leave private broadcast groups
//! - **Lock-free hub**: One command loop owns all membership state
//! - **Liveness**: Ping/pong keepalive with idle and write deadlines
//! - **Bounded queues**: Slow consumers are evicted instead of stalling the hub
//!
//! ## Modules
//!
//! - [`websocket`]: Hub, sessions and the wire envelope
//! - [`api`]: HTTP server with Axum
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::{serve, AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let api_config = config.api_config();
//!
//!     let state = AppState::new(api_config.clone(), config.session_config(), config.hub_config());
//!     serve(state, &api_config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod websocket;

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use websocket::{
    Envelope, Hub, HubConfig, HubError, HubHandle, HubStats, Intent, SessionConfig,
    SessionError, SessionId, websocket_handler,
};

pub use config::{Config, ConfigError, HubSettings, LoggingConfig, ServerSettings, SessionSettings};
