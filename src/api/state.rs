//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::websocket::{Hub, HubConfig, HubHandle, HubStats, SessionConfig};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running hub
    pub hub: HubHandle,
    /// Settings applied to every new session
    pub session: Arc<SessionConfig>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState with a freshly spawned hub
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ApiConfig, session: SessionConfig, hub_config: HubConfig) -> Self {
        Self::with_hub(Hub::spawn(hub_config), config, session)
    }

    /// Create AppState around an existing hub
    pub fn with_hub(hub: HubHandle, config: ApiConfig, session: SessionConfig) -> Self {
        Self {
            hub,
            session: Arc::new(session),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot of the hub registry, `None` if the hub has stopped
    pub async fn hub_stats(&self) -> Option<HubStats> {
        self.hub.stats().await.ok()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
