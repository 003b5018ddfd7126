//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints, serialized to JSON.

use serde::{Deserialize, Serialize};

/// Full health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" while the hub answers
    pub status: String,
    /// Registered sessions
    pub sessions: usize,
    /// Rooms with at least one member
    pub rooms: usize,
    /// Seconds since the server started
    pub uptime_seconds: u64,
    /// Crate version
    pub version: String,
}
