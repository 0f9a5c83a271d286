//! Request and response types for the daemon's HTTP status surface (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// Error body for the on-demand assessment endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: String,
}
