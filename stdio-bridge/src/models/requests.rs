use serde::{Deserialize, Serialize};

use stdio_bridge_auth::FlowPhase;

// POST /stream?sessionId=
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    pub session_id: Option<String>,
}

// GET /status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub last_phase: FlowPhase,
    pub active_sessions: usize,
}

// Health check
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
