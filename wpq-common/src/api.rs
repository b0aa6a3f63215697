//! HTTP API request/response types shared by server and client

use serde::{Deserialize, Serialize};

use crate::events::EventEnvelope;

/// POST /api/sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
}

/// POST /api/sessions/:code/attendees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSessionRequest {
    pub name: String,
    #[serde(default)]
    pub generation: Option<String>,
}

/// PUT /api/sessions/:code/attendees/:id/responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponseRequest {
    pub question_index: u32,
    pub answer_id: String,
}

/// GET /api/sessions/:code/poll query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollQuery {
    /// Return events with a sequence number strictly greater than this
    #[serde(default)]
    pub since: Option<u64>,
}

/// GET /api/sessions/:code/poll response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub events: Vec<EventEnvelope>,
    /// Highest sequence number known to the server for this session
    pub latest_seq: u64,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}
