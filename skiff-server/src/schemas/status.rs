use serde::Serialize;
use utoipa::ToSchema;

use crate::ollama::ModelSummary;

/// Snapshot of the daemon returned by `GET /api/status`.
///
/// Always `200`: a dead daemon is a state to display, not an HTTP error.
/// When `error` is set the remaining fields hold whatever was gathered
/// before the failure.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Daemon this server is configured to talk to.
    pub ollama_url: String,
    pub ollama_version: Option<String>,
    /// Models installed on disk.
    pub models: Vec<ModelSummary>,
    /// Models currently loaded in memory.
    pub running: Vec<ModelSummary>,
    pub error: Option<String>,
}
