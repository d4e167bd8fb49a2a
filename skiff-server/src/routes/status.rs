//! Daemon status endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::schemas::status::StatusResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_status), components(schemas(StatusResponse)))]
pub struct StatusApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/status", get(get_status))
}

/// Snapshot of the configured Ollama daemon.
///
/// Version, installed models, and loaded models, gathered in that order;
/// the first failure stops the gathering and lands in `error`.  The
/// response is `200` either way so the dashboard can render the outage
/// instead of a blank page.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "status",
    responses(
        (status = 200, description = "Daemon status, reachable or not", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mut out = StatusResponse {
        // The normalized URL the client actually talks to.
        ollama_url: state.ollama.base_url().to_owned(),
        ollama_version: None,
        models: Vec::new(),
        running: Vec::new(),
        error: None,
    };

    match state.ollama.version().await {
        Ok(version) => out.ollama_version = Some(version),
        Err(e) => {
            out.error = Some(e.to_string());
            return Json(out);
        }
    }
    match state.ollama.list_models().await {
        Ok(models) => out.models = models,
        Err(e) => {
            out.error = Some(e.to_string());
            return Json(out);
        }
    }
    match state.ollama.list_running().await {
        Ok(running) => out.running = running,
        Err(e) => out.error = Some(e.to_string()),
    }

    Json(out)
}
