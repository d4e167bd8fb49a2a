//! Model management: list, delete, and the streaming pull.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::ollama::ModelSummary;
use crate::routes::{ndjson_reject, ndjson_stream_response};
use crate::schemas::models::{DeleteModelRequest, PullModelRequest};
use crate::state::AppState;
use crate::stream::relay::{self, Endpoint, RelayOutcome};
use crate::stream::{StreamEvent, event_channel};

#[derive(OpenApi)]
#[openapi(
    paths(list_models, list_running, delete_model, pull_model),
    components(schemas(ModelSummary, DeleteModelRequest, PullModelRequest))
)]
pub struct ModelsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/running", get(list_running))
        .route("/models/delete", post(delete_model))
        .route("/models/pull", post(pull_model))
}

/// Models installed on the daemon's disk.
#[utoipa::path(
    get,
    path = "/api/models",
    tag = "models",
    responses(
        (status = 200, description = "Installed models", body = [ModelSummary]),
        (status = 502, description = "Daemon unreachable or refused")
    )
)]
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModelSummary>>, ServerError> {
    Ok(Json(state.ollama.list_models().await?))
}

/// Models currently loaded in the daemon's memory.
#[utoipa::path(
    get,
    path = "/api/models/running",
    tag = "models",
    responses(
        (status = 200, description = "Loaded models", body = [ModelSummary]),
        (status = 502, description = "Daemon unreachable or refused")
    )
)]
pub async fn list_running(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModelSummary>>, ServerError> {
    Ok(Json(state.ollama.list_running().await?))
}

/// Remove an installed model.
#[utoipa::path(
    post,
    path = "/api/models/delete",
    tag = "models",
    request_body = DeleteModelRequest,
    responses(
        (status = 200, description = "Model deleted"),
        (status = 400, description = "Missing model name"),
        (status = 502, description = "Daemon unreachable or refused")
    )
)]
pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteModelRequest>,
) -> Result<Json<Value>, ServerError> {
    let model = req.model.trim();
    if model.is_empty() {
        return Err(ServerError::BadRequest("model must not be empty".into()));
    }
    state.ollama.delete_model(model).await?;
    info!(model = %model, "model deleted");
    Ok(Json(json!({ "deleted": true, "model": model })))
}

/// Download a model, streaming progress as NDJSON.
///
/// One JSON object per line: progress lines carry `status` plus byte
/// counters (and an integer `percent` when the total is known), and the
/// stream always ends with exactly one `{"done":true}` or
/// `{"error":...,"done":true}` line.
#[utoipa::path(
    post,
    path = "/api/models/pull",
    tag = "models",
    request_body = PullModelRequest,
    responses(
        (status = 200, description = "NDJSON progress stream", content_type = "application/x-ndjson"),
        (status = 400, description = "Missing model name, as a single NDJSON error line", content_type = "application/x-ndjson")
    )
)]
pub async fn pull_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PullModelRequest>,
) -> Response {
    let model = req.model.trim().to_owned();
    if model.is_empty() {
        return ndjson_reject(StatusCode::BAD_REQUEST, "missing model name");
    }

    info!(model = %model, "pulling model");
    let request = state.ollama.pull_request(&model, req.insecure);
    let (sink, rx) = event_channel();

    tokio::spawn(async move {
        let outcome = relay::run(request, Endpoint::Pull, &sink, None).await;
        match outcome {
            RelayOutcome::Completed => {
                info!(model = %model, "model pull finished");
                let _ = sink.accept(StreamEvent::Done).await;
            }
            RelayOutcome::Failed { reason } => {
                warn!(model = %model, reason = %reason, "model pull failed");
                let _ = sink.accept(StreamEvent::Error { message: reason }).await;
            }
            RelayOutcome::Cancelled => {
                debug!(model = %model, "model pull cancelled by client");
            }
        }
    });

    ndjson_stream_response(rx)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use axum::body::to_bytes;

    use super::*;

    #[tokio::test]
    async fn pull_with_blank_model_is_one_error_line() {
        let response = ndjson_reject(StatusCode::BAD_REQUEST, "missing model name");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/x-ndjson")
        );

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert_eq!(text.lines().count(), 1);
        let line: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(line["error"], "missing model name");
        assert_eq!(line["done"], true);
    }
}
