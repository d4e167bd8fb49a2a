//! Unified server error type.
//!
//! Every JSON handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! The streaming endpoints do **not** use this type once their response has
//! started; mid-stream failures become terminal NDJSON lines instead (see
//! [`crate::routes::chat`]).
//!
//! **Security note:** Database errors are logged with full detail but only a
//! generic message is returned to the caller so that file paths, SQL, or
//! other implementation details never leak to clients.  Daemon errors are
//! the exception: "cannot reach ollama" is precisely what the person at the
//! dashboard needs to see.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::ollama::OllamaError;

/// All errors that can occur in the skiff-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the Ollama daemon client.
    #[error("upstream error: {0}")]
    Upstream(#[from] OllamaError),

    /// Propagated from the SQLite (or other) store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),

            // The daemon being down or refusing a request is actionable for
            // the user, so its message goes through as a bad-gateway.
            ServerError::Upstream(e) => {
                error!(error = %e, "ollama daemon error");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }

            // Internal errors: log the full detail, return a generic message.
            ServerError::Database(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let response = ServerError::NotFound("session x not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ServerError::BadRequest("model must not be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn internal_errors_are_masked() {
        use http_body_util::BodyExt;

        let response =
            ServerError::Internal("password=hunter2 leaked into a panic".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "internal server error");
    }

    #[tokio::test]
    async fn upstream_errors_map_to_bad_gateway() {
        let err = OllamaError::Status {
            status: StatusCode::NOT_FOUND,
            snippet: "model not found".into(),
        };
        let response = ServerError::Upstream(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
