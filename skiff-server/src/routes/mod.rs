//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI document (disable with `SKIFF_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - The `/api` routes: daemon status, model management, chat sessions and
//!   the two streaming endpoints

pub mod chat;
pub mod doc;
mod health;
mod models;
mod status;

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
};
use tokio_stream::{StreamExt as _, wrappers::ReceiverStream};
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors, trace};
use crate::state::AppState;
use crate::stream::{EventReceiver, StreamEvent};

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(status::router())
                .merge(models::router())
                .merge(chat::router()),
        );

    let mut app = Router::new().merge(api_router);

    // ── Swagger UI ────────────────────────────────────────────────────────────
    // Enabled by default; disable with SKIFF_ENABLE_SWAGGER=false if the
    // console is ever exposed beyond loopback.
    let api_doc = doc::get_docs();

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}

// ── NDJSON responses ──────────────────────────────────────────────────────────

pub(crate) const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Wrap the relay's receiving half into a streaming NDJSON response.
///
/// Each event becomes one line the moment it is received; the body ends
/// when the sending half is dropped.  `Cache-Control: no-cache` keeps
/// proxies from buffering the stream into uselessness.
pub(crate) fn ndjson_stream_response(rx: EventReceiver) -> Response {
    let body = Body::from_stream(
        ReceiverStream::new(rx)
            .map(|event| Ok::<_, Infallible>(Bytes::from(event.to_ndjson_line()))),
    );
    ndjson_response(StatusCode::OK, body)
}

/// Reject a streaming request before any relay starts: a single terminal
/// error line with the given status.
pub(crate) fn ndjson_reject(status: StatusCode, message: &str) -> Response {
    let line = StreamEvent::Error {
        message: message.to_owned(),
    }
    .to_ndjson_line();
    ndjson_response(status, Body::from(line))
}

fn ndjson_response(status: StatusCode, body: Body) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::time::Duration;

    use axum::http::Request;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::db::sqlite::SqliteStore;
    use crate::ollama::OllamaClient;

    use super::*;

    async fn test_state(enable_swagger: bool) -> Arc<AppState> {
        let config = Config {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            ollama_url: "http://127.0.0.1:1".into(),
            ollama_timeout_secs: 1,
            log_level: "info".into(),
            log_json: false,
            enable_swagger,
            cors_allowed_origins: None,
        };
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let ollama = OllamaClient::new(&config.ollama_url, Duration::from_secs(1));
        Arc::new(AppState {
            config: Arc::new(config),
            store: Arc::new(store),
            ollama,
        })
    }

    #[tokio::test]
    async fn router_serves_health_and_stamps_a_trace_id() {
        let app = build(test_state(false).await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-trace-id"));
    }

    #[tokio::test]
    async fn router_echoes_a_well_formed_caller_trace_id() {
        let app = build(test_state(false).await);
        let id = Uuid::new_v4().to_string();
        let response = app
            .oneshot(
                Request::get("/health")
                    .header("x-trace-id", &id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let echoed = response.headers().get("x-trace-id").unwrap();
        assert_eq!(echoed.to_str().unwrap(), id);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let app = build(test_state(false).await);
        let response = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_document_is_gated_by_config() {
        let app = build(test_state(true).await);
        let response = app
            .oneshot(
                Request::get("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let app = build(test_state(false).await);
        let response = app
            .oneshot(
                Request::get("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
