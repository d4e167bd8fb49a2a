//! Chat sessions and the streaming chat endpoint.
//!
//! `POST /api/chat/stream` is the write path of the whole application:
//! persist the user's turn, replay the session transcript to the daemon,
//! relay the reply token by token, persist the assistant's turn, and only
//! then emit the terminal line.  A browser that reconnects after a crash
//! mid-reply therefore finds everything that was generated before the cut.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, error, info, warn};
use utoipa::OpenApi;

use crate::db::{
    ChatMessage, ChatSession, ChatStore, NEW_CHAT_TITLE, ROLE_USER, STATUS_COMPLETE, SessionStore,
};
use crate::error::ServerError;
use crate::ollama::{ChatOptions, ChatPayloadMessage};
use crate::routes::{ndjson_reject, ndjson_stream_response};
use crate::schemas::chat::{
    CreateSessionRequest, MessageResponse, SessionResponse, SetModelRequest, StreamChatRequest,
};
use crate::state::AppState;
use crate::stream::accumulator::TurnAccumulator;
use crate::stream::relay::{self, Endpoint, RelayOutcome};
use crate::stream::{EventSink, StreamEvent, event_channel};

/// Fallback model for new sessions when the daemon cannot be asked.
const DEFAULT_MODEL: &str = "llama3.2:latest";

/// First-line-of-message titles are clipped to this many characters.
const TITLE_MAX_CHARS: usize = 80;

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session,
        list_sessions,
        list_session_messages,
        set_session_model,
        stream_chat
    ),
    components(schemas(
        CreateSessionRequest,
        SessionResponse,
        MessageResponse,
        SetModelRequest,
        StreamChatRequest
    ))
)]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/sessions", post(create_session).get(list_sessions))
        .route("/chat/sessions/{id}/messages", get(list_session_messages))
        .route("/chat/sessions/{id}/model", post(set_session_model))
        .route("/chat/stream", post(stream_chat))
}

/// Create a chat session.
///
/// Without an explicit model the first installed model is used, or a
/// well-known default when the daemon cannot be asked right now.
#[utoipa::path(
    post,
    path = "/api/chat/sessions",
    tag = "chat",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let model = match req.model.filter(|m| !m.trim().is_empty()) {
        Some(model) => model.trim().to_owned(),
        None => default_model(&state).await,
    };
    let title = req.title.filter(|t| !t.trim().is_empty());

    let session = ChatSession::new(title, model);
    state.store.create_session(session.clone()).await?;
    info!(session_id = %session.id, model = %session.model, "chat session created");
    Ok(Json(session.to_response()))
}

/// All sessions, newest first.
#[utoipa::path(
    get,
    path = "/api/chat/sessions",
    tag = "chat",
    responses(
        (status = 200, description = "Sessions", body = [SessionResponse])
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionResponse>>, ServerError> {
    let sessions = state.store.list_sessions().await?;
    Ok(Json(sessions.iter().map(|s| s.to_response()).collect()))
}

/// Full transcript of one session, oldest first.
#[utoipa::path(
    get,
    path = "/api/chat/sessions/{id}/messages",
    tag = "chat",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Transcript", body = [MessageResponse]),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn list_session_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ServerError> {
    let session = state
        .store
        .get_session(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("session {id} not found")))?;
    let messages = state.store.list_messages(&session.id).await?;
    Ok(Json(messages.iter().map(|m| m.to_response()).collect()))
}

/// Switch the model a session talks to.  Takes effect from the next turn.
#[utoipa::path(
    post,
    path = "/api/chat/sessions/{id}/model",
    tag = "chat",
    params(("id" = String, Path, description = "Session id")),
    request_body = SetModelRequest,
    responses(
        (status = 200, description = "Updated session", body = SessionResponse),
        (status = 400, description = "Blank model"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn set_session_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetModelRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let model = req.model.trim();
    if model.is_empty() {
        return Err(ServerError::BadRequest("model must not be empty".into()));
    }
    let mut session = state
        .store
        .get_session(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("session {id} not found")))?;
    state.store.update_session_model(&session.id, model).await?;
    session.model = model.to_owned();
    Ok(Json(session.to_response()))
}

/// Send one user message and stream the assistant's reply as NDJSON.
///
/// Delta lines are `{"delta":...,"done":false}`; the stream ends with
/// exactly one `{"done":true}` or `{"error":...,"done":true}` line, which
/// is only written after the assistant turn has been persisted.
#[utoipa::path(
    post,
    path = "/api/chat/stream",
    tag = "chat",
    request_body = StreamChatRequest,
    responses(
        (status = 200, description = "NDJSON token stream", content_type = "application/x-ndjson"),
        (status = 400, description = "Missing session_id or content, as a single NDJSON error line", content_type = "application/x-ndjson"),
        (status = 404, description = "Unknown session, as a single NDJSON error line", content_type = "application/x-ndjson")
    )
)]
pub async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StreamChatRequest>,
) -> Response {
    let session_id = req.session_id.trim();
    let content = req.content.trim().to_owned();
    if session_id.is_empty() || content.is_empty() {
        return ndjson_reject(StatusCode::BAD_REQUEST, "missing session_id or content");
    }

    let session = match state.store.get_session(session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return ndjson_reject(StatusCode::NOT_FOUND, "unknown session"),
        Err(e) => {
            error!(error = %e, "failed to load session");
            return ndjson_reject(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    };

    // The user's turn is durable before the first upstream byte is read;
    // whatever happens to the stream, the question is never lost.
    let user_turn = ChatMessage::new(&session.id, ROLE_USER, content.clone(), STATUS_COMPLETE);
    if let Err(e) = state.store.append_message(user_turn).await {
        error!(error = %e, session_id = %session.id, "failed to persist user turn");
        return ndjson_reject(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
    }

    // Full transcript as daemon payload, the turn just written included.
    let history = match state.store.list_messages(&session.id).await {
        Ok(history) => history,
        Err(e) => {
            error!(error = %e, session_id = %session.id, "failed to load transcript");
            return ndjson_reject(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    };
    let payload: Vec<ChatPayloadMessage> = history
        .iter()
        .map(|m| ChatPayloadMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();

    let opts = ChatOptions {
        options: req.options,
        keep_alive: req.keep_alive,
        format: req.format,
    };
    let request = state.ollama.chat_request(&session.model, &payload, &opts);

    info!(session_id = %session.id, model = %session.model, turns = payload.len(), "chat stream started");
    let (sink, rx) = event_channel();
    tokio::spawn(drive_chat(state.clone(), session, content, request, sink));

    ndjson_stream_response(rx)
}

/// Run one chat relay to completion and settle its turn.
///
/// Commit strictly precedes the terminal line.  `TurnAccumulator::commit`
/// consumes the accumulator, so whatever path this function takes there is
/// exactly one durable write for the turn.
async fn drive_chat(
    state: Arc<AppState>,
    session: ChatSession,
    user_content: String,
    request: reqwest::RequestBuilder,
    sink: EventSink,
) {
    let mut acc = TurnAccumulator::new(session.id.clone());
    let outcome = relay::run(request, Endpoint::Chat, &sink, Some(&mut acc)).await;
    let committed = acc.commit(state.store.as_ref(), &outcome).await;

    match outcome {
        RelayOutcome::Completed => match committed {
            Ok(status) => {
                debug!(session_id = %session.id, ?status, "assistant turn committed");
                maybe_retitle(&state, &session, &user_content).await;
                let _ = sink.accept(StreamEvent::Done).await;
            }
            Err(e) => {
                error!(error = %e, session_id = %session.id, "failed to persist assistant turn");
                let _ = sink
                    .accept(StreamEvent::Error {
                        message: "failed to persist assistant reply".into(),
                    })
                    .await;
            }
        },
        RelayOutcome::Failed { reason } => {
            if let Err(e) = committed {
                error!(error = %e, session_id = %session.id, "failed to persist partial assistant turn");
            }
            warn!(session_id = %session.id, reason = %reason, "chat stream failed");
            let _ = sink.accept(StreamEvent::Error { message: reason }).await;
        }
        RelayOutcome::Cancelled => {
            if let Err(e) = committed {
                error!(error = %e, session_id = %session.id, "failed to persist partial assistant turn");
            }
            debug!(session_id = %session.id, "chat stream cancelled by client");
            // Nobody is listening; no terminal line to send.
        }
    }
}

/// Replace the placeholder title with the first line of the first message.
async fn maybe_retitle(state: &AppState, session: &ChatSession, user_content: &str) {
    if session.title != NEW_CHAT_TITLE {
        return;
    }
    let title: String = user_content
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect();
    if title.is_empty() {
        return;
    }
    if let Err(e) = state.store.update_session_title(&session.id, &title).await {
        warn!(error = %e, session_id = %session.id, "failed to update session title");
    }
}

/// First installed model, or [`DEFAULT_MODEL`] when the daemon is silent.
async fn default_model(state: &AppState) -> String {
    match state.ollama.list_models().await {
        Ok(models) => models
            .into_iter()
            .map(|m| m.name)
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
        Err(e) => {
            debug!(error = %e, "daemon not asked for a default model");
            DEFAULT_MODEL.to_owned()
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::time::Duration;

    use axum::body::to_bytes;

    use crate::config::Config;
    use crate::db::sqlite::SqliteStore;
    use crate::ollama::OllamaClient;

    use super::*;

    /// State with an in-memory store and a daemon URL nothing listens on.
    async fn test_state() -> Arc<AppState> {
        let config = Config {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            ollama_url: "http://127.0.0.1:1".into(),
            ollama_timeout_secs: 1,
            log_level: "info".into(),
            log_json: false,
            enable_swagger: false,
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
    async fn create_session_falls_back_to_the_default_model() {
        let state = test_state().await;
        let Json(session) = create_session(
            State(state.clone()),
            Json(CreateSessionRequest {
                model: None,
                title: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(session.model, DEFAULT_MODEL);
        assert_eq!(session.title, NEW_CHAT_TITLE);
        assert!(
            state
                .store
                .get_session(&session.id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn create_session_keeps_an_explicit_model_and_title() {
        let state = test_state().await;
        let Json(session) = create_session(
            State(state),
            Json(CreateSessionRequest {
                model: Some("qwen3:8b".into()),
                title: Some("Benchmarks".into()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(session.model, "qwen3:8b");
        assert_eq!(session.title, "Benchmarks");
    }

    #[tokio::test]
    async fn sessions_list_newest_first() {
        let state = test_state().await;
        for model in ["a", "b"] {
            create_session(
                State(state.clone()),
                Json(CreateSessionRequest {
                    model: Some(model.into()),
                    title: None,
                }),
            )
            .await
            .unwrap();
            // Distinct created_at values.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let Json(sessions) = list_sessions(State(state)).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].model, "b");
        assert_eq!(sessions[1].model, "a");
    }

    #[tokio::test]
    async fn set_model_rejects_blank_and_unknown() {
        let state = test_state().await;

        let err = set_session_model(
            State(state.clone()),
            Path("whatever".into()),
            Json(SetModelRequest { model: "  ".into() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));

        let err = set_session_model(
            State(state),
            Path("no-such-session".into()),
            Json(SetModelRequest {
                model: "qwen3:8b".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_model_updates_the_session() {
        let state = test_state().await;
        let Json(session) = create_session(
            State(state.clone()),
            Json(CreateSessionRequest {
                model: Some("a".into()),
                title: None,
            }),
        )
        .await
        .unwrap();

        let Json(updated) = set_session_model(
            State(state.clone()),
            Path(session.id.clone()),
            Json(SetModelRequest { model: "b".into() }),
        )
        .await
        .unwrap();
        assert_eq!(updated.model, "b");

        let stored = state.store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.model, "b");
    }

    #[tokio::test]
    async fn messages_of_unknown_session_is_404() {
        let state = test_state().await;
        let err = list_session_messages(State(state), Path("missing".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn stream_chat_rejects_blank_input_with_one_line() {
        let state = test_state().await;
        let response = stream_chat(
            State(state),
            Json(StreamChatRequest {
                session_id: "s".into(),
                content: "   ".into(),
                options: None,
                keep_alive: None,
                format: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert_eq!(text.lines().count(), 1);
        let line: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(line["done"], true);
        assert!(line["error"].as_str().unwrap().contains("content"));
    }

    #[tokio::test]
    async fn stream_chat_rejects_unknown_session_with_404() {
        let state = test_state().await;
        let response = stream_chat(
            State(state),
            Json(StreamChatRequest {
                session_id: "no-such".into(),
                content: "hello".into(),
                options: None,
                keep_alive: None,
                format: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
