//! Database abstraction layer.
//!
//! [`SessionStore`] and [`ChatStore`] define the interface the HTTP layer and
//! the stream accumulator persist through.  The default implementation is
//! [`sqlite::SqliteStore`].  To swap to another database (Postgres, MySQL, …),
//! implement both traits for your new type and change the concrete type in
//! [`crate::state::AppState`].
//!
//! All trait methods use `impl Future` in their signatures (stable since Rust
//! 1.75) so no extra `async-trait` crate is required.

pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Role of the human side of a turn.
pub const ROLE_USER: &str = "user";
/// Role of the model side of a turn.
pub const ROLE_ASSISTANT: &str = "assistant";

/// Marker for a turn that finished normally.
pub const STATUS_COMPLETE: &str = "complete";
/// Marker for partial assistant text kept from an interrupted stream.
pub const STATUS_FAILED: &str = "failed";

/// Title given to sessions the user has not named yet.  The first user
/// message replaces it, see [`crate::routes::chat`].
pub const NEW_CHAT_TITLE: &str = "New chat";

/// A single row in the `chat_sessions` table.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: String,
    /// Display title; starts as [`NEW_CHAT_TITLE`].
    pub title: String,
    /// Ollama model tag this session talks to, e.g. `"llama3.2:latest"`.
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    /// Fresh session with a random id and the placeholder title.
    pub fn new(title: Option<String>, model: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.unwrap_or_else(|| NEW_CHAT_TITLE.to_owned()),
            model,
            created_at: Utc::now(),
        }
    }
}

/// A single row in the `chat_messages` table.
///
/// The transcript is append-only: a row is inserted exactly once and never
/// updated, so a crash mid-write leaves either the whole turn or nothing.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    /// [`ROLE_USER`] or [`ROLE_ASSISTANT`].
    pub role: String,
    pub content: String,
    /// [`STATUS_COMPLETE`] or [`STATUS_FAILED`].
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// New turn stamped with a random id and the current time.
    pub fn new(session_id: &str, role: &str, content: String, status: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role: role.to_owned(),
            content,
            status: status.to_owned(),
            created_at: Utc::now(),
        }
    }
}

/// Trait for persisting chat sessions.
pub trait SessionStore: Send + Sync + 'static {
    fn create_session(
        &self,
        session: ChatSession,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn get_session(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<ChatSession>, sqlx::Error>> + Send;

    /// All sessions, newest first.
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<ChatSession>, sqlx::Error>> + Send;

    fn update_session_model(
        &self,
        id: &str,
        model: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn update_session_title(
        &self,
        id: &str,
        title: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

/// Trait for persisting the per-session transcript.
pub trait ChatStore: Send + Sync + 'static {
    /// Append one turn.  A single `INSERT`; there is no update path.
    fn append_message(
        &self,
        msg: ChatMessage,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Full transcript of a session, oldest first.
    fn list_messages(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, sqlx::Error>> + Send;
}
