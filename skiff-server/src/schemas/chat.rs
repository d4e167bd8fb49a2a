use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::{ChatMessage, ChatSession};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Model tag for the session; defaults to the first installed model.
    pub model: Option<String>,
    /// Display title; defaults to a placeholder replaced by the first
    /// user message.
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub id: String,
    pub title: String,
    pub model: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    /// `"complete"`, or `"failed"` for partial text kept from an
    /// interrupted stream.
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetModelRequest {
    pub model: String,
}

/// Body of `POST /api/chat/stream`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StreamChatRequest {
    pub session_id: String,
    /// The user's message for this turn.
    pub content: String,
    /// Sampling parameters forwarded untouched to the daemon.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub options: Option<serde_json::Value>,
    /// e.g. `"5m"`; forwarded untouched.
    #[serde(default)]
    pub keep_alive: Option<String>,
    /// `"json"` or a JSON schema; forwarded untouched.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub format: Option<serde_json::Value>,
}

impl ChatSession {
    pub fn to_response(&self) -> SessionResponse {
        SessionResponse {
            id: self.id.clone(),
            title: self.title.clone(),
            model: self.model.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

impl ChatMessage {
    pub fn to_response(&self) -> MessageResponse {
        MessageResponse {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            role: self.role.clone(),
            content: self.content.clone(),
            status: self.status.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}
