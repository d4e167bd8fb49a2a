//! Client for the local Ollama daemon.
//!
//! Thin wrappers over the JSON admin endpoints (`/api/version`, `/api/tags`,
//! `/api/ps`, `/api/delete`) plus request builders for the two streaming
//! endpoints (`/api/pull`, `/api/chat`).  The streaming builders are handed
//! to [`crate::stream::relay`], which owns the read loop.
//!
//! Non-streaming calls carry a per-request timeout.  Streaming calls get
//! only the connect timeout: a model pull can legitimately run for many
//! minutes, and a total-duration timeout would cut it off mid-transfer.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

/// Longest body excerpt quoted back in error messages.
const SNIPPET_MAX: usize = 256;

/// Failure talking to the daemon.
///
/// `Connect` is separated out because it is the error a user can act on
/// directly (the daemon is not running); the message is shown verbatim in
/// the dashboard.
#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("cannot reach ollama: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("ollama returned {status}: {snippet}")]
    Status { status: StatusCode, snippet: String },

    #[error("ollama request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl OllamaError {
    /// Classify a send-phase error: connection trouble vs anything else.
    pub(crate) fn from_send(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            OllamaError::Connect(e)
        } else {
            OllamaError::Request(e)
        }
    }
}

/// One model as reported by the daemon, either installed (`/api/tags`)
/// or currently loaded (`/api/ps`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelSummary {
    pub name: String,
    /// On-disk size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    /// Only present for running models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Family, parameter size, quantization, as reported by the daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelListBody {
    #[serde(default)]
    models: Vec<ModelSummary>,
}

#[derive(Debug, Deserialize)]
struct VersionBody {
    #[serde(default)]
    version: String,
}

/// One transcript entry in a `/api/chat` payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayloadMessage {
    pub role: String,
    pub content: String,
}

/// Optional knobs forwarded untouched to `/api/chat`.
///
/// Only fields that are actually set appear in the payload; the daemon
/// treats an explicit `null` differently from an absent key.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Sampling parameters (`temperature`, `num_ctx`, …).
    pub options: Option<serde_json::Value>,
    /// How long to keep the model loaded after the reply, e.g. `"5m"`.
    pub keep_alive: Option<String>,
    /// `"json"` or a JSON schema for structured output.
    pub format: Option<serde_json::Value>,
}

/// HTTP client for one Ollama daemon.
///
/// Cheap to clone; `reqwest::Client` is reference-counted internally.
#[derive(Clone, Debug)]
pub struct OllamaClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    /// `base_url` is the daemon root, e.g. `"http://localhost:11434"`.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("skiff-server/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /api/version`, the cheapest liveness probe the daemon offers.
    pub async fn version(&self) -> Result<String, OllamaError> {
        let resp = self
            .client
            .get(self.url("/api/version"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(OllamaError::from_send)?;
        let resp = check_status(resp).await?;
        let body: VersionBody = resp.json().await.map_err(OllamaError::Request)?;
        Ok(body.version)
    }

    /// `GET /api/tags`: models installed on disk.
    pub async fn list_models(&self) -> Result<Vec<ModelSummary>, OllamaError> {
        self.model_list("/api/tags").await
    }

    /// `GET /api/ps`: models currently loaded in memory.
    pub async fn list_running(&self) -> Result<Vec<ModelSummary>, OllamaError> {
        self.model_list("/api/ps").await
    }

    async fn model_list(&self, path: &str) -> Result<Vec<ModelSummary>, OllamaError> {
        let resp = self
            .client
            .get(self.url(path))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(OllamaError::from_send)?;
        let resp = check_status(resp).await?;
        let body: ModelListBody = resp.json().await.map_err(OllamaError::Request)?;
        Ok(body.models)
    }

    /// `DELETE /api/delete`: remove an installed model.
    pub async fn delete_model(&self, model: &str) -> Result<(), OllamaError> {
        let resp = self
            .client
            .delete(self.url("/api/delete"))
            .json(&json!({ "model": model }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(OllamaError::from_send)?;
        check_status(resp).await?;
        Ok(())
    }

    /// Builder for the streaming `POST /api/pull`.
    pub fn pull_request(&self, model: &str, insecure: Option<bool>) -> reqwest::RequestBuilder {
        let mut payload = json!({ "model": model, "stream": true });
        if let Some(insecure) = insecure {
            payload["insecure"] = json!(insecure);
        }
        self.client.post(self.url("/api/pull")).json(&payload)
    }

    /// Builder for the streaming `POST /api/chat`.
    pub fn chat_request(
        &self,
        model: &str,
        messages: &[ChatPayloadMessage],
        opts: &ChatOptions,
    ) -> reqwest::RequestBuilder {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        if let Some(options) = &opts.options {
            payload["options"] = options.clone();
        }
        if let Some(keep_alive) = &opts.keep_alive {
            payload["keep_alive"] = json!(keep_alive);
        }
        if let Some(format) = &opts.format {
            payload["format"] = format.clone();
        }
        self.client.post(self.url("/api/chat")).json(&payload)
    }
}

/// Turn a non-2xx response into [`OllamaError::Status`] with a body excerpt.
pub(crate) async fn check_status(
    resp: reqwest::Response,
) -> Result<reqwest::Response, OllamaError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let snippet = body_snippet(resp).await;
    Err(OllamaError::Status { status, snippet })
}

async fn body_snippet(resp: reqwest::Response) -> String {
    match resp.text().await {
        Ok(text) => truncate_snippet(&text),
        Err(_) => "<unreadable body>".to_owned(),
    }
}

fn truncate_snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= SNIPPET_MAX {
        return trimmed.to_owned();
    }
    let mut cut = SNIPPET_MAX;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}
