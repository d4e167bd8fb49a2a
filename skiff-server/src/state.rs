//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::db::sqlite::SqliteStore;
use crate::ollama::OllamaClient;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Persistent session / transcript store.
    pub store: Arc<SqliteStore>,
    /// Client for the local Ollama daemon.
    pub ollama: OllamaClient,
}
