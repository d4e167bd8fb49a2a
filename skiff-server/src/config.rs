//! Server configuration, loaded from environment variables at startup.

/// Runtime configuration for skiff-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// against a stock Ollama install without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"127.0.0.1:8090"`).  Loopback on
    /// purpose: this is a local console, not a public service.
    pub bind_address: String,

    /// SQLite (or other) database URL (default: `"sqlite://skiff.db?mode=rwc"`).
    /// Any sqlx-compatible connection string works; swap the scheme to
    /// migrate to Postgres (`postgres://…`) or MySQL (`mysql://…`).
    pub database_url: String,

    /// Base URL of the Ollama daemon (default: `"http://localhost:11434"`).
    pub ollama_url: String,

    /// Timeout in seconds for non-streaming daemon calls (default: 60).
    /// Streaming calls are exempt; a model pull may run for much longer.
    pub ollama_timeout_secs: u64,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Serve the Swagger UI at `/swagger-ui` (default: on).
    pub enable_swagger: bool,

    /// Comma-separated CORS allow-list; unset means allow any origin.
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("SKIFF_BIND", "127.0.0.1:8090"),
            database_url: env_or("SKIFF_DATABASE_URL", "sqlite://skiff.db?mode=rwc"),
            ollama_url: env_or("SKIFF_OLLAMA_URL", "http://localhost:11434"),
            ollama_timeout_secs: parse_env("SKIFF_OLLAMA_TIMEOUT_SECS", 60),
            log_level: env_or("SKIFF_LOG", "info"),
            log_json: std::env::var("SKIFF_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            enable_swagger: std::env::var("SKIFF_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            cors_allowed_origins: std::env::var("SKIFF_CORS_ORIGINS").ok(),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
