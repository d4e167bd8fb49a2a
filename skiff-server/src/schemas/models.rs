use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /api/models/pull`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PullModelRequest {
    /// Model tag to download, e.g. `"llama3.2:latest"`.
    pub model: String,
    /// Allow pulling from an insecure registry; forwarded to the daemon.
    #[serde(default)]
    pub insecure: Option<bool>,
}

/// Body of `POST /api/models/delete`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteModelRequest {
    pub model: String,
}
