use utoipa::OpenApi;

use crate::routes::{chat, health, models, status};

#[derive(OpenApi)]
#[openapi(info(
    title = "skiff-server",
    description = "Local console API for an Ollama daemon",
    version = "0.1.0",
    contact(name = "skiff", url = "https://github.com/skiff-rs/skiff")
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(status::StatusApi::openapi());
    root.merge(models::ModelsApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root
}
