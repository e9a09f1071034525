pub mod ai_service_client;

pub use ai_service_client::AiServiceClient;

use serde_json::Value;

use crate::error::CollabError;
use crate::models::ChatPayload;
use crate::BoxFuture;

/// Static analysis backend. Returns the raw response body; field defaulting
/// happens in `AnalysisReport::from_json`.
pub trait CodeAnalyzer: Send + Sync {
    fn analyze<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Value, CollabError>>;
}

/// Q&A backend for the assistant chat
pub trait AssistantBackend: Send + Sync {
    fn ask<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<ChatPayload, CollabError>>;
}
