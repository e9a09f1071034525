use thiserror::Error;

/// Errors surfaced by the collaboration core.
///
/// None of these are fatal: callers either ignore them (precondition
/// violations) or turn them into a degraded display state.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("CRDT operation failed: {0}")]
    Crdt(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("session is not synced")]
    NotSynced,

    #[error("session disconnected")]
    Disconnected,

    #[error("view is detached")]
    Detached,

    #[error("position {pos} is out of bounds (length {len})")]
    OutOfBounds { pos: usize, len: usize },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<loro::LoroError> for CollabError {
    fn from(e: loro::LoroError) -> Self {
        CollabError::Crdt(e.to_string())
    }
}
