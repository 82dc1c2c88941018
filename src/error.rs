use thiserror::Error;

/// Failure talking to a remote document store (chat log, profile record, blobs).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription error: {0}")]
    Subscription(String),
}
