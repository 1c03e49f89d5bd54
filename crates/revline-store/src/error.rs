use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store not initialized")]
    NotInitialized,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Session not found: {call_sid}")]
    SessionNotFound { call_sid: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store operation timed out after {ms}ms")]
    Timeout { ms: u64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;
