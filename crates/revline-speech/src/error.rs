use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect failed after {attempts} attempts: {last_error}")]
    ConnectFailed { attempts: u32, last_error: String },

    #[error("client is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpeechError>;
