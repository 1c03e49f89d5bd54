use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Auth failed: {0}")]
    AuthFailed(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: String },
}

pub type Result<T> = std::result::Result<T, CalendarError>;
