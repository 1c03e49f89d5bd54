//! Duplex WebSocket clients for the streaming transcriber and synthesizer.
//!
//! Both clients follow the same discipline: bounded connect retries,
//! split-socket reader/writer tasks, CancellationToken teardown, and
//! ordered event/audio channels toward the orchestrator.

pub mod error;
pub mod stt;
pub mod tts;

pub use error::{Result, SpeechError};
pub use stt::{SttClient, TranscriptEvent, TranscriptKind};
pub use tts::TtsClient;

/// Connect retry policy shared by both clients: 3 attempts, exponential
/// backoff starting at 1 s with factor 1.5.
pub(crate) const CONNECT_ATTEMPTS: u32 = 3;
pub(crate) const BACKOFF_BASE_MS: u64 = 1_000;
pub(crate) const BACKOFF_FACTOR: f64 = 1.5;

pub(crate) fn backoff_delay(attempt: u32) -> std::time::Duration {
    let ms = BACKOFF_BASE_MS as f64 * BACKOFF_FACTOR.powi(attempt as i32);
    std::time::Duration::from_millis(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_by_factor() {
        assert_eq!(backoff_delay(0).as_millis(), 1000);
        assert_eq!(backoff_delay(1).as_millis(), 1500);
        assert_eq!(backoff_delay(2).as_millis(), 2250);
    }
}
