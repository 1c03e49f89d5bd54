//! Streaming text-to-speech client.
//!
//! Text chunks and control commands (`Speak`, `Flush`, `Clear`) go out over
//! the socket; raw mu-law audio comes back as binary frames into an ordered
//! queue the per-turn egress subtask drains. Time-to-first-byte is measured
//! from each flush to the first audio chunk that follows it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use revline_core::config::TtsConfig;

use crate::error::{Result, SpeechError};
use crate::{backoff_delay, CONNECT_ATTEMPTS};

enum Command {
    Speak(String),
    Flush,
    Clear,
}

pub struct TtsClient {
    command_tx: mpsc::Sender<Command>,
    audio_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>>,
    /// Set by flush, cleared when the first audio chunk lands (logging TTFB)
    /// or by `clear()`.
    flushed_at: Arc<Mutex<Option<Instant>>>,
    /// Flipped when the upstream reports the current utterance fully
    /// synthesized; the egress subtask uses it to recognize a clean drain.
    drained: Arc<std::sync::atomic::AtomicBool>,
    cancel: CancellationToken,
}

impl TtsClient {
    /// Connect with bounded retries, same discipline as the STT side.
    pub async fn connect(config: &TtsConfig) -> Result<Self> {
        let url = speak_url(config);
        let mut last_error = String::new();

        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            match try_connect(&url, &config.api_key).await {
                Ok(socket) => {
                    info!(attempt, "TTS connected");
                    return Ok(Self::spawn_tasks(socket));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "TTS connect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(SpeechError::ConnectFailed {
            attempts: CONNECT_ATTEMPTS,
            last_error,
        })
    }

    fn spawn_tasks(
        socket: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Self {
        let (mut sink, mut stream) = socket.split();
        let (command_tx, mut command_rx) = mpsc::channel::<Command>(256);
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(256);
        let flushed_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let drained = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = command_rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        let payload = match cmd {
                            Command::Speak(text) => {
                                serde_json::json!({ "type": "Speak", "text": text }).to_string()
                            }
                            Command::Flush => r#"{"type":"Flush"}"#.to_string(),
                            Command::Clear => r#"{"type":"Clear"}"#.to_string(),
                        };
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Text(r#"{"type":"Close"}"#.into())).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        let reader_cancel = cancel.clone();
        let reader_flushed = Arc::clone(&flushed_at);
        let reader_drained = Arc::clone(&drained);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Binary(chunk))) => {
                                if let Some(started) = reader_flushed.lock().unwrap().take() {
                                    info!(
                                        ttfb_ms = started.elapsed().as_millis() as u64,
                                        "TTS first byte"
                                    );
                                }
                                if audio_tx.send(chunk.to_vec()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Text(text))) => {
                                handle_status(&text, &reader_drained);
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("TTS socket closed by upstream");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "TTS read error");
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = reader_cancel.cancelled() => break,
                }
            }
        });

        Self {
            command_tx,
            audio_rx: Arc::new(tokio::sync::Mutex::new(audio_rx)),
            flushed_at,
            drained,
            cancel,
        }
    }

    /// Enqueue text for synthesis. Non-blocking.
    pub fn send_text(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Err(e) = self.command_tx.try_send(Command::Speak(text.to_string())) {
            warn!(error = %e, "TTS command queue full or closed, dropping text");
        }
    }

    /// Signal end of text for the current utterance and start the TTFB
    /// clock.
    pub fn flush(&self) {
        self.drained
            .store(false, std::sync::atomic::Ordering::Release);
        *self.flushed_at.lock().unwrap() = Some(Instant::now());
        if let Err(e) = self.command_tx.try_send(Command::Flush) {
            warn!(error = %e, "TTS flush dropped");
        }
    }

    /// Abort the in-flight synthesis: upstream `Clear`, drain the local
    /// audio queue, reset the TTFB marker. Used by barge-in.
    pub async fn clear(&self) {
        let _ = self.command_tx.try_send(Command::Clear);
        *self.flushed_at.lock().unwrap() = None;
        self.drained
            .store(false, std::sync::atomic::Ordering::Release);

        let mut rx = self.audio_rx.lock().await;
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(chunks = dropped, "TTS queue drained by clear");
        }
    }

    /// Shared handle to the ordered audio queue; each egress subtask locks
    /// it for the duration of one assistant turn.
    pub fn audio(&self) -> Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>> {
        Arc::clone(&self.audio_rx)
    }

    /// True once the upstream has confirmed the flushed utterance is fully
    /// synthesized.
    pub fn is_drained(&self) -> bool {
        self.drained.load(std::sync::atomic::Ordering::Acquire)
    }

    /// False once the socket tasks have shut down; the owner should
    /// reconnect before the next utterance.
    pub fn is_alive(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Release the socket and both tasks. Safe on every exit path.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TtsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn handle_status(raw: &str, drained: &Arc<std::sync::atomic::AtomicBool>) {
    let Ok(status) = serde_json::from_str::<StatusMessage>(raw) else {
        return;
    };
    match status.message_type.as_str() {
        "Flushed" => {
            drained.store(true, std::sync::atomic::Ordering::Release);
            debug!("TTS reports utterance flushed");
        }
        "Cleared" => debug!("TTS reports buffer cleared"),
        "Warning" => warn!(message = %status.description.unwrap_or_default(), "TTS warning"),
        _ => {}
    }
}

async fn try_connect(
    url: &str,
    api_key: &str,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>
{
    let mut request = url
        .into_client_request()
        .map_err(SpeechError::WebSocket)?;
    let header = HeaderValue::from_str(&format!("Token {api_key}")).map_err(|e| {
        SpeechError::ConnectFailed {
            attempts: 1,
            last_error: format!("invalid api key header: {e}"),
        }
    })?;
    request.headers_mut().insert("Authorization", header);

    let (socket, _response) = connect_async(request).await?;
    Ok(socket)
}

fn speak_url(config: &TtsConfig) -> String {
    format!(
        "wss://api.deepgram.com/v1/speak?model={}&encoding={}&sample_rate={}&container=none",
        urlencoding::encode(&config.model),
        urlencoding::encode(&config.encoding),
        config.sample_rate,
    )
}

#[derive(Deserialize)]
struct StatusMessage {
    #[serde(rename = "type")]
    message_type: String,
    description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speak_url_requests_raw_mulaw() {
        let config = TtsConfig {
            api_key: "k".to_string(),
            model: "aura-asteria-en".to_string(),
            encoding: "mulaw".to_string(),
            sample_rate: 8000,
        };
        let url = speak_url(&config);
        assert!(url.contains("encoding=mulaw"));
        assert!(url.contains("sample_rate=8000"));
        assert!(url.contains("container=none"));
    }

    #[test]
    fn flushed_status_sets_drained() {
        let drained = Arc::new(std::sync::atomic::AtomicBool::new(false));
        handle_status(r#"{"type":"Flushed","sequence_id":1}"#, &drained);
        assert!(drained.load(std::sync::atomic::Ordering::Acquire));
    }

    #[test]
    fn unknown_status_ignored() {
        let drained = Arc::new(std::sync::atomic::AtomicBool::new(false));
        handle_status(r#"{"type":"Metadata"}"#, &drained);
        assert!(!drained.load(std::sync::atomic::Ordering::Acquire));
    }
}
