//! Streaming speech-to-text client.
//!
//! Holds a long-lived duplex connection to the transcriber, configured for
//! phone audio. Audio goes out through a writer task; transcript events
//! come back through an ordered channel. A keepalive ticks every
//! `keepalive_secs` so the upstream inactivity timeout (their NET-0001
//! class) never fires while the caller is silent.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use revline_core::config::SttConfig;

use crate::error::{Result, SpeechError};
use crate::{backoff_delay, CONNECT_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Interim,
    Final,
    UtteranceEnd,
}

/// One transcript event, in upstream emission order.
/// `speech_final == true` implies `is_final == true`.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub text: String,
    pub is_final: bool,
    pub speech_final: bool,
    pub confidence: f64,
}

pub struct SttClient {
    audio_tx: mpsc::Sender<Vec<u8>>,
    transcript_rx: Option<mpsc::Receiver<TranscriptEvent>>,
    cancel: CancellationToken,
}

impl SttClient {
    /// Connect with bounded retries. On success the client owns a writer
    /// task (audio + keepalive) and a reader task (transcript events); on
    /// failure every partial resource has been dropped.
    pub async fn connect(config: &SttConfig) -> Result<Self> {
        let url = listen_url(config);
        let mut last_error = String::new();

        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            match try_connect(&url, &config.api_key).await {
                Ok(socket) => {
                    info!(attempt, "STT connected");
                    return Ok(Self::spawn_tasks(socket, config.keepalive_secs));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "STT connect attempt failed");
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
        keepalive_secs: u64,
    ) -> Self {
        let (mut sink, mut stream) = socket.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(256);
        let (transcript_tx, transcript_rx) = mpsc::channel::<TranscriptEvent>(64);
        let cancel = CancellationToken::new();

        // writer: audio frames, keepalive ticks, CloseStream on teardown
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut keepalive =
                tokio::time::interval(std::time::Duration::from_secs(keepalive_secs));
            keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            keepalive.tick().await; // immediate first tick

            loop {
                tokio::select! {
                    frame = audio_rx.recv() => {
                        match frame {
                            Some(bytes) => {
                                if sink.send(Message::Binary(bytes.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = keepalive.tick() => {
                        let msg = r#"{"type":"KeepAlive"}"#;
                        if sink.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Text(r#"{"type":"CloseStream"}"#.into())).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        // reader: upstream JSON → ordered transcript events. Single task,
        // single channel — interims can never reorder past their final.
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = parse_transcript(&text) {
                                    if transcript_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("STT socket closed by upstream");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "STT read error");
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
            audio_tx,
            transcript_rx: Some(transcript_rx),
            cancel,
        }
    }

    /// Forward one audio frame. Non-blocking; empty frames are dropped
    /// here so they can never reach the upstream.
    pub fn send_audio(&self, frame: Vec<u8>) {
        if frame.is_empty() {
            return;
        }
        if let Err(e) = self.audio_tx.try_send(frame) {
            debug!(error = %e, "STT audio queue full or closed, dropping frame");
        }
    }

    /// Take the ordered transcript stream. Yields `None` once per client.
    pub fn transcripts(&mut self) -> Option<mpsc::Receiver<TranscriptEvent>> {
        self.transcript_rx.take()
    }

    /// Cancel keepalive, flush a CloseStream, and drop the socket.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SttClient {
    fn drop(&mut self) {
        self.cancel.cancel();
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

fn listen_url(config: &SttConfig) -> String {
    format!(
        "wss://api.deepgram.com/v1/listen?model={}&encoding={}&sample_rate={}&channels={}\
         &interim_results={}&smart_format={}&endpointing={}&utterance_end_ms={}&no_delay=true",
        urlencoding::encode(&config.model),
        urlencoding::encode(&config.encoding),
        config.sample_rate,
        config.channels,
        config.interim_results,
        config.smart_format,
        config.endpointing_ms,
        config.utterance_end_ms,
    )
}

/// Map one upstream JSON message to a transcript event. Unknown message
/// types (metadata, speech-started) are skipped.
fn parse_transcript(raw: &str) -> Option<TranscriptEvent> {
    let msg: UpstreamMessage = serde_json::from_str(raw).ok()?;

    match msg.message_type.as_str() {
        "Results" => {
            let alternative = msg.channel?.alternatives.into_iter().next()?;
            let is_final = msg.is_final.unwrap_or(false);
            let speech_final = msg.speech_final.unwrap_or(false);
            Some(TranscriptEvent {
                kind: if is_final || speech_final {
                    TranscriptKind::Final
                } else {
                    TranscriptKind::Interim
                },
                text: alternative.transcript,
                // speech_final implies is_final
                is_final: is_final || speech_final,
                speech_final,
                confidence: alternative.confidence,
            })
        }
        "UtteranceEnd" => Some(TranscriptEvent {
            kind: TranscriptKind::UtteranceEnd,
            text: String::new(),
            is_final: true,
            speech_final: false,
            confidence: 0.0,
        }),
        _ => None,
    }
}

#[derive(Deserialize)]
struct UpstreamMessage {
    #[serde(rename = "type")]
    message_type: String,
    channel: Option<UpstreamChannel>,
    is_final: Option<bool>,
    speech_final: Option<bool>,
}

#[derive(Deserialize)]
struct UpstreamChannel {
    #[serde(default)]
    alternatives: Vec<UpstreamAlternative>,
}

#[derive(Deserialize)]
struct UpstreamAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_result_parses() {
        let raw = r#"{
            "type": "Results",
            "is_final": false,
            "speech_final": false,
            "channel": { "alternatives": [ { "transcript": "I need an", "confidence": 0.82 } ] }
        }"#;
        let event = parse_transcript(raw).unwrap();
        assert_eq!(event.kind, TranscriptKind::Interim);
        assert!(!event.is_final);
        assert_eq!(event.text, "I need an");
    }

    #[test]
    fn speech_final_implies_is_final() {
        let raw = r#"{
            "type": "Results",
            "is_final": false,
            "speech_final": true,
            "channel": { "alternatives": [ { "transcript": "oil change", "confidence": 0.97 } ] }
        }"#;
        let event = parse_transcript(raw).unwrap();
        assert!(event.is_final, "speech_final must imply is_final");
        assert!(event.speech_final);
        assert_eq!(event.kind, TranscriptKind::Final);
    }

    #[test]
    fn utterance_end_parses_without_channel() {
        let raw = r#"{ "type": "UtteranceEnd", "last_word_end": 4.71 }"#;
        let event = parse_transcript(raw).unwrap();
        assert_eq!(event.kind, TranscriptKind::UtteranceEnd);
        assert!(event.text.is_empty());
    }

    #[test]
    fn metadata_messages_skipped() {
        assert!(parse_transcript(r#"{"type":"Metadata","duration":1.2}"#).is_none());
    }

    #[test]
    fn listen_url_carries_phone_config() {
        let config = SttConfig {
            api_key: "k".to_string(),
            model: "nova-2-phonecall".to_string(),
            encoding: "mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
            interim_results: true,
            smart_format: true,
            endpointing_ms: 300,
            utterance_end_ms: 1000,
            keepalive_secs: 10,
        };
        let url = listen_url(&config);
        assert!(url.contains("encoding=mulaw"));
        assert!(url.contains("sample_rate=8000"));
        assert!(url.contains("endpointing=300"));
        assert!(url.contains("utterance_end_ms=1000"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("no_delay=true"));
    }
}
