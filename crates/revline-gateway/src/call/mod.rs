//! Per-call orchestration.
//!
//! One WebSocket from the telephony provider drives one call. After the
//! `start` frame arrives, the call runs as cooperating tasks:
//!
//!   writer   — outbound frame queue → socket sink
//!   ingress  — socket stream → STT audio (and stop/teardown signals)
//!   turn     — transcript events → barge-in + LLM turns (see `turn`)
//!
//! plus a short-lived egress subtask per assistant turn. Telephony close is
//! the session-level cancellation signal; teardown runs on every exit path.

pub mod session;
pub mod turn;

use std::sync::{Arc, Mutex as StdMutex};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use revline_core::phone;
use revline_llm::{ChatClient, ChatConfig, OpenAiProvider};
use revline_speech::{SttClient, TtsClient};
use revline_telephony::frames::{InboundFrame, OutboundFrame, StartMeta};

use crate::app::AppState;
use crate::tools::{self, ToolContext};
use turn::CallContext;

/// Axum handler — upgrades HTTP to WebSocket at GET /media-stream.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_media_stream(socket, state))
}

/// Wait for the `start` frame, then run the call to completion.
async fn handle_media_stream(socket: WebSocket, state: Arc<AppState>) {
    let (ws_tx, mut ws_rx) = socket.split();

    let start = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(InboundFrame::Start { start }) => break start,
                Ok(InboundFrame::Connected) => continue,
                Ok(InboundFrame::Stop) => return,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "unparseable frame before start, ignoring");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                warn!(error = %e, "socket error before start");
                return;
            }
            _ => continue,
        }
    };

    run_call(state, start, ws_tx, ws_rx).await;
}

async fn run_call(
    state: Arc<AppState>,
    start: StartMeta,
    ws_tx: SplitSink<WebSocket, Message>,
    ws_rx: SplitStream<WebSocket>,
) {
    let call_sid = start.call_sid.clone();
    let stream_sid = start.stream_sid.clone();

    let raw_phone = start
        .custom_parameters
        .get("caller_phone")
        .cloned()
        .or_else(|| start.from.clone())
        .unwrap_or_default();
    let caller_phone = phone::normalize(&raw_phone).unwrap_or(raw_phone);

    info!(
        call_sid = %call_sid,
        caller = %phone::mask(&caller_phone),
        "call started"
    );
    state
        .active_calls
        .insert(call_sid.clone(), stream_sid.clone());

    // writer task — the only owner of the socket sink
    let (out_tx, out_rx) = mpsc::channel::<OutboundFrame>(256);
    let writer = tokio::spawn(run_writer(ws_tx, out_rx));

    let tool_ctx = ToolContext::from_state(&state);

    // session record, call classification, system prompt, tool registration
    let mut chat = ChatClient::new(
        Arc::new(OpenAiProvider::new(
            state.config.llm.api_key.clone(),
            state.config.llm.base_url.clone(),
        )),
        ChatConfig {
            model: state.config.llm.model.clone(),
            temperature: state.config.llm.temperature,
            max_tokens: state.config.llm.max_tokens,
        },
    );
    let setup = session::initialize(&state, &tool_ctx, &start, &caller_phone, &mut chat).await;
    tools::register_all(&mut chat, &tool_ctx);

    // both speech legs in parallel, each with its own bounded retries
    let (stt, tts) = match tokio::join!(
        SttClient::connect(&state.config.stt),
        TtsClient::connect(&state.config.tts),
    ) {
        (Ok(stt), Ok(tts)) => (stt, tts),
        (stt_result, tts_result) => {
            if let Err(e) = &stt_result {
                warn!(call_sid = %call_sid, error = %e, "STT connect failed");
            }
            if let Err(e) = &tts_result {
                warn!(call_sid = %call_sid, error = %e, "TTS connect failed");
            }
            // graceful error: drop any buffered audio and hang up cleanly
            let _ = out_tx.send(OutboundFrame::clear(&stream_sid)).await;
            session::teardown_failed(&state, &call_sid, "speech_connect_failed").await;
            state.active_calls.remove(&call_sid);
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };

    let mut stt = stt;
    let Some(transcripts) = stt.transcripts() else {
        // unreachable for a fresh client, but a hung call would be worse
        warn!(call_sid = %call_sid, "STT transcript stream unavailable");
        let _ = out_tx.send(OutboundFrame::clear(&stream_sid)).await;
        session::teardown_failed(&state, &call_sid, "stt_stream_unavailable").await;
        state.active_calls.remove(&call_sid);
        drop(out_tx);
        let _ = writer.await;
        return;
    };

    let cancel = CancellationToken::new();
    let ctx = Arc::new(CallContext {
        state: Arc::clone(&state),
        call_sid: call_sid.clone(),
        stream_sid: stream_sid.clone(),
        caller_phone: caller_phone.clone(),
        out_tx: out_tx.clone(),
        stt: Arc::new(RwLock::new(stt)),
        tts: Arc::new(RwLock::new(tts)),
        chat: Arc::new(tokio::sync::Mutex::new(chat)),
        speaking: Arc::new(StdMutex::new(false)),
        cancel: cancel.clone(),
    });

    let ingress = tokio::spawn(run_ingress(ws_rx, Arc::clone(&ctx)));

    // the turn task runs here until telephony stop or fatal error
    turn::run_turn_loop(Arc::clone(&ctx), transcripts).await;

    // ordered teardown: STT, TTS, then persist final state + call log
    ctx.stt.read().await.close();
    ctx.tts.read().await.close();
    session::teardown(&ctx, &setup).await;

    state.active_calls.remove(&call_sid);
    cancel.cancel();
    ingress.abort();
    drop(ctx);
    drop(out_tx);
    let _ = writer.await;
    info!(call_sid = %call_sid, "call ended");
}

/// Serialize outbound frames onto the socket, in queue order.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = out_rx.recv().await {
        let json = frame.to_json();
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

/// Read telephony frames: audio to STT (non-empty only), stop to teardown.
async fn run_ingress(mut ws_rx: SplitStream<WebSocket>, ctx: Arc<CallContext>) {
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundFrame>(&text) {
                            Ok(InboundFrame::Media { media }) => {
                                let audio = media.decode();
                                // empty frames never reach STT
                                if !audio.is_empty() {
                                    ctx.stt.read().await.send_audio(audio);
                                }
                            }
                            Ok(InboundFrame::Mark { mark }) => {
                                debug!(call_sid = %ctx.call_sid, mark = %mark.name, "playback mark");
                            }
                            Ok(InboundFrame::Stop) => {
                                info!(call_sid = %ctx.call_sid, "telephony stop");
                                ctx.cancel.cancel();
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                debug!(call_sid = %ctx.call_sid, error = %e, "malformed frame, ignoring");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(call_sid = %ctx.call_sid, "telephony socket closed");
                        ctx.cancel.cancel();
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(call_sid = %ctx.call_sid, error = %e, "telephony read error");
                        ctx.cancel.cancel();
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
