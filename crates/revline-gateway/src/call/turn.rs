//! The turn task: transcript consumption, barge-in, and assistant turns.
//!
//! Interims only ever trigger barge-in. Final fragments accumulate until
//! `speech_final` (or a non-empty buffer at `utterance_end`) closes the
//! utterance, which becomes the user turn. Each assistant turn runs as a
//! cancellable subtask pair: the generation drive and the egress pump.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use revline_core::types::ConversationPhase;
use revline_llm::{ChatClient, LlmEvent, APOLOGY};
use revline_speech::{SttClient, TranscriptEvent, TranscriptKind, TtsClient};
use revline_telephony::frames::{media_frames, OutboundFrame};

use crate::app::AppState;

use super::session;

/// Egress blocks on the audio queue this long per receive.
const EGRESS_RECV_TIMEOUT: Duration = Duration::from_millis(500);
/// Consecutive post-flush timeouts treated as end-of-speech.
const EGRESS_TIMEOUT_LIMIT: u32 = 2;
/// How long barge-in waits for the aborted turn to unwind.
const ABORT_GRACE: Duration = Duration::from_millis(500);
/// History turns kept per generation; older turns fall off (system stays).
const MAX_HISTORY_TURNS: usize = 20;

/// Everything a call's tasks share. One per call; nothing here crosses
/// calls.
pub struct CallContext {
    pub state: Arc<AppState>,
    pub call_sid: String,
    pub stream_sid: String,
    pub caller_phone: String,
    pub out_tx: mpsc::Sender<OutboundFrame>,
    pub stt: Arc<RwLock<SttClient>>,
    pub tts: Arc<RwLock<TtsClient>>,
    pub chat: Arc<tokio::sync::Mutex<ChatClient>>,
    /// Guarded by its own mutex; the guarded region only flips the flag.
    pub speaking: Arc<StdMutex<bool>>,
    pub cancel: CancellationToken,
}

fn is_speaking(flag: &StdMutex<bool>) -> bool {
    *flag.lock().unwrap_or_else(|p| p.into_inner())
}

fn set_speaking(flag: &StdMutex<bool>, value: bool) {
    *flag.lock().unwrap_or_else(|p| p.into_inner()) = value;
}

struct ActiveTurn {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Consume transcript events until the call-level token cancels.
pub async fn run_turn_loop(
    ctx: Arc<CallContext>,
    mut transcripts: mpsc::Receiver<TranscriptEvent>,
) {
    let mut fragments: Vec<String> = Vec::new();
    let mut active: Option<ActiveTurn> = None;
    let min_chars = ctx.state.config.dealership.barge_in_min_chars;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            event = transcripts.recv() => {
                let Some(event) = event else {
                    // transient STT disconnect: reconnect with bounded
                    // retries; the in-flight turn is abandoned
                    match reconnect_stt(&ctx, &mut active).await {
                        Some(stream) => {
                            transcripts = stream;
                            fragments.clear();
                            continue;
                        }
                        None => {
                            warn!(call_sid = %ctx.call_sid, "STT reconnect failed, ending call");
                            ctx.cancel.cancel();
                            break;
                        }
                    }
                };

                match event.kind {
                    TranscriptKind::Interim => {
                        if event.text.trim().len() >= min_chars && is_speaking(&ctx.speaking) {
                            barge_in(&ctx, &mut active).await;
                        }
                    }
                    TranscriptKind::Final => {
                        // user talked over playback and the interim path
                        // didn't catch it first
                        if event.text.trim().len() >= min_chars && is_speaking(&ctx.speaking) {
                            barge_in(&ctx, &mut active).await;
                        }
                        if !event.text.trim().is_empty() {
                            fragments.push(event.text.trim().to_string());
                        }
                        if event.speech_final && !fragments.is_empty() {
                            let utterance = fragments.join(" ");
                            fragments.clear();
                            start_turn(&ctx, &mut active, utterance).await;
                        }
                    }
                    TranscriptKind::UtteranceEnd => {
                        // backup path when no speech_final arrived
                        if !fragments.is_empty() {
                            let utterance = fragments.join(" ");
                            fragments.clear();
                            start_turn(&ctx, &mut active, utterance).await;
                        }
                    }
                }
            }
        }
    }

    if let Some(turn) = active.take() {
        turn.cancel.cancel();
        let _ = tokio::time::timeout(ABORT_GRACE, turn.task).await;
    }
}

/// Barge-in: stop playback, drop buffered audio everywhere, abort the
/// in-flight turn. Completes before the caller's next utterance can be
/// appended — the turn loop is sequential.
async fn barge_in(ctx: &Arc<CallContext>, active: &mut Option<ActiveTurn>) {
    info!(call_sid = %ctx.call_sid, "barge-in");

    // egress stops forwarding at the next chunk
    set_speaking(&ctx.speaking, false);

    // (a) provider drops its buffered outbound audio
    let _ = ctx
        .out_tx
        .send(OutboundFrame::clear(&ctx.stream_sid))
        .await;

    // (d) abort the generation drive and the egress pump
    if let Some(turn) = active.take() {
        turn.cancel.cancel();
        let _ = tokio::time::timeout(ABORT_GRACE, turn.task).await;
    }

    // (b) cancel pending synthesis, (c) drain the in-process audio queue
    ctx.tts.read().await.clear().await;
}

async fn reconnect_stt(
    ctx: &Arc<CallContext>,
    active: &mut Option<ActiveTurn>,
) -> Option<mpsc::Receiver<TranscriptEvent>> {
    warn!(call_sid = %ctx.call_sid, "STT stream dropped, reconnecting");

    if is_speaking(&ctx.speaking) || active.is_some() {
        barge_in(ctx, active).await;
    }

    let mut guard = ctx.stt.write().await;
    guard.close();
    match SttClient::connect(&ctx.state.config.stt).await {
        Ok(mut fresh) => {
            let stream = fresh.transcripts();
            *guard = fresh;
            stream
        }
        Err(e) => {
            warn!(call_sid = %ctx.call_sid, error = %e, "STT reconnect exhausted retries");
            None
        }
    }
}

/// Launch the assistant turn for a finalized utterance.
async fn start_turn(ctx: &Arc<CallContext>, active: &mut Option<ActiveTurn>, utterance: String) {
    // a turn still unwinding means the user spoke again mid-response;
    // treat it like barge-in so history stays user/assistant alternating
    if let Some(prev) = active.take() {
        if !prev.task.is_finished() {
            prev.cancel.cancel();
            let _ = tokio::time::timeout(ABORT_GRACE, prev.task).await;
            ctx.tts.read().await.clear().await;
        }
    }

    // transient TTS disconnect: reconnect with bounded retries before the
    // turn needs to speak
    if !ctx.tts.read().await.is_alive() {
        warn!(call_sid = %ctx.call_sid, "TTS connection lost, reconnecting");
        let mut guard = ctx.tts.write().await;
        if !guard.is_alive() {
            guard.close();
            match TtsClient::connect(&ctx.state.config.tts).await {
                Ok(fresh) => *guard = fresh,
                Err(e) => {
                    warn!(call_sid = %ctx.call_sid, error = %e, "TTS reconnect failed, ending call");
                    ctx.cancel.cancel();
                    return;
                }
            }
        }
    }

    info!(call_sid = %ctx.call_sid, chars = utterance.len(), "user turn finalized");

    let turn_cancel = CancellationToken::new();
    let task = tokio::spawn(run_turn(
        Arc::clone(ctx),
        turn_cancel.clone(),
        utterance,
    ));
    *active = Some(ActiveTurn {
        cancel: turn_cancel,
        task,
    });
}

/// One assistant turn: drive generation, stream sentences to TTS, pump
/// audio out through the egress subtask.
async fn run_turn(ctx: Arc<CallContext>, turn_cancel: CancellationToken, utterance: String) {
    let flush_sent = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let audio = ctx.tts.read().await.audio();
    let egress = tokio::spawn(run_egress(
        Arc::clone(&ctx),
        turn_cancel.clone(),
        audio,
        Arc::clone(&flush_sent),
    ));

    let (ev_tx, mut ev_rx) = mpsc::channel::<LlmEvent>(256);
    let chat = Arc::clone(&ctx.chat);
    let gen_cancel = turn_cancel.clone();
    let generation = tokio::spawn(async move {
        let mut chat = chat.lock().await;
        chat.add_user(utterance.as_str());
        chat.trim(MAX_HISTORY_TURNS, true);
        tokio::select! {
            _ = gen_cancel.cancelled() => {}
            result = chat.generate(&ev_tx) => {
                if let Err(e) = result {
                    debug!(error = %e, "generation ended early");
                }
            }
        }
    });

    let mut sentence = String::new();
    let mut turn_intent: Option<String> = None;
    let mut phase = ConversationPhase::IdleListening;

    loop {
        tokio::select! {
            _ = turn_cancel.cancelled() => break,
            event = ev_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    LlmEvent::ContentDelta { text } => {
                        sentence.push_str(&text);
                        for complete in drain_sentences(&mut sentence) {
                            ctx.tts.read().await.send_text(&complete);
                        }
                    }
                    LlmEvent::ToolCall { name, .. } => {
                        phase = phase_for_tool(&name);
                        turn_intent = Some(name);
                    }
                    LlmEvent::ToolResult { .. } => {}
                    LlmEvent::Error { message } => {
                        warn!(call_sid = %ctx.call_sid, %message, "generation error");
                        // short graceful utterance; the turn closes, the
                        // session continues
                        sentence.clear();
                        ctx.tts.read().await.send_text(APOLOGY);
                    }
                    LlmEvent::Done { finish_reason, .. } => {
                        let remainder = sentence.trim().to_string();
                        if !remainder.is_empty() {
                            ctx.tts.read().await.send_text(&remainder);
                        }
                        sentence.clear();
                        {
                            let tts = ctx.tts.read().await;
                            tts.flush();
                        }
                        flush_sent.store(true, std::sync::atomic::Ordering::Release);
                        debug!(call_sid = %ctx.call_sid, %finish_reason, "turn generation done");
                        break;
                    }
                }
            }
        }
    }

    let _ = generation.await;

    if !turn_cancel.is_cancelled() {
        session::persist_after_turn(&ctx, phase, turn_intent.as_deref()).await;
    }

    let _ = egress.await;
}

fn phase_for_tool(name: &str) -> ConversationPhase {
    match name {
        "book_appointment" | "cancel_appointment" | "reschedule_appointment" => {
            ConversationPhase::Confirmation
        }
        "get_available_slots" => ConversationPhase::SlotCollection,
        _ => ConversationPhase::Execution,
    }
}

/// Per-turn egress: audio queue → telephony media frames. Exits when the
/// flushed utterance drains, on barge-in, or after two consecutive
/// post-flush timeouts.
async fn run_egress(
    ctx: Arc<CallContext>,
    turn_cancel: CancellationToken,
    audio: Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>>,
    flush_sent: Arc<std::sync::atomic::AtomicBool>,
) {
    set_speaking(&ctx.speaking, true);
    let mut rx = audio.lock().await;
    let mut timeouts_after_flush: u32 = 0;

    'pump: loop {
        tokio::select! {
            _ = turn_cancel.cancelled() => break 'pump,
            received = tokio::time::timeout(EGRESS_RECV_TIMEOUT, rx.recv()) => {
                match received {
                    Ok(Some(chunk)) => {
                        timeouts_after_flush = 0;
                        if !is_speaking(&ctx.speaking) {
                            break 'pump;
                        }
                        for frame in media_frames(&ctx.stream_sid, &chunk) {
                            if ctx.out_tx.send(frame).await.is_err() {
                                break 'pump;
                            }
                        }
                    }
                    Ok(None) => break 'pump, // synthesizer gone
                    Err(_) => {
                        if !is_speaking(&ctx.speaking) {
                            break 'pump;
                        }
                        if !flush_sent.load(std::sync::atomic::Ordering::Acquire) {
                            // generation still producing; keep waiting
                            continue;
                        }
                        if ctx.tts.read().await.is_drained() {
                            break 'pump; // stream drained and queue empty
                        }
                        timeouts_after_flush += 1;
                        if timeouts_after_flush >= EGRESS_TIMEOUT_LIMIT {
                            debug!(call_sid = %ctx.call_sid, "egress timed out after flush");
                            break 'pump;
                        }
                    }
                }
            }
        }
    }

    drop(rx);
    set_speaking(&ctx.speaking, false);
}

/// Pull complete sentences off the accumulating buffer. Boundaries are
/// `.`, `!`, `?`, `:`, and newline; the trailing partial stays buffered.
fn drain_sentences(buffer: &mut String) -> Vec<String> {
    let mut complete = Vec::new();
    while let Some(pos) = buffer.find(['.', '!', '?', ':', '\n']) {
        let sentence: String = buffer.drain(..=pos).collect();
        let trimmed = sentence.trim();
        if !trimmed.is_empty() {
            complete.push(trimmed.to_string());
        }
    }
    complete
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_flush_at_boundaries() {
        let mut buffer = String::new();
        buffer.push_str("Sure! I can book that");
        let flushed = drain_sentences(&mut buffer);
        assert_eq!(flushed, vec!["Sure!"]);
        assert_eq!(buffer, " I can book that");

        buffer.push_str(" for Tuesday. Anything else?");
        let flushed = drain_sentences(&mut buffer);
        assert_eq!(
            flushed,
            vec!["I can book that for Tuesday.", "Anything else?"]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn newline_and_colon_are_boundaries() {
        let mut buffer = "Here's the plan:\nfirst the oil".to_string();
        let flushed = drain_sentences(&mut buffer);
        assert_eq!(flushed, vec!["Here's the plan:"]);
        assert_eq!(buffer, "first the oil");
    }

    #[test]
    fn partial_sentence_stays_buffered() {
        let mut buffer = "no boundary yet".to_string();
        assert!(drain_sentences(&mut buffer).is_empty());
        assert_eq!(buffer, "no boundary yet");
    }

    #[test]
    fn empty_fragments_dropped() {
        let mut buffer = "\n\nHello.".to_string();
        let flushed = drain_sentences(&mut buffer);
        assert_eq!(flushed, vec!["Hello."]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn tool_names_map_to_phases() {
        assert_eq!(
            phase_for_tool("book_appointment"),
            ConversationPhase::Confirmation
        );
        assert_eq!(
            phase_for_tool("get_available_slots"),
            ConversationPhase::SlotCollection
        );
        assert_eq!(
            phase_for_tool("lookup_customer"),
            ConversationPhase::Execution
        );
    }
}
