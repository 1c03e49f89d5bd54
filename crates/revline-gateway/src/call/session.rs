//! Session lifecycle: initialization on `start`, persistence after turns,
//! and final teardown.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use revline_core::types::{CallDirection, CallKind, ConversationPhase};
use revline_db::appointments::AppointmentRepo;
use revline_db::call_logs::CallLogRepo;
use revline_db::customers::CustomerRepo;
use revline_db::types::{AppointmentWithVehicle, Customer, NewCallLog, Vehicle};
use revline_llm::{ChatClient, History, Role};
use revline_store::{ConversationTurn, SessionRecord};
use revline_telephony::frames::StartMeta;

use crate::app::AppState;
use crate::prompt::{self, PromptContext};
use crate::tools::lookup_customer::load_customer_snapshot;
use crate::tools::ToolContext;

use super::turn::CallContext;

pub struct CallSetup {
    pub call_kind: CallKind,
    pub customer_id: Option<i64>,
}

/// Session start: persist the record, classify the call, and set the
/// system prompt from the matching context.
pub async fn initialize(
    state: &Arc<AppState>,
    tool_ctx: &Arc<ToolContext>,
    start: &StartMeta,
    caller_phone: &str,
    chat: &mut ChatClient,
) -> CallSetup {
    let mut record = SessionRecord::new(&start.call_sid, caller_phone);
    record.stream_sid = Some(start.stream_sid.clone());

    let prompt_ctx = PromptContext {
        dealership_name: &state.config.dealership.name,
        caller_phone,
    };

    let reminder_target = start
        .custom_parameters
        .get("appointment_id")
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(|id| load_reminder_target(state, id));

    let (call_kind, customer_id) = if let Some((customer, appointment)) = reminder_target {
        chat.set_system_prompt(prompt::outbound_reminder(&prompt_ctx, &customer, &appointment));
        (CallKind::OutboundReminder, Some(customer.id))
    } else {
        match load_customer_snapshot(tool_ctx, caller_phone).await {
            Ok(Some(snapshot)) => {
                let customer: Option<Customer> =
                    serde_json::from_value(snapshot.customer.clone()).ok();
                let vehicles: Vec<Vehicle> = snapshot
                    .vehicles
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
                let upcoming: Vec<AppointmentWithVehicle> = snapshot
                    .upcoming_appointments
                    .iter()
                    .filter_map(|a| serde_json::from_value(a.clone()).ok())
                    .collect();

                match customer {
                    Some(customer) => {
                        chat.set_system_prompt(prompt::inbound_existing(
                            &prompt_ctx,
                            &customer,
                            &vehicles,
                            &upcoming,
                        ));
                        (CallKind::InboundExisting, Some(customer.id))
                    }
                    None => {
                        chat.set_system_prompt(prompt::inbound_new(&prompt_ctx));
                        (CallKind::InboundNew, None)
                    }
                }
            }
            Ok(None) => {
                chat.set_system_prompt(prompt::inbound_new(&prompt_ctx));
                (CallKind::InboundNew, None)
            }
            Err(e) => {
                warn!(error = %e, "customer lookup failed at session start");
                chat.set_system_prompt(prompt::inbound_new(&prompt_ctx));
                (CallKind::InboundNew, None)
            }
        }
    };

    record.call_kind = Some(call_kind);
    record.customer_id = customer_id;

    if let Err(e) = state.store.set_session(&start.call_sid, &record).await {
        warn!(error = %e, "session record persist failed, continuing without it");
    }

    let direction = match call_kind {
        CallKind::OutboundReminder => CallDirection::Outbound,
        _ => CallDirection::Inbound,
    };
    if let Err(e) = CallLogRepo::new(&state.db).open(&NewCallLog {
        call_sid: start.call_sid.clone(),
        customer_id,
        direction,
        caller_phone: caller_phone.to_string(),
        started_at: Utc::now(),
    }) {
        warn!(error = %e, "call log open failed");
    }

    info!(
        call_sid = %start.call_sid,
        kind = ?call_kind,
        "session initialized"
    );
    CallSetup {
        call_kind,
        customer_id,
    }
}

fn load_reminder_target(
    state: &Arc<AppState>,
    appointment_id: i64,
) -> Option<(Customer, AppointmentWithVehicle)> {
    let appointment = AppointmentRepo::new(&state.db).get(appointment_id).ok()??;
    let customer = CustomerRepo::new(&state.db)
        .get(appointment.customer_id)
        .ok()??;
    let vehicle = revline_db::vehicles::VehicleRepo::new(&state.db)
        .get(appointment.vehicle_id)
        .ok()??;
    Some((
        customer,
        AppointmentWithVehicle {
            appointment,
            vehicle,
        },
    ))
}

/// Map the LLM history into session-record turns.
pub fn history_to_session(history: &History) -> Vec<ConversationTurn> {
    history
        .turns()
        .iter()
        .map(|turn| ConversationTurn {
            role: match turn.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string(),
            content: turn.content.clone(),
            tool_call_id: turn.tool_call_id.clone(),
            tool_calls: turn
                .tool_calls
                .as_ref()
                .and_then(|calls| serde_json::to_value(calls).ok()),
        })
        .collect()
}

/// Persist the post-turn snapshot: history, advisory state, intent.
pub async fn persist_after_turn(
    ctx: &CallContext,
    phase: ConversationPhase,
    intent: Option<&str>,
) {
    let (history, usage) = {
        let chat = ctx.chat.lock().await;
        (history_to_session(chat.history()), chat.token_usage())
    };

    let mut patch = json!({
        "conversation_history": history,
        "current_state": phase,
        "speaking": false,
        "tokens_in": usage.tokens_in,
        "tokens_out": usage.tokens_out,
    });
    if let Some(intent) = intent {
        patch["intent"] = json!(intent);
    }

    if let Err(e) = ctx.state.store.update_session(&ctx.call_sid, &patch).await {
        warn!(call_sid = %ctx.call_sid, error = %e, "post-turn session update failed");
    }
}

/// Final persistence at teardown: session state, call log, usage.
pub async fn teardown(ctx: &CallContext, setup: &CallSetup) {
    let (history, usage, transcript, intent) = {
        let chat = ctx.chat.lock().await;
        let transcript = chat
            .history()
            .turns()
            .iter()
            .filter_map(|t| match t.role {
                Role::User => Some(format!("caller: {}", t.content.as_deref().unwrap_or(""))),
                Role::Assistant if t.content.is_some() => {
                    Some(format!("agent: {}", t.content.as_deref().unwrap_or("")))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        let intent = chat
            .history()
            .turns()
            .iter()
            .rev()
            .find_map(|t| t.tool_calls.as_ref())
            .and_then(|calls| calls.first())
            .map(|c| c.name.clone());
        (
            history_to_session(chat.history()),
            chat.token_usage(),
            transcript,
            intent,
        )
    };

    let patch = json!({
        "conversation_history": history,
        "current_state": ConversationPhase::Closing,
        "speaking": false,
        "ended_at": Utc::now().to_rfc3339(),
        "tokens_in": usage.tokens_in,
        "tokens_out": usage.tokens_out,
    });
    if let Err(e) = ctx.state.store.update_session(&ctx.call_sid, &patch).await {
        warn!(call_sid = %ctx.call_sid, error = %e, "final session update failed");
    }

    if let Err(e) = CallLogRepo::new(&ctx.state.db).finalize(
        &ctx.call_sid,
        intent.as_deref(),
        Some(&transcript),
        Some("completed"),
        Utc::now(),
        usage.tokens_in as i64,
        usage.tokens_out as i64,
    ) {
        warn!(call_sid = %ctx.call_sid, error = %e, "call log finalize failed");
    }

    info!(
        call_sid = %ctx.call_sid,
        caller = %revline_core::phone::mask(&ctx.caller_phone),
        kind = ?setup.call_kind,
        customer_id = ?setup.customer_id,
        tokens_in = usage.tokens_in,
        tokens_out = usage.tokens_out,
        "session torn down"
    );
}

/// Teardown for calls that never got a working speech leg.
pub async fn teardown_failed(state: &Arc<AppState>, call_sid: &str, outcome: &str) {
    let patch = json!({
        "current_state": ConversationPhase::Closing,
        "speaking": false,
        "ended_at": Utc::now().to_rfc3339(),
    });
    let _ = state.store.update_session(call_sid, &patch).await;
    if let Err(e) =
        CallLogRepo::new(&state.db).finalize(call_sid, None, None, Some(outcome), Utc::now(), 0, 0)
    {
        warn!(call_sid, error = %e, "failed-call log finalize failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_llm::ToolCallPayload;

    #[test]
    fn history_maps_tool_turns() {
        let mut history = History::new();
        history.set_system_prompt("persona");
        history.add_user("cancel my appointment");
        history.add_tool_call_turn(
            None,
            vec![ToolCallPayload {
                id: "call_9".to_string(),
                name: "cancel_appointment".to_string(),
                arguments: r#"{"appointment_id":4}"#.to_string(),
            }],
        );
        history.add_tool_result("call_9", r#"{"success":true}"#);
        history.add_assistant("Done, it's cancelled.");

        let turns = history_to_session(&history);
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[2].role, "assistant");
        assert!(turns[2].tool_calls.is_some());
        assert_eq!(turns[3].role, "tool");
        assert_eq!(turns[3].tool_call_id.as_deref(), Some("call_9"));
    }
}
