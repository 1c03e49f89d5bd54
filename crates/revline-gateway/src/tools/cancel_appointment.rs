//! `cancel_appointment` — mark cancelled in the database, then best-effort
//! delete the calendar event. The DB state is authoritative: a failed
//! calendar delete is logged for reconciliation, never surfaced as a
//! failed cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info};

use revline_db::appointments::AppointmentRepo;
use revline_db::customers::CustomerRepo;
use revline_db::DbError;
use revline_llm::{ToolOutcome, VoiceTool};

use super::{required_i64, ToolContext};

pub struct CancelAppointmentTool {
    ctx: Arc<ToolContext>,
}

impl CancelAppointmentTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for CancelAppointmentTool {
    fn name(&self) -> &str {
        "cancel_appointment"
    }

    fn description(&self) -> &str {
        "Cancel an appointment. Records the reason and removes the calendar event. \
         Fails if the appointment is already cancelled."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "appointment_id": { "type": "integer" },
                "reason": {
                    "type": "string",
                    "description": "Why the customer is cancelling."
                }
            },
            "required": ["appointment_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(appointment_id) = required_i64(&args, "appointment_id") else {
            return ToolOutcome::fail("missing_argument", "'appointment_id' is required");
        };
        let reason = args.get("reason").and_then(|v| v.as_str());

        let cancelled = match AppointmentRepo::new(&self.ctx.db).cancel(appointment_id, reason) {
            Ok(a) => a,
            Err(DbError::AppointmentNotFound { .. }) => {
                return ToolOutcome::fail(
                    "not_found",
                    format!("no appointment with id {appointment_id}"),
                )
            }
            Err(DbError::AlreadyCancelled { .. }) => {
                return ToolOutcome::fail(
                    "already_cancelled",
                    "that appointment is already cancelled",
                )
            }
            Err(e) => return ToolOutcome::fail("database_error", e.to_string()),
        };

        // best effort; DB state wins
        if let Some(event_id) = &cancelled.external_event_id {
            if let Err(e) = self.ctx.calendar.delete_event(event_id).await {
                error!(
                    appointment_id,
                    event_id = %event_id,
                    error = %e,
                    "calendar delete failed after cancellation"
                );
            }
        }

        if let Ok(Some(customer)) = CustomerRepo::new(&self.ctx.db).get(cancelled.customer_id) {
            self.ctx
                .store
                .invalidate_customer_cache(&customer.phone)
                .await;
        }

        info!(appointment_id, "appointment cancelled");
        ToolOutcome::ok_with_message(
            json!({
                "appointment_id": appointment_id,
                "status": "cancelled",
            }),
            "Appointment cancelled",
        )
    }
}
