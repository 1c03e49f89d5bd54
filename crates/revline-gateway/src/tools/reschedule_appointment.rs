//! `reschedule_appointment` — move an appointment; update the calendar
//! event to match. Rescheduling to the same time touches nothing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{error, info};

use revline_db::appointments::AppointmentRepo;
use revline_db::customers::CustomerRepo;
use revline_db::DbError;
use revline_llm::{ToolOutcome, VoiceTool};

use super::{required_i64, required_str, ToolContext};

pub struct RescheduleAppointmentTool {
    ctx: Arc<ToolContext>,
}

impl RescheduleAppointmentTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for RescheduleAppointmentTool {
    fn name(&self) -> &str {
        "reschedule_appointment"
    }

    fn description(&self) -> &str {
        "Move an existing appointment to a new time. Fails if the appointment is \
         cancelled. Confirm the new slot with get_available_slots first."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "appointment_id": { "type": "integer" },
                "new_scheduled_at": {
                    "type": "string",
                    "description": "New start time, ISO-8601."
                }
            },
            "required": ["appointment_id", "new_scheduled_at"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(appointment_id) = required_i64(&args, "appointment_id") else {
            return ToolOutcome::fail("missing_argument", "'appointment_id' is required");
        };
        let Some(raw_time) = required_str(&args, "new_scheduled_at") else {
            return ToolOutcome::fail("missing_argument", "'new_scheduled_at' is required");
        };
        let new_time = match DateTime::parse_from_rfc3339(raw_time) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => return ToolOutcome::fail("invalid_time", format!("'{raw_time}': {e}")),
        };
        if new_time <= Utc::now() {
            return ToolOutcome::fail("invalid_time", "appointments must be in the future");
        }

        let repo = AppointmentRepo::new(&self.ctx.db);
        let before = match repo.get(appointment_id) {
            Ok(Some(a)) => a,
            Ok(None) => {
                return ToolOutcome::fail(
                    "not_found",
                    format!("no appointment with id {appointment_id}"),
                )
            }
            Err(e) => return ToolOutcome::fail("database_error", e.to_string()),
        };

        // same time: no state change, no calendar write, no invalidation
        if before.scheduled_at == new_time {
            return ToolOutcome::ok_with_message(
                json!({
                    "appointment_id": appointment_id,
                    "scheduled_at": new_time.to_rfc3339(),
                }),
                "Appointment already at that time",
            );
        }

        let updated = match repo.reschedule(appointment_id, new_time) {
            Ok(a) => a,
            Err(DbError::AlreadyCancelled { .. }) => {
                return ToolOutcome::fail(
                    "cancelled",
                    "cancelled appointments cannot be rescheduled",
                )
            }
            Err(DbError::AppointmentNotFound { .. }) => {
                return ToolOutcome::fail(
                    "not_found",
                    format!("no appointment with id {appointment_id}"),
                )
            }
            Err(e) => return ToolOutcome::fail("database_error", e.to_string()),
        };

        if let Some(event_id) = &updated.external_event_id {
            let end = new_time + Duration::minutes(updated.duration_minutes);
            if let Err(e) = self.ctx.calendar.update_event(event_id, new_time, end).await {
                // DB state is already moved; log for reconciliation
                error!(
                    appointment_id,
                    event_id = %event_id,
                    error = %e,
                    "calendar update failed after reschedule"
                );
            }
        }

        if let Ok(Some(customer)) = CustomerRepo::new(&self.ctx.db).get(updated.customer_id) {
            self.ctx
                .store
                .invalidate_customer_cache(&customer.phone)
                .await;
        }

        info!(appointment_id, new_time = %new_time, "appointment rescheduled");
        ToolOutcome::ok_with_message(
            json!({
                "appointment_id": appointment_id,
                "scheduled_at": updated.scheduled_at.to_rfc3339(),
            }),
            "Appointment rescheduled",
        )
    }
}
