//! `get_upcoming_appointments` — future scheduled/confirmed appointments
//! for a customer, vehicle included, soonest first.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use revline_db::appointments::AppointmentRepo;
use revline_db::customers::CustomerRepo;
use revline_llm::{ToolOutcome, VoiceTool};

use super::{required_i64, ToolContext};

pub struct UpcomingAppointmentsTool {
    ctx: Arc<ToolContext>,
}

impl UpcomingAppointmentsTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for UpcomingAppointmentsTool {
    fn name(&self) -> &str {
        "get_upcoming_appointments"
    }

    fn description(&self) -> &str {
        "List a customer's upcoming appointments (soonest first), including the \
         vehicle each one is for."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "customer_id": { "type": "integer" },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results. Defaults to 10."
                }
            },
            "required": ["customer_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(customer_id) = required_i64(&args, "customer_id") else {
            return ToolOutcome::fail("missing_argument", "'customer_id' is required");
        };
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(10)
            .min(50) as usize;

        match CustomerRepo::new(&self.ctx.db).get(customer_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return ToolOutcome::fail(
                    "customer_not_found",
                    format!("no customer with id {customer_id}"),
                )
            }
            Err(e) => return ToolOutcome::fail("database_error", e.to_string()),
        }

        match AppointmentRepo::new(&self.ctx.db).upcoming_for_customer(customer_id, limit) {
            Ok(appointments) => {
                let rows: Vec<Value> = appointments
                    .iter()
                    .map(|a| {
                        json!({
                            "appointment_id": a.appointment.id,
                            "scheduled_at": a.appointment.scheduled_at.to_rfc3339(),
                            "duration_minutes": a.appointment.duration_minutes,
                            "service_type": a.appointment.service_type.as_str(),
                            "status": a.appointment.status.as_str(),
                            "vehicle": a.vehicle.display_name(),
                            "vehicle_id": a.vehicle.id,
                        })
                    })
                    .collect();
                ToolOutcome::ok(json!({ "appointments": rows }))
            }
            Err(e) => ToolOutcome::fail("database_error", e.to_string()),
        }
    }
}
