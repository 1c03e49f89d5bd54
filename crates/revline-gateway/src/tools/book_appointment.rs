//! `book_appointment` — calendar-first booking with a compensating delete.
//!
//! The calendar event is created before the appointment row. If the row
//! write fails, the event is deleted so the system never books calendar
//! time it has no record of. The inverse hazard (a committed row pointing
//! at a calendar event we failed to create) cannot happen on this path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use revline_calendar::EventInput;
use revline_core::phone;
use revline_core::types::{BookingMethod, ServiceType};
use revline_db::appointments::AppointmentRepo;
use revline_db::customers::CustomerRepo;
use revline_db::vehicles::VehicleRepo;
use revline_db::DbError;
use revline_llm::{ToolOutcome, VoiceTool};

use super::{required_i64, required_str, ToolContext};

pub struct BookAppointmentTool {
    ctx: Arc<ToolContext>,
}

impl BookAppointmentTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for BookAppointmentTool {
    fn name(&self) -> &str {
        "book_appointment"
    }

    fn description(&self) -> &str {
        "Book a service appointment for a customer's vehicle at a specific time. \
         Creates the calendar event and the appointment record. Confirm the slot \
         with get_available_slots first."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "customer_id": { "type": "integer" },
                "vehicle_id": { "type": "integer" },
                "scheduled_at": {
                    "type": "string",
                    "description": "Start time, ISO-8601 (e.g. '2026-08-04T13:00:00Z')."
                },
                "service_type": {
                    "type": "string",
                    "enum": [
                        "oil_change", "tire_rotation", "brake_service", "brake_inspection",
                        "inspection", "engine_diagnostics", "general_maintenance",
                        "repair", "diagnostic", "recall", "other"
                    ]
                },
                "duration": {
                    "type": "integer",
                    "description": "Length in minutes. Defaults to 60."
                },
                "notes": { "type": "string" }
            },
            "required": ["customer_id", "vehicle_id", "scheduled_at", "service_type"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(customer_id) = required_i64(&args, "customer_id") else {
            return ToolOutcome::fail("missing_argument", "'customer_id' is required");
        };
        let Some(vehicle_id) = required_i64(&args, "vehicle_id") else {
            return ToolOutcome::fail("missing_argument", "'vehicle_id' is required");
        };
        let Some(raw_time) = required_str(&args, "scheduled_at") else {
            return ToolOutcome::fail("missing_argument", "'scheduled_at' is required");
        };
        let Some(raw_service) = required_str(&args, "service_type") else {
            return ToolOutcome::fail("missing_argument", "'service_type' is required");
        };

        let Some(service_type) = ServiceType::parse(raw_service) else {
            return ToolOutcome::fail(
                "invalid_service_type",
                format!("'{raw_service}' is not a known service type"),
            );
        };
        let scheduled_at = match DateTime::parse_from_rfc3339(raw_time) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                return ToolOutcome::fail("invalid_time", format!("'{raw_time}': {e}"));
            }
        };
        if scheduled_at <= Utc::now() {
            return ToolOutcome::fail("invalid_time", "appointments must be in the future");
        }
        let duration = args.get("duration").and_then(|v| v.as_i64()).unwrap_or(60);
        if duration <= 0 {
            return ToolOutcome::fail("invalid_duration", "duration must be positive");
        }
        let notes = args
            .get("notes")
            .and_then(|v| v.as_str())
            .map(String::from);

        // validate customer + ownership before touching the calendar
        let customer = match CustomerRepo::new(&self.ctx.db).get(customer_id) {
            Ok(Some(c)) => c,
            Ok(None) => {
                return ToolOutcome::fail(
                    "customer_not_found",
                    format!("no customer with id {customer_id}"),
                )
            }
            Err(e) => return ToolOutcome::fail("database_error", e.to_string()),
        };
        let vehicle = match VehicleRepo::new(&self.ctx.db).verify_ownership(vehicle_id, customer_id)
        {
            Ok(v) => v,
            Err(DbError::OwnershipMismatch { .. }) => {
                return ToolOutcome::fail(
                    "ownership_mismatch",
                    "that vehicle belongs to a different customer",
                )
            }
            Err(DbError::VehicleNotFound { .. }) => {
                return ToolOutcome::fail(
                    "vehicle_not_found",
                    format!("no vehicle with id {vehicle_id}"),
                )
            }
            Err(e) => return ToolOutcome::fail("database_error", e.to_string()),
        };

        // calendar first
        let event_input = EventInput {
            summary: format!(
                "{} — {} ({})",
                service_type.label(),
                customer.full_name(),
                vehicle.display_name()
            ),
            description: notes.clone(),
            start: scheduled_at,
            end: scheduled_at + Duration::minutes(duration),
            attendee_email: customer.email.clone(),
        };
        let event = match self.ctx.calendar.insert_event(&event_input).await {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "calendar insert failed, nothing booked");
                return ToolOutcome::fail("calendar_error", "Error booking appointment");
            }
        };

        // then the appointment row, compensating on failure
        let new = revline_db::types::NewAppointment {
            customer_id,
            vehicle_id,
            scheduled_at,
            duration_minutes: duration,
            service_type,
            booking_method: BookingMethod::AiVoice,
            external_event_id: Some(event.id.clone()),
            notes,
        };
        let appointment = match AppointmentRepo::new(&self.ctx.db).create(&new) {
            Ok(appointment) => appointment,
            Err(db_err) => {
                error!(error = %db_err, event_id = %event.id, "appointment insert failed, compensating");
                if let Err(cal_err) = self.ctx.calendar.delete_event(&event.id).await {
                    // reconciliation sweep picks these up from the log
                    error!(
                        event_id = %event.id,
                        error = %cal_err,
                        "compensating calendar delete failed"
                    );
                }
                return ToolOutcome::fail("database_error", "Error booking appointment");
            }
        };

        self.ctx
            .store
            .invalidate_customer_cache(&customer.phone)
            .await;

        info!(
            appointment_id = appointment.id,
            customer = %phone::mask(&customer.phone),
            service = service_type.as_str(),
            "appointment booked"
        );

        let mut data = json!({
            "appointment_id": appointment.id,
            "scheduled_at": appointment.scheduled_at.to_rfc3339(),
            "duration_minutes": appointment.duration_minutes,
            "service_type": service_type.as_str(),
            "vehicle": vehicle.display_name(),
        });
        if let Some(link) = event.html_link {
            data["calendar_link"] = json!(link);
        }
        ToolOutcome::ok_with_message(data, "Appointment booked")
    }
}
