//! Dealership tools the model can call.
//!
//! Every handler implements [`VoiceTool`], receives the shared
//! [`ToolContext`], and returns the canonical envelope on every path —
//! nothing here raises into the generate loop.

pub mod available_slots;
pub mod book_appointment;
pub mod cancel_appointment;
pub mod create_customer;
pub mod create_vehicle;
pub mod decode_vin;
pub mod lookup_customer;
pub mod reschedule_appointment;
pub mod upcoming_appointments;

use std::sync::Arc;

use revline_calendar::CalendarClient;
use revline_core::config::RevlineConfig;
use revline_db::Database;
use revline_llm::ChatClient;
use revline_store::SessionStore;

use crate::app::AppState;

/// Request-scoped context handed to every tool handler.
pub struct ToolContext {
    pub db: Arc<Database>,
    pub store: Arc<SessionStore>,
    pub calendar: Arc<CalendarClient>,
    pub http: reqwest::Client,
    pub config: RevlineConfig,
}

impl ToolContext {
    pub fn from_state(state: &AppState) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::clone(&state.db),
            store: Arc::clone(&state.store),
            calendar: Arc::clone(&state.calendar),
            http: state.http.clone(),
            config: state.config.clone(),
        })
    }
}

/// Register the full tool set for a call.
pub fn register_all(chat: &mut ChatClient, ctx: &Arc<ToolContext>) {
    chat.register_tool(Arc::new(lookup_customer::LookupCustomerTool::new(ctx)));
    chat.register_tool(Arc::new(available_slots::AvailableSlotsTool::new(ctx)));
    chat.register_tool(Arc::new(book_appointment::BookAppointmentTool::new(ctx)));
    chat.register_tool(Arc::new(
        upcoming_appointments::UpcomingAppointmentsTool::new(ctx),
    ));
    chat.register_tool(Arc::new(cancel_appointment::CancelAppointmentTool::new(ctx)));
    chat.register_tool(Arc::new(
        reschedule_appointment::RescheduleAppointmentTool::new(ctx),
    ));
    chat.register_tool(Arc::new(decode_vin::DecodeVinTool::new(ctx)));
    chat.register_tool(Arc::new(create_customer::CreateCustomerTool::new(ctx)));
    chat.register_tool(Arc::new(create_vehicle::CreateVehicleTool::new(ctx)));
}

/// Pull a required string argument, trimmed.
pub(crate) fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn required_i64(args: &serde_json::Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}
