use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revline_core::types::{AppointmentStatus, BookingMethod, CallDirection, ServiceType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    /// Normalized E.164.
    pub phone: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub customer_since: Option<String>,
    pub prefers_sms: bool,
    pub prefers_email: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Input for creating a customer. Phone/email are validated and
/// canonicalized by the repository before the row is written.
#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub phone: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub customer_id: i64,
    pub vin: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub color: Option<String>,
    pub mileage: i64,
    pub last_service_at: Option<String>,
    pub next_service_due: Option<String>,
    pub is_primary: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    /// Spoken description for TTS confirmations ("2021 Honda Accord").
    pub fn display_name(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewVehicle {
    pub customer_id: i64,
    pub vin: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub color: Option<String>,
    pub mileage: i64,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub customer_id: i64,
    pub vehicle_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub service_type: ServiceType,
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub booking_method: BookingMethod,
    pub external_event_id: Option<String>,
    pub notes: Option<String>,
    pub confirmation_sent: bool,
    pub reminder_sent: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub customer_id: i64,
    pub vehicle_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub service_type: ServiceType,
    pub booking_method: BookingMethod,
    pub external_event_id: Option<String>,
    pub notes: Option<String>,
}

/// Appointment joined with its vehicle, for spoken summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentWithVehicle {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub vehicle: Vehicle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    pub id: i64,
    pub call_sid: String,
    pub customer_id: Option<i64>,
    pub direction: CallDirection,
    pub caller_phone: String,
    pub intent: Option<String>,
    pub transcript: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

#[derive(Debug, Clone)]
pub struct NewCallLog {
    pub call_sid: String,
    pub customer_id: Option<i64>,
    pub direction: CallDirection,
    pub caller_phone: String,
    pub started_at: DateTime<Utc>,
}
