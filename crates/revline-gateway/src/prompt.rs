//! System-prompt composition: base persona plus call-type context.
//!
//! The conversation phases are advisory — they are described to the model
//! here and recorded to the session for analytics, but control flow never
//! hinges on a specific utterance.

use revline_db::types::{AppointmentWithVehicle, Customer, Vehicle};

/// Voice-first persona. No markdown, short sentences — the output is
/// spoken, not read.
const BASE_PERSONA: &str = "You are a friendly, efficient service advisor on the phone. \
Speak naturally and conversationally in one to three short sentences. Never use markdown, \
bullet points, or special formatting; your words are synthesized to speech. Confirm dates, \
times, and vehicles explicitly before booking. Use the provided tools for every lookup, \
booking, cancellation, or reschedule; never invent appointment details. If the caller asks \
for something you cannot do, offer to have a human service advisor call them back. \
A conversation typically moves through greeting, understanding what the caller needs, \
collecting any missing details, doing the work with tools, confirming the result, and \
closing.";

pub struct PromptContext<'a> {
    pub dealership_name: &'a str,
    pub caller_phone: &'a str,
}

/// Inbound call from a known customer.
pub fn inbound_existing(
    ctx: &PromptContext<'_>,
    customer: &Customer,
    vehicles: &[Vehicle],
    upcoming: &[AppointmentWithVehicle],
) -> String {
    let mut prompt = format!(
        "{BASE_PERSONA}\n\nYou are answering for {}. The caller is an existing customer: {}",
        ctx.dealership_name,
        customer.full_name()
    );
    if let Some(since) = &customer.customer_since {
        prompt.push_str(&format!(", customer since {since}"));
    }
    prompt.push('.');

    if vehicles.is_empty() {
        prompt.push_str(" They have no vehicles on file; collect vehicle details before booking.");
    } else {
        prompt.push_str(" Vehicles on file:");
        for v in vehicles {
            prompt.push_str(&format!(
                " [id {}] {} (VIN {}, {} miles{})",
                v.id,
                v.display_name(),
                v.vin,
                v.mileage,
                if v.is_primary { ", primary" } else { "" },
            ));
        }
        prompt.push('.');
    }

    if upcoming.is_empty() {
        prompt.push_str(" They have no upcoming appointments.");
    } else {
        prompt.push_str(" Upcoming appointments:");
        for a in upcoming {
            prompt.push_str(&format!(
                " [id {}] {} for the {} at {}",
                a.appointment.id,
                a.appointment.service_type.label(),
                a.vehicle.display_name(),
                a.appointment.scheduled_at.format("%A %B %-d at %-I:%M %p UTC"),
            ));
        }
        prompt.push('.');
    }

    prompt.push_str(&format!(
        " The customer id is {} — pass it to tools that need it. Greet them by first name.",
        customer.id
    ));
    prompt
}

/// Inbound call from an unknown number.
pub fn inbound_new(ctx: &PromptContext<'_>) -> String {
    format!(
        "{BASE_PERSONA}\n\nYou are answering for {}. The caller at {} has no record on file. \
         Greet them, find out what they need, and if they want service, collect their name \
         and vehicle details, then register them with the create_customer and create_vehicle \
         tools before booking.",
        ctx.dealership_name, ctx.caller_phone
    )
}

/// Outbound reminder call for a specific appointment.
pub fn outbound_reminder(
    ctx: &PromptContext<'_>,
    customer: &Customer,
    appointment: &AppointmentWithVehicle,
) -> String {
    format!(
        "{BASE_PERSONA}\n\nYou are calling {} on behalf of {} to remind them about their \
         upcoming {} appointment for the {} on {}. Confirm whether the time still works; \
         offer to reschedule or cancel with the tools if it does not. The customer id is {} \
         and the appointment id is {}.",
        customer.full_name(),
        ctx.dealership_name,
        appointment.appointment.service_type.label(),
        appointment.vehicle.display_name(),
        appointment
            .appointment
            .scheduled_at
            .format("%A %B %-d at %-I:%M %p UTC"),
        customer.id,
        appointment.appointment.id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use revline_core::types::{AppointmentStatus, BookingMethod, ServiceType};
    use revline_db::types::Appointment;

    fn customer() -> Customer {
        Customer {
            id: 7,
            phone: "+15551234567".to_string(),
            email: Some("jane.roe@example.com".to_string()),
            first_name: "Jane".to_string(),
            last_name: "Roe".to_string(),
            date_of_birth: None,
            address_line1: None,
            address_line2: None,
            city: None,
            state: None,
            postal_code: None,
            customer_since: Some("2022-03-01".to_string()),
            prefers_sms: false,
            prefers_email: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn vehicle() -> Vehicle {
        Vehicle {
            id: 3,
            customer_id: 7,
            vin: "1HGCM82633A004352".to_string(),
            year: 2021,
            make: "Honda".to_string(),
            model: "Accord".to_string(),
            trim: None,
            color: None,
            mileage: 24000,
            last_service_at: None,
            next_service_due: None,
            is_primary: true,
            status: "active".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn existing_customer_prompt_names_vehicles_and_ids() {
        let ctx = PromptContext {
            dealership_name: "Revline Motors",
            caller_phone: "+15551234567",
        };
        let prompt = inbound_existing(&ctx, &customer(), &[vehicle()], &[]);
        assert!(prompt.contains("Jane Roe"));
        assert!(prompt.contains("2021 Honda Accord"));
        assert!(prompt.contains("customer id is 7"));
        assert!(prompt.contains("no upcoming appointments"));
    }

    #[test]
    fn new_caller_prompt_directs_registration() {
        let ctx = PromptContext {
            dealership_name: "Revline Motors",
            caller_phone: "+15550000000",
        };
        let prompt = inbound_new(&ctx);
        assert!(prompt.contains("no record on file"));
        assert!(prompt.contains("create_customer"));
    }

    #[test]
    fn reminder_prompt_carries_appointment() {
        let ctx = PromptContext {
            dealership_name: "Revline Motors",
            caller_phone: "+15551234567",
        };
        let appt = AppointmentWithVehicle {
            appointment: Appointment {
                id: 42,
                customer_id: 7,
                vehicle_id: 3,
                scheduled_at: "2026-08-04T13:00:00Z".parse().unwrap(),
                duration_minutes: 60,
                service_type: ServiceType::OilChange,
                status: AppointmentStatus::Scheduled,
                cancellation_reason: None,
                booking_method: BookingMethod::AiVoice,
                external_event_id: None,
                notes: None,
                confirmation_sent: false,
                reminder_sent: false,
                completed_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            vehicle: vehicle(),
        };
        let prompt = outbound_reminder(&ctx, &customer(), &appt);
        assert!(prompt.contains("appointment id is 42"));
        assert!(prompt.contains("oil change"));
    }
}
