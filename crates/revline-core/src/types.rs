use serde::{Deserialize, Serialize};

/// Lifecycle of a service appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "confirmed" => Some(Self::Confirmed),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }
}

/// Closed set of bookable service types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    OilChange,
    TireRotation,
    BrakeService,
    BrakeInspection,
    Inspection,
    EngineDiagnostics,
    GeneralMaintenance,
    Repair,
    Diagnostic,
    Recall,
    Other,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::OilChange => "oil_change",
            ServiceType::TireRotation => "tire_rotation",
            ServiceType::BrakeService => "brake_service",
            ServiceType::BrakeInspection => "brake_inspection",
            ServiceType::Inspection => "inspection",
            ServiceType::EngineDiagnostics => "engine_diagnostics",
            ServiceType::GeneralMaintenance => "general_maintenance",
            ServiceType::Repair => "repair",
            ServiceType::Diagnostic => "diagnostic",
            ServiceType::Recall => "recall",
            ServiceType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oil_change" => Some(Self::OilChange),
            "tire_rotation" => Some(Self::TireRotation),
            "brake_service" => Some(Self::BrakeService),
            "brake_inspection" => Some(Self::BrakeInspection),
            "inspection" => Some(Self::Inspection),
            "engine_diagnostics" => Some(Self::EngineDiagnostics),
            "general_maintenance" => Some(Self::GeneralMaintenance),
            "repair" => Some(Self::Repair),
            "diagnostic" => Some(Self::Diagnostic),
            "recall" => Some(Self::Recall),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Spoken label for TTS confirmations.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::OilChange => "oil change",
            ServiceType::TireRotation => "tire rotation",
            ServiceType::BrakeService => "brake service",
            ServiceType::BrakeInspection => "brake inspection",
            ServiceType::Inspection => "inspection",
            ServiceType::EngineDiagnostics => "engine diagnostics",
            ServiceType::GeneralMaintenance => "general maintenance",
            ServiceType::Repair => "repair",
            ServiceType::Diagnostic => "diagnostic",
            ServiceType::Recall => "recall work",
            ServiceType::Other => "service",
        }
    }
}

/// How an appointment was booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingMethod {
    Phone,
    Online,
    WalkIn,
    AiVoice,
}

impl BookingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingMethod::Phone => "phone",
            BookingMethod::Online => "online",
            BookingMethod::WalkIn => "walk_in",
            BookingMethod::AiVoice => "ai_voice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

/// Advisory conversation phase, surfaced to the LLM through prompt context
/// and recorded into the session record for analytics. Transitions are not
/// hard-wired to specific utterances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Greeting,
    IntentDetection,
    SlotCollection,
    Execution,
    Confirmation,
    Closing,
    Escalation,
    IdleListening,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationPhase::Greeting => "greeting",
            ConversationPhase::IntentDetection => "intent_detection",
            ConversationPhase::SlotCollection => "slot_collection",
            ConversationPhase::Execution => "execution",
            ConversationPhase::Confirmation => "confirmation",
            ConversationPhase::Closing => "closing",
            ConversationPhase::Escalation => "escalation",
            ConversationPhase::IdleListening => "idle_listening",
        }
    }
}

/// How a call was classified at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    InboundExisting,
    InboundNew,
    OutboundReminder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Confirmed,
            AppointmentStatus::InProgress,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert_eq!(AppointmentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(AppointmentStatus::parse("rescheduled"), None);
    }

    #[test]
    fn service_type_serde_matches_wire() {
        let json = serde_json::to_string(&ServiceType::OilChange).unwrap();
        assert_eq!(json, r#""oil_change""#);
        let parsed: ServiceType = serde_json::from_str(r#""brake_service""#).unwrap();
        assert_eq!(parsed, ServiceType::BrakeService);
    }

    #[test]
    fn unknown_service_type_rejected() {
        assert_eq!(ServiceType::parse("detailing"), None);
    }
}
