use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revline_core::types::{CallKind, ConversationPhase};

/// One turn of conversation history as persisted in the session record.
/// Mirrors the LLM history shape so analytics can replay a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

/// Per-call session record, keyed by `session:{call_sid}`. TTL 3600 s,
/// never extended past one hour by updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub call_sid: String,
    pub stream_sid: Option<String>,
    pub caller_phone: String,
    pub customer_id: Option<i64>,
    pub call_kind: Option<CallKind>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    pub current_state: ConversationPhase,
    #[serde(default)]
    pub collected_slots: HashMap<String, serde_json::Value>,
    pub intent: Option<String>,
    pub speaking: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(call_sid: &str, caller_phone: &str) -> Self {
        let now = Utc::now();
        Self {
            call_sid: call_sid.to_string(),
            stream_sid: None,
            caller_phone: caller_phone.to_string(),
            customer_id: None,
            call_kind: None,
            conversation_history: Vec::new(),
            current_state: ConversationPhase::Greeting,
            collected_slots: HashMap::new(),
            intent: None,
            speaking: false,
            created_at: now,
            last_updated: now,
        }
    }
}

/// Denormalized customer snapshot cached at `customer:{phone}`, TTL 300 s.
/// A pure projection of the relational rows; invalidated on every write
/// that touches the customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub customer: serde_json::Value,
    #[serde(default)]
    pub vehicles: Vec<serde_json::Value>,
    #[serde(default)]
    pub upcoming_appointments: Vec<serde_json::Value>,
    pub cached_at: DateTime<Utc>,
}

/// Decoded VIN cached at `vin:{VIN}`, TTL 7 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VinRecord {
    pub vin: String,
    pub year: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub body_class: Option<String>,
    pub engine: Option<String>,
    pub cached_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_record_round_trips() {
        let mut record = SessionRecord::new("CA123", "+15551234567");
        record.conversation_history.push(ConversationTurn {
            role: "user".to_string(),
            content: Some("I need an oil change".to_string()),
            tool_call_id: None,
            tool_calls: None,
        });

        let json = serde_json::to_string(&record).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_sid, "CA123");
        assert_eq!(back.conversation_history.len(), 1);
        assert_eq!(back.current_state.as_str(), "greeting");
    }

    #[test]
    fn tool_turn_omits_absent_fields() {
        let turn = ConversationTurn {
            role: "assistant".to_string(),
            content: Some("hello".to_string()),
            tool_call_id: None,
            tool_calls: None,
        };
        let json = serde_json::to_string(&turn).unwrap();
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("tool_calls"));
    }
}
