//! Outbound reminder dialing via the telephony REST API.
//!
//! POC safety rail: the destination must equal the configured test number.
//! Any other destination is refused before a request leaves the process.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use revline_core::phone;
use revline_db::appointments::AppointmentRepo;
use revline_db::customers::CustomerRepo;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct DialRequest {
    pub appointment_id: i64,
}

/// POST /calls/outbound — originate a reminder call for an appointment.
pub async fn dial_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DialRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match initiate_reminder_call(&state, req.appointment_id).await {
        Ok(call_sid) => (
            StatusCode::OK,
            Json(serde_json::json!({ "call_sid": call_sid })),
        ),
        Err(OutboundError::Refused(reason)) => {
            warn!(%reason, "outbound dial refused");
            (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": reason })),
            )
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("{0}")]
    Refused(String),

    #[error("appointment {0} not found")]
    AppointmentNotFound(i64),

    #[error("database error: {0}")]
    Database(String),

    #[error("telephony API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Look up the appointment's customer and dial them, pointing the call at
/// the outbound bootstrap TwiML.
pub async fn initiate_reminder_call(
    state: &AppState,
    appointment_id: i64,
) -> Result<String, OutboundError> {
    let appointment = AppointmentRepo::new(&state.db)
        .get(appointment_id)
        .map_err(|e| OutboundError::Database(e.to_string()))?
        .ok_or(OutboundError::AppointmentNotFound(appointment_id))?;

    let customer = CustomerRepo::new(&state.db)
        .get(appointment.customer_id)
        .map_err(|e| OutboundError::Database(e.to_string()))?
        .ok_or_else(|| OutboundError::Refused("appointment has no customer".to_string()))?;

    let telephony = &state.config.telephony;
    if customer.phone != telephony.outbound_test_number {
        return Err(OutboundError::Refused(format!(
            "outbound dialing is restricted to the test number; refusing {}",
            phone::mask(&customer.phone)
        )));
    }

    let twiml_url = format!(
        "{}/voice/outbound?appointment_id={}",
        telephony.bootstrap_url.trim_end_matches('/'),
        appointment_id
    );
    let api_url = format!(
        "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
        telephony.account_sid
    );

    let resp = state
        .http
        .post(&api_url)
        .basic_auth(&telephony.account_sid, Some(&telephony.auth_token))
        .form(&[
            ("To", customer.phone.as_str()),
            ("From", telephony.from_number.as_str()),
            ("Url", twiml_url.as_str()),
        ])
        .send()
        .await?;

    let status = resp.status().as_u16();
    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(OutboundError::Api { status, body });
    }

    let created: serde_json::Value = resp.json().await?;
    let call_sid = created
        .get("sid")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    info!(
        appointment_id,
        callee = %phone::mask(&customer.phone),
        %call_sid,
        "outbound reminder call created"
    );
    Ok(call_sid)
}
