use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use revline_core::config::{CalendarConfig, CALENDAR_DEADLINE_SECS};

use crate::auth::TokenProvider;
use crate::error::{CalendarError, Result};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// A busy interval from a freebusy query, UTC.
#[derive(Debug, Clone, PartialEq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The fields of a created/updated event the agent cares about.
#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub html_link: Option<String>,
}

/// Input for event creation.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Customer email; when present the event is sent with updates to
    /// attendees.
    pub attendee_email: Option<String>,
}

pub struct CalendarClient {
    client: reqwest::Client,
    tokens: TokenProvider,
    calendar_id: String,
}

impl CalendarClient {
    pub fn new(config: &CalendarConfig) -> Self {
        // Single-digit-second deadline on every calendar call.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(CALENDAR_DEADLINE_SECS))
            .build()
            .unwrap_or_default();
        let tokens = TokenProvider::new(
            client.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.refresh_token.clone(),
        );
        Self {
            client,
            tokens,
            calendar_id: config.calendar_id.clone(),
        }
    }

    /// Busy intervals within `[start, end)`, UTC, in calendar order.
    pub async fn freebusy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>> {
        let token = self.tokens.access_token().await?;
        let body = serde_json::json!({
            "timeMin": start.to_rfc3339(),
            "timeMax": end.to_rfc3339(),
            "items": [ { "id": self.calendar_id } ],
        });

        debug!(%start, %end, "freebusy query");
        let resp = self
            .client
            .post(format!("{API_BASE}/freeBusy"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let parsed: FreeBusyResponse = resp
            .json()
            .await
            .map_err(|e| CalendarError::Parse(e.to_string()))?;

        let busy = parsed
            .calendars
            .get(&self.calendar_id)
            .map(|c| c.busy.clone())
            .unwrap_or_default();

        busy.into_iter()
            .map(|b| {
                let start = parse_instant(&b.start)?;
                let end = parse_instant(&b.end)?;
                Ok(BusyInterval { start, end })
            })
            .collect()
    }

    /// Create an event. When an attendee email is present, invitations go
    /// out (`sendUpdates=all`).
    pub async fn insert_event(&self, input: &EventInput) -> Result<CalendarEvent> {
        let token = self.tokens.access_token().await?;

        let mut body = serde_json::json!({
            "summary": input.summary,
            "description": input.description,
            "start": { "dateTime": input.start.to_rfc3339(), "timeZone": "UTC" },
            "end": { "dateTime": input.end.to_rfc3339(), "timeZone": "UTC" },
        });
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(email) = &input.attendee_email {
            body["attendees"] = serde_json::json!([ { "email": email } ]);
            query.push(("sendUpdates", "all"));
        }

        let url = format!(
            "{API_BASE}/calendars/{}/events",
            urlencoding::encode(&self.calendar_id)
        );
        let resp = self
            .client
            .post(url)
            .query(&query)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let event: EventResponse = resp
            .json()
            .await
            .map_err(|e| CalendarError::Parse(e.to_string()))?;
        info!(event_id = %event.id, "calendar event created");
        Ok(CalendarEvent {
            id: event.id,
            html_link: event.html_link,
        })
    }

    /// Move an existing event to a new window (PATCH semantics).
    pub async fn update_event(
        &self,
        event_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let body = serde_json::json!({
            "start": { "dateTime": start.to_rfc3339(), "timeZone": "UTC" },
            "end": { "dateTime": end.to_rfc3339(), "timeZone": "UTC" },
        });

        let url = format!(
            "{API_BASE}/calendars/{}/events/{}",
            urlencoding::encode(&self.calendar_id),
            urlencoding::encode(event_id)
        );
        let resp = self
            .client
            .patch(url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(CalendarError::EventNotFound {
                event_id: event_id.to_string(),
            });
        }
        check_status(resp).await?;
        info!(event_id, "calendar event updated");
        Ok(())
    }

    /// Hard-delete an event. Already-gone events (404/410) succeed — the
    /// caller's intent is satisfied either way.
    pub async fn delete_event(&self, event_id: &str) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let url = format!(
            "{API_BASE}/calendars/{}/events/{}",
            urlencoding::encode(&self.calendar_id),
            urlencoding::encode(event_id)
        );
        let resp = self.client.delete(url).bearer_auth(&token).send().await?;

        match resp.status().as_u16() {
            404 | 410 => {
                warn!(event_id, "calendar event already gone on delete");
                Ok(())
            }
            _ => {
                check_status(resp).await?;
                info!(event_id, "calendar event deleted");
                Ok(())
            }
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = status.as_u16();
    let message = resp.text().await.unwrap_or_default();
    warn!(status = code, body = %message, "calendar API error");
    Err(CalendarError::Api {
        status: code,
        message,
    })
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CalendarError::Parse(format!("bad instant '{raw}': {e}")))
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: std::collections::HashMap<String, CalendarBusy>,
}

#[derive(Deserialize)]
struct CalendarBusy {
    #[serde(default)]
    busy: Vec<RawInterval>,
}

#[derive(Deserialize, Clone)]
struct RawInterval {
    start: String,
    end: String,
}

#[derive(Deserialize)]
struct EventResponse {
    id: String,
    #[serde(rename = "htmlLink")]
    html_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freebusy_response_parses() {
        let raw = r#"{
            "calendars": {
                "primary": {
                    "busy": [
                        { "start": "2026-08-04T14:00:00Z", "end": "2026-08-04T15:00:00Z" }
                    ]
                }
            }
        }"#;
        let parsed: FreeBusyResponse = serde_json::from_str(raw).unwrap();
        let busy = &parsed.calendars["primary"].busy;
        assert_eq!(busy.len(), 1);
        assert_eq!(
            parse_instant(&busy[0].start).unwrap(),
            "2026-08-04T14:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn event_response_parses_html_link() {
        let raw = r#"{ "id": "evt_1", "htmlLink": "https://calendar.example/evt_1" }"#;
        let event: EventResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(event.id, "evt_1");
        assert!(event.html_link.is_some());
    }
}
