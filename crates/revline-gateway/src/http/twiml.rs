//! Bootstrap markup endpoints. The telephony provider POSTs here when a
//! call arrives (or when we originate one); the response tells it to open
//! the bidirectional media stream, passing call context through as custom
//! parameters.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use tracing::info;

use revline_core::phone;

use crate::app::AppState;

/// POST /voice — inbound call bootstrap.
pub async fn inbound_handler(
    State(state): State<Arc<AppState>>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let from = params.get("From").cloned().unwrap_or_default();
    info!(caller = %phone::mask(&from), "inbound call bootstrap");

    let stream_url = media_stream_url(&state.config.telephony.bootstrap_url);
    let body = connect_twiml(&stream_url, &[("caller_phone", &from)]);
    ([(header::CONTENT_TYPE, "text/xml")], body)
}

#[derive(serde::Deserialize)]
pub struct OutboundParams {
    pub appointment_id: i64,
}

/// POST /voice/outbound?appointment_id=N — reminder call bootstrap.
pub async fn outbound_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OutboundParams>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let to = params.get("To").cloned().unwrap_or_default();
    info!(
        appointment_id = query.appointment_id,
        callee = %phone::mask(&to),
        "outbound reminder bootstrap"
    );

    let stream_url = media_stream_url(&state.config.telephony.bootstrap_url);
    let appointment_id = query.appointment_id.to_string();
    let body = connect_twiml(
        &stream_url,
        &[("caller_phone", &to), ("appointment_id", &appointment_id)],
    );
    ([(header::CONTENT_TYPE, "text/xml")], body)
}

fn media_stream_url(bootstrap_url: &str) -> String {
    let host = bootstrap_url
        .trim_end_matches('/')
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    format!("wss://{host}/media-stream")
}

fn connect_twiml(stream_url: &str, params: &[(&str, &str)]) -> String {
    let mut parameters = String::new();
    for (name, value) in params {
        parameters.push_str(&format!(
            r#"      <Parameter name="{}" value="{}"/>
"#,
            xml_escape(name),
            xml_escape(value)
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Connect>
    <Stream url="{}">
{}    </Stream>
  </Connect>
</Response>
"#,
        xml_escape(stream_url),
        parameters
    )
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twiml_opens_media_stream_with_parameters() {
        let body = connect_twiml(
            "wss://agent.example/media-stream",
            &[("caller_phone", "+15551234567")],
        );
        assert!(body.contains(r#"<Stream url="wss://agent.example/media-stream">"#));
        assert!(body.contains(r#"<Parameter name="caller_phone" value="+15551234567"/>"#));
        assert!(body.starts_with("<?xml"));
    }

    #[test]
    fn stream_url_derived_from_bootstrap() {
        assert_eq!(
            media_stream_url("https://agent.example/"),
            "wss://agent.example/media-stream"
        );
    }

    #[test]
    fn xml_special_chars_escaped() {
        assert_eq!(xml_escape(r#"a"b&c"#), "a&quot;b&amp;c");
    }
}
