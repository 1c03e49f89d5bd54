// Verify wire format matches what the telephony provider sends and expects.
// These tests ensure media-stream compatibility is never broken.

use base64::Engine;
use revline_telephony::frames::{media_frames, InboundFrame, OutboundFrame, FRAME_BYTES};

#[test]
fn start_frame_parses_custom_parameters() {
    let json = r#"{
        "event": "start",
        "sequenceNumber": "1",
        "start": {
            "accountSid": "ACxxxx",
            "callSid": "CA1234",
            "streamSid": "MZ5678",
            "customParameters": { "caller_phone": "+15551234567" }
        }
    }"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    match frame {
        InboundFrame::Start { start } => {
            assert_eq!(start.call_sid, "CA1234");
            assert_eq!(start.stream_sid, "MZ5678");
            assert_eq!(
                start.custom_parameters.get("caller_phone").map(String::as_str),
                Some("+15551234567")
            );
        }
        other => panic!("expected start frame, got {other:?}"),
    }
}

#[test]
fn media_frame_decodes_payload() {
    let raw = vec![0x7fu8; 160];
    let b64 = base64::engine::general_purpose::STANDARD.encode(&raw);
    let json = format!(r#"{{"event":"media","media":{{"payload":"{b64}"}}}}"#);

    let frame: InboundFrame = serde_json::from_str(&json).unwrap();
    match frame {
        InboundFrame::Media { media } => assert_eq!(media.decode(), raw),
        other => panic!("expected media frame, got {other:?}"),
    }
}

#[test]
fn malformed_media_payload_decodes_empty() {
    let json = r#"{"event":"media","media":{"payload":"!!not-base64!!"}}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    match frame {
        InboundFrame::Media { media } => assert!(media.decode().is_empty()),
        other => panic!("expected media frame, got {other:?}"),
    }
}

#[test]
fn stop_frame_parses() {
    let frame: InboundFrame = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
    assert!(matches!(frame, InboundFrame::Stop));
}

#[test]
fn outbound_media_serialization() {
    let frame = OutboundFrame::media("MZ5678", &[0u8, 1, 2, 3]);
    let json = frame.to_json();

    assert!(json.contains(r#""event":"media""#));
    assert!(json.contains(r#""streamSid":"MZ5678""#));
    assert!(json.contains(r#""payload""#));
}

#[test]
fn outbound_clear_serialization() {
    let json = OutboundFrame::clear("MZ5678").to_json();
    assert!(json.contains(r#""event":"clear""#));
    assert!(json.contains(r#""streamSid":"MZ5678""#));
    // no media body on a clear
    assert!(!json.contains("payload"));
}

#[test]
fn audio_is_chunked_into_frame_sized_payloads() {
    let audio = vec![0x55u8; FRAME_BYTES * 2 + 40];
    let frames = media_frames("MZ1", &audio);
    assert_eq!(frames.len(), 3);

    let last = frames.last().unwrap().to_json();
    let parsed: serde_json::Value = serde_json::from_str(&last).unwrap();
    let payload = parsed["media"]["payload"].as_str().unwrap();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .unwrap();
    assert_eq!(decoded.len(), 40);
}
