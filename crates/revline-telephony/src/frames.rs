use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Decoded audio bytes per outbound media frame (~20 ms of mu-law @ 8 kHz).
pub const FRAME_BYTES: usize = 160;

/// Provider → server frame, tagged by `event`.
///
/// Wire examples:
/// `{"event":"start","start":{"callSid":"CA..","streamSid":"MZ..","customParameters":{...}}}`
/// `{"event":"media","media":{"payload":"<base64 mu-law>"}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    Connected,
    Start { start: StartMeta },
    Media { media: MediaPayload },
    Mark { mark: MarkMeta },
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub call_sid: String,
    pub stream_sid: String,
    /// Parameters passed through from the bootstrap markup
    /// (caller phone, appointment id for outbound reminders, ...).
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    /// Caller number, when the provider includes it on the start frame.
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

impl MediaPayload {
    /// Decode the base64 mu-law payload. Malformed payloads decode to empty,
    /// which the ingress path drops anyway.
    pub fn decode(&self) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkMeta {
    #[serde(default)]
    pub name: String,
}

/// Server → provider frame constructors. These serialize directly to the
/// provider's expected JSON; streams are addressed by `streamSid`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

impl OutboundFrame {
    /// Wrap raw mu-law bytes in a media frame.
    pub fn media(stream_sid: &str, mulaw: &[u8]) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: base64::engine::general_purpose::STANDARD.encode(mulaw),
            },
        }
    }

    /// Tell the provider to drop all buffered outbound audio.
    pub fn clear(stream_sid: &str) -> Self {
        OutboundFrame::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        OutboundFrame::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark {
                name: name.to_string(),
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Split a synthesized audio buffer into provider-sized media frames.
pub fn media_frames(stream_sid: &str, mulaw: &[u8]) -> Vec<OutboundFrame> {
    mulaw
        .chunks(FRAME_BYTES)
        .map(|chunk| OutboundFrame::media(stream_sid, chunk))
        .collect()
}
