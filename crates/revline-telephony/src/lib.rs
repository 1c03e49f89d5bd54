//! Wire types for the telephony provider's bidirectional media stream.
//!
//! The provider opens a WebSocket to `/media-stream` and exchanges JSON
//! frames tagged by `event`. Audio payloads are base64 mu-law at 8 kHz,
//! ~20 ms (160 bytes decoded) per frame.

pub mod frames;

pub use frames::{InboundFrame, MediaPayload, OutboundFrame, StartMeta};
