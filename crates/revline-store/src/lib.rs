//! Ephemeral session store over Redis.
//!
//! Holds per-call session records plus short-TTL lookup caches (customer
//! snapshots, VIN decodes). Concurrent patches from a call's tasks go
//! through a server-side script so read-modify-write is atomic.

pub mod adapter;
pub mod error;
pub mod types;

pub use adapter::SessionStore;
pub use error::{Result, StoreError};
pub use types::{ConversationTurn, CustomerSnapshot, SessionRecord, VinRecord};
