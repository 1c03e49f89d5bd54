//! Calendar client: OAuth2 refresh-token auth, freebusy queries, and event
//! CRUD against the Google-style calendar API. All inputs and outputs are
//! UTC; local-time conversion is the caller's concern.

pub mod auth;
pub mod client;
pub mod error;

pub use client::{BusyInterval, CalendarClient, CalendarEvent, EventInput};
pub use error::{CalendarError, Result};
