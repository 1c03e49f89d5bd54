//! Relational store: customers, vehicles, appointments, call logs.
//!
//! Access goes through typed repositories on [`Database`]; multi-statement
//! writes run inside a transaction (commit on success, rollback on drop).

pub mod appointments;
pub mod call_logs;
pub mod customers;
pub mod database;
pub mod error;
pub mod schema;
pub mod types;
pub mod vehicles;

pub use database::Database;
pub use error::{DbError, Result};
