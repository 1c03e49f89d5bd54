use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Customer not found: {id}")]
    CustomerNotFound { id: i64 },

    #[error("Vehicle not found: {id}")]
    VehicleNotFound { id: i64 },

    #[error("Appointment not found: {id}")]
    AppointmentNotFound { id: i64 },

    #[error("Vehicle {vehicle_id} does not belong to customer {customer_id}")]
    OwnershipMismatch { vehicle_id: i64, customer_id: i64 },

    #[error("Appointment {id} is cancelled and cannot be rescheduled")]
    AlreadyCancelled { id: i64 },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
