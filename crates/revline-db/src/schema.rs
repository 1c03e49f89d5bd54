use rusqlite::{Connection, Result};

/// Initialise all tables and indexes. Safe to call on every startup
/// (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_customers_table(conn)?;
    create_vehicles_table(conn)?;
    create_appointments_table(conn)?;
    create_call_logs_table(conn)?;
    Ok(())
}

fn create_customers_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS customers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            phone           TEXT NOT NULL UNIQUE,
            email           TEXT,
            first_name      TEXT NOT NULL,
            last_name       TEXT NOT NULL,
            date_of_birth   TEXT,
            address_line1   TEXT,
            address_line2   TEXT,
            city            TEXT,
            state           TEXT,
            postal_code     TEXT,
            customer_since  TEXT,
            prefers_sms     INTEGER NOT NULL DEFAULT 0,
            prefers_email   INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_customers_phone
            ON customers(phone);",
    )
}

fn create_vehicles_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS vehicles (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id       INTEGER NOT NULL
                              REFERENCES customers(id) ON DELETE CASCADE,
            vin               TEXT NOT NULL UNIQUE,
            year              INTEGER NOT NULL,
            make              TEXT NOT NULL,
            model             TEXT NOT NULL,
            trim              TEXT,
            color             TEXT,
            mileage           INTEGER NOT NULL DEFAULT 0,
            last_service_at   TEXT,
            next_service_due  TEXT,
            is_primary        INTEGER NOT NULL DEFAULT 0,
            status            TEXT NOT NULL DEFAULT 'active',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_vehicles_customer
            ON vehicles(customer_id);",
    )
}

fn create_appointments_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS appointments (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id         INTEGER NOT NULL
                                REFERENCES customers(id) ON DELETE CASCADE,
            vehicle_id          INTEGER NOT NULL
                                REFERENCES vehicles(id),
            scheduled_at        TEXT NOT NULL,
            duration_minutes    INTEGER NOT NULL DEFAULT 60,
            service_type        TEXT NOT NULL,
            status              TEXT NOT NULL DEFAULT 'scheduled',
            cancellation_reason TEXT,
            booking_method      TEXT NOT NULL DEFAULT 'phone',
            external_event_id   TEXT,
            notes               TEXT,
            confirmation_sent   INTEGER NOT NULL DEFAULT 0,
            reminder_sent       INTEGER NOT NULL DEFAULT 0,
            completed_at        TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_appt_status_time
            ON appointments(status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_appt_customer_time
            ON appointments(customer_id, scheduled_at);",
    )
}

fn create_call_logs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS call_logs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            call_sid      TEXT NOT NULL UNIQUE,
            customer_id   INTEGER REFERENCES customers(id) ON DELETE SET NULL,
            direction     TEXT NOT NULL,
            caller_phone  TEXT NOT NULL,
            intent        TEXT,
            transcript    TEXT,
            started_at    TEXT NOT NULL,
            ended_at      TEXT,
            outcome       TEXT,
            tokens_in     INTEGER NOT NULL DEFAULT 0,
            tokens_out    INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_call_logs_customer
            ON call_logs(customer_id, started_at DESC);",
    )
}
