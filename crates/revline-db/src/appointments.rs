use chrono::{DateTime, Utc};
use tracing::instrument;

use revline_core::types::{AppointmentStatus, BookingMethod, ServiceType};

use crate::customers::parse_utc;
use crate::database::Database;
use crate::error::{DbError, Result};
use crate::types::{Appointment, AppointmentWithVehicle, NewAppointment};
use crate::vehicles::row_to_vehicle;

/// Typed access to the `appointments` table.
pub struct AppointmentRepo<'a> {
    db: &'a Database,
}

impl<'a> AppointmentRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create an appointment. The vehicle must belong to the customer at
    /// write time; duration must be positive. Runs in a transaction so the
    /// ownership check and the insert see the same state.
    #[instrument(skip(self, new))]
    pub fn create(&self, new: &NewAppointment) -> Result<Appointment> {
        if new.duration_minutes <= 0 {
            return Err(DbError::Validation("duration must be positive".into()));
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let owner: Option<i64> = match tx.query_row(
            "SELECT customer_id FROM vehicles WHERE id = ?1",
            rusqlite::params![new.vehicle_id],
            |row| row.get(0),
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(DbError::Database(e)),
        };
        let owner = owner.ok_or(DbError::VehicleNotFound {
            id: new.vehicle_id,
        })?;
        if owner != new.customer_id {
            return Err(DbError::OwnershipMismatch {
                vehicle_id: new.vehicle_id,
                customer_id: new.customer_id,
            });
        }

        tx.execute(
            "INSERT INTO appointments
             (customer_id, vehicle_id, scheduled_at, duration_minutes,
              service_type, status, booking_method, external_event_id,
              notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'scheduled', ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                new.customer_id,
                new.vehicle_id,
                new.scheduled_at.to_rfc3339(),
                new.duration_minutes,
                new.service_type.as_str(),
                new.booking_method.as_str(),
                new.external_event_id,
                new.notes,
                now,
            ],
        )?;

        let id = tx.last_insert_rowid();
        let appointment = tx.query_row(
            &format!("SELECT {COLS} FROM appointments a WHERE a.id = ?1"),
            rusqlite::params![id],
            row_to_appointment,
        )?;

        tx.commit()?;
        Ok(appointment)
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Option<Appointment>> {
        let conn = self.db.lock();
        match conn.query_row(
            &format!("SELECT {COLS} FROM appointments a WHERE a.id = ?1"),
            rusqlite::params![id],
            row_to_appointment,
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Database(e)),
        }
    }

    /// Upcoming scheduled/confirmed appointments with their vehicle, eager
    /// in one JOIN, soonest first.
    #[instrument(skip(self))]
    pub fn upcoming_for_customer(
        &self,
        customer_id: i64,
        limit: usize,
    ) -> Result<Vec<AppointmentWithVehicle>> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS}, {VCOLS}
             FROM appointments a
             JOIN vehicles v ON v.id = a.vehicle_id
             WHERE a.customer_id = ?1
               AND a.scheduled_at > ?2
               AND a.status IN ('scheduled', 'confirmed')
             ORDER BY a.scheduled_at ASC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![customer_id, now, limit as i64],
            |row| {
                Ok(AppointmentWithVehicle {
                    appointment: row_to_appointment(row)?,
                    vehicle: row_to_vehicle(row, APPT_COL_COUNT)?,
                })
            },
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Mark an appointment cancelled. Already-cancelled appointments are
    /// rejected without mutation.
    #[instrument(skip(self, reason))]
    pub fn cancel(&self, id: i64, reason: Option<&str>) -> Result<Appointment> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let current = tx.query_row(
            &format!("SELECT {COLS} FROM appointments a WHERE a.id = ?1"),
            rusqlite::params![id],
            row_to_appointment,
        );
        let current = match current {
            Ok(a) => a,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(DbError::AppointmentNotFound { id })
            }
            Err(e) => return Err(DbError::Database(e)),
        };
        if current.status == AppointmentStatus::Cancelled {
            return Err(DbError::AlreadyCancelled { id });
        }

        tx.execute(
            "UPDATE appointments
             SET status = 'cancelled', cancellation_reason = ?1, updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![reason, now, id],
        )?;
        let updated = tx.query_row(
            &format!("SELECT {COLS} FROM appointments a WHERE a.id = ?1"),
            rusqlite::params![id],
            row_to_appointment,
        )?;
        tx.commit()?;
        Ok(updated)
    }

    /// Move an appointment to a new time. Cancelled appointments cannot be
    /// rescheduled. Rescheduling to the identical time is a no-op that
    /// returns the unchanged row.
    #[instrument(skip(self))]
    pub fn reschedule(&self, id: i64, new_time: DateTime<Utc>) -> Result<Appointment> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let current = match tx.query_row(
            &format!("SELECT {COLS} FROM appointments a WHERE a.id = ?1"),
            rusqlite::params![id],
            row_to_appointment,
        ) {
            Ok(a) => a,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(DbError::AppointmentNotFound { id })
            }
            Err(e) => return Err(DbError::Database(e)),
        };
        if current.status == AppointmentStatus::Cancelled {
            return Err(DbError::AlreadyCancelled { id });
        }
        if current.scheduled_at == new_time {
            return Ok(current);
        }

        tx.execute(
            "UPDATE appointments SET scheduled_at = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_time.to_rfc3339(), now, id],
        )?;
        let updated = tx.query_row(
            &format!("SELECT {COLS} FROM appointments a WHERE a.id = ?1"),
            rusqlite::params![id],
            row_to_appointment,
        )?;
        tx.commit()?;
        Ok(updated)
    }

    /// Attach or detach the external calendar event reference.
    #[instrument(skip(self))]
    pub fn set_external_event(&self, id: i64, event_id: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE appointments SET external_event_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![event_id, now, id],
        )?;
        if changed == 0 {
            return Err(DbError::AppointmentNotFound { id });
        }
        Ok(())
    }

    /// Hard delete, used by the booking compensation path when the calendar
    /// event exists but the rest of the booking failed.
    #[instrument(skip(self))]
    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.db.lock();
        let changed = conn.execute(
            "DELETE FROM appointments WHERE id = ?1",
            rusqlite::params![id],
        )?;
        if changed == 0 {
            return Err(DbError::AppointmentNotFound { id });
        }
        Ok(())
    }
}

const APPT_COL_COUNT: usize = 16;

const COLS: &str = "a.id, a.customer_id, a.vehicle_id, a.scheduled_at, a.duration_minutes, \
                    a.service_type, a.status, a.cancellation_reason, a.booking_method, \
                    a.external_event_id, a.notes, a.confirmation_sent, a.reminder_sent, \
                    a.completed_at, a.created_at, a.updated_at";

const VCOLS: &str = "v.id, v.customer_id, v.vin, v.year, v.make, v.model, v.trim, v.color, \
                     v.mileage, v.last_service_at, v.next_service_due, v.is_primary, \
                     v.status, v.created_at, v.updated_at";

fn row_to_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    let service_type: String = row.get(5)?;
    let status: String = row.get(6)?;
    let booking_method: String = row.get(8)?;
    let completed_at: Option<String> = row.get(13)?;

    Ok(Appointment {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        vehicle_id: row.get(2)?,
        scheduled_at: parse_utc(row, 3)?,
        duration_minutes: row.get(4)?,
        service_type: ServiceType::parse(&service_type).unwrap_or(ServiceType::Other),
        status: AppointmentStatus::parse(&status).unwrap_or(AppointmentStatus::Scheduled),
        cancellation_reason: row.get(7)?,
        booking_method: match booking_method.as_str() {
            "online" => BookingMethod::Online,
            "walk_in" => BookingMethod::WalkIn,
            "ai_voice" => BookingMethod::AiVoice,
            _ => BookingMethod::Phone,
        },
        external_event_id: row.get(9)?,
        notes: row.get(10)?,
        confirmation_sent: row.get::<_, i64>(11)? != 0,
        reminder_sent: row.get::<_, i64>(12)? != 0,
        completed_at: completed_at
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        created_at: parse_utc(row, 14)?,
        updated_at: parse_utc(row, 15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::CustomerRepo;
    use crate::types::{NewCustomer, NewVehicle};
    use crate::vehicles::VehicleRepo;
    use chrono::Duration;

    fn seed(db: &Database) -> (i64, i64) {
        let cid = CustomerRepo::new(db)
            .create(&NewCustomer {
                phone: "5551234567".to_string(),
                first_name: "Jane".to_string(),
                last_name: "Roe".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id;
        let vid = VehicleRepo::new(db)
            .create(&NewVehicle {
                customer_id: cid,
                vin: "1HGCM82633A004352".to_string(),
                year: 2021,
                make: "Honda".to_string(),
                model: "Accord".to_string(),
                mileage: 24000,
                is_primary: true,
                ..Default::default()
            })
            .unwrap()
            .id;
        (cid, vid)
    }

    fn new_appt(cid: i64, vid: i64) -> NewAppointment {
        NewAppointment {
            customer_id: cid,
            vehicle_id: vid,
            scheduled_at: Utc::now() + Duration::days(1),
            duration_minutes: 60,
            service_type: ServiceType::OilChange,
            booking_method: BookingMethod::AiVoice,
            external_event_id: Some("evt_123".to_string()),
            notes: None,
        }
    }

    #[test]
    fn create_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let (cid, vid) = seed(&db);
        let repo = AppointmentRepo::new(&db);
        let a = repo.create(&new_appt(cid, vid)).unwrap();
        assert_eq!(a.status, AppointmentStatus::Scheduled);
        assert_eq!(a.service_type, ServiceType::OilChange);
        assert_eq!(a.external_event_id.as_deref(), Some("evt_123"));
    }

    #[test]
    fn ownership_enforced_at_write() {
        let db = Database::open_in_memory().unwrap();
        let (_cid, vid) = seed(&db);
        let other = CustomerRepo::new(&db)
            .create(&NewCustomer {
                phone: "5559876543".to_string(),
                first_name: "John".to_string(),
                last_name: "Doe".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id;

        let repo = AppointmentRepo::new(&db);
        let mut req = new_appt(other, vid);
        req.customer_id = other;
        let err = repo.create(&req).unwrap_err();
        assert!(matches!(err, DbError::OwnershipMismatch { .. }));
    }

    #[test]
    fn cancel_twice_rejected_without_mutation() {
        let db = Database::open_in_memory().unwrap();
        let (cid, vid) = seed(&db);
        let repo = AppointmentRepo::new(&db);
        let a = repo.create(&new_appt(cid, vid)).unwrap();

        let cancelled = repo.cancel(a.id, Some("customer request")).unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        assert_eq!(
            cancelled.cancellation_reason.as_deref(),
            Some("customer request")
        );

        let err = repo.cancel(a.id, Some("again")).unwrap_err();
        assert!(matches!(err, DbError::AlreadyCancelled { .. }));
        // reason from the first cancel survives
        let row = repo.get(a.id).unwrap().unwrap();
        assert_eq!(row.cancellation_reason.as_deref(), Some("customer request"));
    }

    #[test]
    fn reschedule_cancelled_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (cid, vid) = seed(&db);
        let repo = AppointmentRepo::new(&db);
        let a = repo.create(&new_appt(cid, vid)).unwrap();
        repo.cancel(a.id, None).unwrap();

        let err = repo
            .reschedule(a.id, Utc::now() + Duration::days(2))
            .unwrap_err();
        assert!(matches!(err, DbError::AlreadyCancelled { .. }));
    }

    #[test]
    fn reschedule_same_time_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let (cid, vid) = seed(&db);
        let repo = AppointmentRepo::new(&db);
        let a = repo.create(&new_appt(cid, vid)).unwrap();

        let again = repo.reschedule(a.id, a.scheduled_at).unwrap();
        assert_eq!(again.updated_at, a.updated_at);
    }

    #[test]
    fn upcoming_excludes_cancelled_and_past() {
        let db = Database::open_in_memory().unwrap();
        let (cid, vid) = seed(&db);
        let repo = AppointmentRepo::new(&db);

        let future = repo.create(&new_appt(cid, vid)).unwrap();
        let cancelled = repo.create(&new_appt(cid, vid)).unwrap();
        repo.cancel(cancelled.id, None).unwrap();

        let upcoming = repo.upcoming_for_customer(cid, 10).unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].appointment.id, future.id);
        assert_eq!(upcoming[0].vehicle.make, "Honda");
    }
}
