use chrono::Utc;
use tracing::instrument;

use revline_core::vin;

use crate::customers::parse_utc;
use crate::database::Database;
use crate::error::{DbError, Result};
use crate::types::{NewVehicle, Vehicle};

/// Typed access to the `vehicles` table.
pub struct VehicleRepo<'a> {
    db: &'a Database,
}

impl<'a> VehicleRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a vehicle for an existing customer. VIN is uppercased and
    /// must be unique; mileage must be non-negative.
    #[instrument(skip(self, new))]
    pub fn create(&self, new: &NewVehicle) -> Result<Vehicle> {
        let canonical_vin =
            vin::normalize(&new.vin).map_err(|e| DbError::Validation(e.to_string()))?;
        if new.mileage < 0 {
            return Err(DbError::Validation("mileage must be non-negative".into()));
        }

        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();

        // FK enforcement would catch this too, but a typed error reads
        // better in the tool envelope.
        let customer_exists: bool = conn
            .query_row(
                "SELECT 1 FROM customers WHERE id = ?1",
                rusqlite::params![new.customer_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !customer_exists {
            return Err(DbError::CustomerNotFound {
                id: new.customer_id,
            });
        }

        conn.execute(
            "INSERT INTO vehicles
             (customer_id, vin, year, make, model, trim, color, mileage,
              is_primary, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', ?10, ?10)",
            rusqlite::params![
                new.customer_id,
                canonical_vin,
                new.year,
                new.make,
                new.model,
                new.trim,
                new.color,
                new.mileage,
                new.is_primary as i64,
                now,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::Constraint(format!("VIN {canonical_vin} already registered"))
            }
            other => DbError::Database(other),
        })?;

        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {COLS} FROM vehicles v WHERE v.id = ?1"),
            rusqlite::params![id],
            |row| row_to_vehicle(row, 0),
        )
        .map_err(DbError::Database)
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Option<Vehicle>> {
        let conn = self.db.lock();
        match conn.query_row(
            &format!("SELECT {COLS} FROM vehicles v WHERE v.id = ?1"),
            rusqlite::params![id],
            |row| row_to_vehicle(row, 0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Database(e)),
        }
    }

    #[instrument(skip(self))]
    pub fn list_for_customer(&self, customer_id: i64) -> Result<Vec<Vehicle>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM vehicles v
             WHERE v.customer_id = ?1
             ORDER BY v.is_primary DESC, v.id"
        ))?;
        let rows = stmt.query_map(rusqlite::params![customer_id], |row| {
            row_to_vehicle(row, 0)
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The ownership check every appointment write goes through.
    #[instrument(skip(self))]
    pub fn verify_ownership(&self, vehicle_id: i64, customer_id: i64) -> Result<Vehicle> {
        let vehicle = self
            .get(vehicle_id)?
            .ok_or(DbError::VehicleNotFound { id: vehicle_id })?;
        if vehicle.customer_id != customer_id {
            return Err(DbError::OwnershipMismatch {
                vehicle_id,
                customer_id,
            });
        }
        Ok(vehicle)
    }

    #[instrument(skip(self))]
    pub fn record_service(&self, id: i64, serviced_at: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE vehicles SET last_service_at = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![serviced_at, now, id],
        )?;
        if changed == 0 {
            return Err(DbError::VehicleNotFound { id });
        }
        Ok(())
    }
}

const COLS: &str = "v.id, v.customer_id, v.vin, v.year, v.make, v.model, v.trim, v.color, \
                    v.mileage, v.last_service_at, v.next_service_due, v.is_primary, \
                    v.status, v.created_at, v.updated_at";

/// Map a vehicle row starting at `offset` (non-zero when joined after
/// customer columns).
pub(crate) fn row_to_vehicle(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Vehicle> {
    Ok(Vehicle {
        id: row.get(offset)?,
        customer_id: row.get(offset + 1)?,
        vin: row.get(offset + 2)?,
        year: row.get(offset + 3)?,
        make: row.get(offset + 4)?,
        model: row.get(offset + 5)?,
        trim: row.get(offset + 6)?,
        color: row.get(offset + 7)?,
        mileage: row.get(offset + 8)?,
        last_service_at: row.get(offset + 9)?,
        next_service_due: row.get(offset + 10)?,
        is_primary: row.get::<_, i64>(offset + 11)? != 0,
        status: row.get(offset + 12)?,
        created_at: parse_utc(row, offset + 13)?,
        updated_at: parse_utc(row, offset + 14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::CustomerRepo;
    use crate::types::NewCustomer;

    fn seed_customer(db: &Database) -> i64 {
        CustomerRepo::new(db)
            .create(&NewCustomer {
                phone: "5551234567".to_string(),
                first_name: "Jane".to_string(),
                last_name: "Roe".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn test_vehicle(customer_id: i64, vin: &str) -> NewVehicle {
        NewVehicle {
            customer_id,
            vin: vin.to_string(),
            year: 2021,
            make: "Honda".to_string(),
            model: "Accord".to_string(),
            mileage: 24000,
            is_primary: true,
            ..Default::default()
        }
    }

    #[test]
    fn vin_uppercased_on_write() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_customer(&db);
        let v = VehicleRepo::new(&db)
            .create(&test_vehicle(cid, "1hgcm82633a004352"))
            .unwrap();
        assert_eq!(v.vin, "1HGCM82633A004352");
    }

    #[test]
    fn invalid_vin_rejected() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_customer(&db);
        let err = VehicleRepo::new(&db)
            .create(&test_vehicle(cid, "1HGCM82633A00435Q"))
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[test]
    fn ownership_mismatch_detected() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_customer(&db);
        let other = CustomerRepo::new(&db)
            .create(&NewCustomer {
                phone: "5559876543".to_string(),
                first_name: "John".to_string(),
                last_name: "Doe".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id;

        let repo = VehicleRepo::new(&db);
        let v = repo.create(&test_vehicle(cid, "1HGCM82633A004352")).unwrap();

        assert!(repo.verify_ownership(v.id, cid).is_ok());
        let err = repo.verify_ownership(v.id, other).unwrap_err();
        assert!(matches!(err, DbError::OwnershipMismatch { .. }));
    }

    #[test]
    fn deleting_customer_cascades_vehicles() {
        let db = Database::open_in_memory().unwrap();
        let cid = seed_customer(&db);
        let repo = VehicleRepo::new(&db);
        let v = repo.create(&test_vehicle(cid, "1HGCM82633A004352")).unwrap();

        db.lock()
            .execute("DELETE FROM customers WHERE id = ?1", rusqlite::params![cid])
            .unwrap();
        assert!(repo.get(v.id).unwrap().is_none());
    }
}
