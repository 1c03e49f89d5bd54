use chrono::Utc;
use tracing::instrument;

use revline_core::phone;

use crate::database::Database;
use crate::error::{DbError, Result};
use crate::types::{Customer, NewCustomer, Vehicle};
use crate::vehicles::row_to_vehicle;

/// Typed access to the `customers` table.
pub struct CustomerRepo<'a> {
    db: &'a Database,
}

impl<'a> CustomerRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a customer. Phone is normalized to E.164 and must be unique;
    /// email is lowercased.
    #[instrument(skip(self, new))]
    pub fn create(&self, new: &NewCustomer) -> Result<Customer> {
        let normalized =
            phone::normalize(&new.phone).map_err(|e| DbError::Validation(e.to_string()))?;
        let email = match &new.email {
            Some(e) => Some(validate_email(e)?),
            None => None,
        };
        if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
            return Err(DbError::Validation("first and last name are required".into()));
        }

        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO customers
             (phone, email, first_name, last_name, date_of_birth,
              address_line1, city, state, postal_code, customer_since,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            rusqlite::params![
                normalized,
                email,
                new.first_name.trim(),
                new.last_name.trim(),
                new.date_of_birth,
                new.address_line1,
                new.city,
                new.state,
                new.postal_code,
                now, // customer_since defaults to signup time
                now,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::Constraint(format!("phone {normalized} already registered"))
            }
            other => DbError::Database(other),
        })?;

        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {COLS} FROM customers c WHERE c.id = ?1"),
            rusqlite::params![id],
            row_to_customer,
        )
        .map_err(DbError::Database)
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Option<Customer>> {
        let conn = self.db.lock();
        match conn.query_row(
            &format!("SELECT {COLS} FROM customers c WHERE c.id = ?1"),
            rusqlite::params![id],
            row_to_customer,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Database(e)),
        }
    }

    /// Look up by normalized phone. The caller is expected to have
    /// normalized already; this re-normalizes defensively.
    #[instrument(skip(self, raw_phone))]
    pub fn find_by_phone(&self, raw_phone: &str) -> Result<Option<Customer>> {
        let normalized =
            phone::normalize(raw_phone).map_err(|e| DbError::Validation(e.to_string()))?;
        let conn = self.db.lock();
        match conn.query_row(
            &format!("SELECT {COLS} FROM customers c WHERE c.phone = ?1"),
            rusqlite::params![normalized],
            row_to_customer,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Database(e)),
        }
    }

    /// Customer plus all vehicles in one eager query (LEFT JOIN, grouped
    /// client-side). Avoids the N+1 of fetching vehicles per customer.
    #[instrument(skip(self, raw_phone))]
    pub fn find_by_phone_with_vehicles(
        &self,
        raw_phone: &str,
    ) -> Result<Option<(Customer, Vec<Vehicle>)>> {
        let normalized =
            phone::normalize(raw_phone).map_err(|e| DbError::Validation(e.to_string()))?;
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS}, {VCOLS}
             FROM customers c
             LEFT JOIN vehicles v ON v.customer_id = c.id
             WHERE c.phone = ?1
             ORDER BY v.is_primary DESC, v.id"
        ))?;

        let mut rows = stmt.query(rusqlite::params![normalized])?;
        let mut customer: Option<Customer> = None;
        let mut vehicles = Vec::new();

        while let Some(row) = rows.next()? {
            if customer.is_none() {
                customer = Some(row_to_customer(row)?);
            }
            // vehicle columns start after the customer block; id NULL means
            // the LEFT JOIN found no vehicle
            let vehicle_id: Option<i64> = row.get(16)?;
            if vehicle_id.is_some() {
                vehicles.push(row_to_vehicle(row, 16)?);
            }
        }

        Ok(customer.map(|c| (c, vehicles)))
    }

    #[instrument(skip(self))]
    pub fn touch(&self, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE customers SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        if changed == 0 {
            return Err(DbError::CustomerNotFound { id });
        }
        Ok(())
    }
}

const COLS: &str = "c.id, c.phone, c.email, c.first_name, c.last_name, c.date_of_birth, \
                    c.address_line1, c.address_line2, c.city, c.state, c.postal_code, \
                    c.customer_since, c.prefers_sms, c.prefers_email, c.created_at, c.updated_at";

const VCOLS: &str = "v.id, v.customer_id, v.vin, v.year, v.make, v.model, v.trim, v.color, \
                     v.mileage, v.last_service_at, v.next_service_due, v.is_primary, \
                     v.status, v.created_at, v.updated_at";

fn validate_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.len() > 255 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(DbError::Validation(format!("invalid email address: {raw}")));
    }
    Ok(email)
}

pub(crate) fn row_to_customer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        phone: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        date_of_birth: row.get(5)?,
        address_line1: row.get(6)?,
        address_line2: row.get(7)?,
        city: row.get(8)?,
        state: row.get(9)?,
        postal_code: row.get(10)?,
        customer_since: row.get(11)?,
        prefers_sms: row.get::<_, i64>(12)? != 0,
        prefers_email: row.get::<_, i64>(13)? != 0,
        created_at: parse_utc(row, 14)?,
        updated_at: parse_utc(row, 15)?,
    })
}

pub(crate) fn parse_utc(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<chrono::DateTime<Utc>> {
    let s: String = row.get(idx)?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_customer(phone: &str) -> NewCustomer {
        NewCustomer {
            phone: phone.to_string(),
            email: Some("Jane.Roe@Example.COM".to_string()),
            first_name: "Jane".to_string(),
            last_name: "Roe".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn create_normalizes_phone_and_email() {
        let db = Database::open_in_memory().unwrap();
        let repo = CustomerRepo::new(&db);
        let c = repo.create(&test_customer("(555) 123-4567")).unwrap();
        assert_eq!(c.phone, "+15551234567");
        assert_eq!(c.email.as_deref(), Some("jane.roe@example.com"));
    }

    #[test]
    fn duplicate_phone_rejected() {
        let db = Database::open_in_memory().unwrap();
        let repo = CustomerRepo::new(&db);
        repo.create(&test_customer("5551234567")).unwrap();
        let err = repo.create(&test_customer("+1 555 123 4567")).unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn short_phone_rejected_at_write() {
        let db = Database::open_in_memory().unwrap();
        let repo = CustomerRepo::new(&db);
        let err = repo.create(&test_customer("555-1234")).unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[test]
    fn find_by_phone_with_vehicles_returns_empty_vec_for_no_vehicles() {
        let db = Database::open_in_memory().unwrap();
        let repo = CustomerRepo::new(&db);
        repo.create(&test_customer("5551234567")).unwrap();

        let (c, vehicles) = repo
            .find_by_phone_with_vehicles("+15551234567")
            .unwrap()
            .unwrap();
        assert_eq!(c.first_name, "Jane");
        assert!(vehicles.is_empty());
    }
}
