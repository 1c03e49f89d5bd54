use chrono::{DateTime, Utc};
use tracing::instrument;

use revline_core::types::CallDirection;

use crate::customers::parse_utc;
use crate::database::Database;
use crate::error::{DbError, Result};
use crate::types::{CallLog, NewCallLog};

/// Typed access to the `call_logs` table. One row per telephony call,
/// opened at session start and finalized at teardown.
pub struct CallLogRepo<'a> {
    db: &'a Database,
}

impl<'a> CallLogRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(call_sid = %new.call_sid))]
    pub fn open(&self, new: &NewCallLog) -> Result<CallLog> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT OR IGNORE INTO call_logs
             (call_sid, customer_id, direction, caller_phone, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                new.call_sid,
                new.customer_id,
                new.direction.as_str(),
                new.caller_phone,
                new.started_at.to_rfc3339(),
            ],
        )?;

        // Read back — covers the duplicate-start race on reconnects.
        conn.query_row(
            &format!("SELECT {COLS} FROM call_logs WHERE call_sid = ?1"),
            rusqlite::params![new.call_sid],
            row_to_call_log,
        )
        .map_err(DbError::Database)
    }

    /// Finalize the log row at teardown.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, transcript, intent, outcome))]
    pub fn finalize(
        &self,
        call_sid: &str,
        intent: Option<&str>,
        transcript: Option<&str>,
        outcome: Option<&str>,
        ended_at: DateTime<Utc>,
        tokens_in: i64,
        tokens_out: i64,
    ) -> Result<()> {
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE call_logs
             SET intent = ?1, transcript = ?2, outcome = ?3, ended_at = ?4,
                 tokens_in = ?5, tokens_out = ?6
             WHERE call_sid = ?7",
            rusqlite::params![
                intent,
                transcript,
                outcome,
                ended_at.to_rfc3339(),
                tokens_in,
                tokens_out,
                call_sid,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::Validation(format!(
                "no call log for call_sid {call_sid}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get(&self, call_sid: &str) -> Result<Option<CallLog>> {
        let conn = self.db.lock();
        match conn.query_row(
            &format!("SELECT {COLS} FROM call_logs WHERE call_sid = ?1"),
            rusqlite::params![call_sid],
            row_to_call_log,
        ) {
            Ok(l) => Ok(Some(l)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Database(e)),
        }
    }
}

const COLS: &str = "id, call_sid, customer_id, direction, caller_phone, intent, transcript, \
                    started_at, ended_at, outcome, tokens_in, tokens_out";

fn row_to_call_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallLog> {
    let direction: String = row.get(3)?;
    let ended_at: Option<String> = row.get(8)?;
    Ok(CallLog {
        id: row.get(0)?,
        call_sid: row.get(1)?,
        customer_id: row.get(2)?,
        direction: if direction == "outbound" {
            CallDirection::Outbound
        } else {
            CallDirection::Inbound
        },
        caller_phone: row.get(4)?,
        intent: row.get(5)?,
        transcript: row.get(6)?,
        started_at: parse_utc(row, 7)?,
        ended_at: ended_at
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        outcome: row.get(9)?,
        tokens_in: row.get(10)?,
        tokens_out: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_finalize() {
        let db = Database::open_in_memory().unwrap();
        let repo = CallLogRepo::new(&db);

        let log = repo
            .open(&NewCallLog {
                call_sid: "CA123".to_string(),
                customer_id: None,
                direction: CallDirection::Inbound,
                caller_phone: "+15551234567".to_string(),
                started_at: Utc::now(),
            })
            .unwrap();
        assert!(log.ended_at.is_none());

        repo.finalize(
            "CA123",
            Some("book_appointment"),
            Some("hi\nhello"),
            Some("booked"),
            Utc::now(),
            1200,
            340,
        )
        .unwrap();

        let done = repo.get("CA123").unwrap().unwrap();
        assert!(done.ended_at.is_some());
        assert_eq!(done.tokens_in, 1200);
        assert_eq!(done.outcome.as_deref(), Some("booked"));
    }

    #[test]
    fn duplicate_open_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let repo = CallLogRepo::new(&db);
        let new = NewCallLog {
            call_sid: "CA123".to_string(),
            customer_id: None,
            direction: CallDirection::Inbound,
            caller_phone: "+15551234567".to_string(),
            started_at: Utc::now(),
        };
        let a = repo.open(&new).unwrap();
        let b = repo.open(&new).unwrap();
        assert_eq!(a.id, b.id);
    }
}
