//! `get_available_slots` — free booking slots for a day.
//!
//! Business hours live in the dealership's timezone; the calendar speaks
//! UTC. Conversion happens here and only here: local windows are built,
//! converted to UTC, busy intervals subtracted, and candidate starts
//! generated on a 30-minute grid.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde_json::{json, Value};

use revline_calendar::BusyInterval;
use revline_core::config::BusinessHoursConfig;
use revline_llm::{ToolOutcome, VoiceTool};

use super::{required_str, ToolContext};

const SLOT_STEP_MINUTES: i64 = 30;

/// Hour ranges `[start, end)` open on `date`, local time, split around
/// lunch. Sunday yields nothing.
fn business_windows(date: NaiveDate, hours: &BusinessHoursConfig) -> Vec<(u32, u32)> {
    let (open, close) = match date.weekday() {
        Weekday::Sun => return Vec::new(),
        Weekday::Sat => (hours.saturday_open, hours.saturday_close),
        _ => (hours.weekday_open, hours.weekday_close),
    };

    let mut windows = Vec::new();
    // morning block up to lunch
    if open < hours.lunch_start.min(close) {
        windows.push((open, hours.lunch_start.min(close)));
    }
    // afternoon block after lunch
    if hours.lunch_end.max(open) < close {
        windows.push((hours.lunch_end.max(open), close));
    }
    windows
}

/// Convert a local hour window to a UTC interval. Windows that land in a
/// DST gap are skipped rather than guessed at.
fn window_to_utc(
    date: NaiveDate,
    window: (u32, u32),
    tz: Tz,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = tz
        .from_local_datetime(&date.and_hms_opt(window.0, 0, 0)?)
        .single()?
        .with_timezone(&Utc);
    let end = tz
        .from_local_datetime(&date.and_hms_opt(window.1, 0, 0)?)
        .single()?
        .with_timezone(&Utc);
    Some((start, end))
}

/// Subtract busy intervals from a free window, preserving order.
fn subtract_busy(
    window: (DateTime<Utc>, DateTime<Utc>),
    busy: &[BusyInterval],
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut free = vec![window];
    for interval in busy {
        let mut next = Vec::new();
        for (start, end) in free {
            if interval.end <= start || interval.start >= end {
                next.push((start, end));
                continue;
            }
            if interval.start > start {
                next.push((start, interval.start));
            }
            if interval.end < end {
                next.push((interval.end, end));
            }
        }
        free = next;
    }
    free
}

/// Candidate starts on the slot grid that fit `duration` inside the free
/// intervals.
fn slots_in(
    free: &[(DateTime<Utc>, DateTime<Utc>)],
    duration: Duration,
) -> Vec<DateTime<Utc>> {
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    let mut slots = Vec::new();
    for &(start, end) in free {
        let mut cursor = start;
        while cursor + duration <= end {
            slots.push(cursor);
            cursor += step;
        }
    }
    slots
}

pub struct AvailableSlotsTool {
    ctx: Arc<ToolContext>,
}

impl AvailableSlotsTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for AvailableSlotsTool {
    fn name(&self) -> &str {
        "get_available_slots"
    }

    fn description(&self) -> &str {
        "List open service slots for a given date. Checks shop hours and the live \
         calendar. Returns an empty list with a message when the shop is closed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Requested date, YYYY-MM-DD."
                },
                "duration": {
                    "type": "integer",
                    "description": "Appointment length in minutes. Defaults to 30."
                }
            },
            "required": ["date"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(raw_date) = required_str(&args, "date") else {
            return ToolOutcome::fail("missing_argument", "'date' is required");
        };
        let Ok(date) = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d") else {
            return ToolOutcome::fail("invalid_date", format!("'{raw_date}' is not YYYY-MM-DD"));
        };
        let duration_minutes = args
            .get("duration")
            .and_then(|v| v.as_i64())
            .unwrap_or(30);
        if duration_minutes <= 0 {
            return ToolOutcome::fail("invalid_duration", "duration must be positive");
        }
        let duration = Duration::minutes(duration_minutes);

        let Ok(tz) = Tz::from_str(&self.ctx.config.calendar.timezone) else {
            return ToolOutcome::fail(
                "config_error",
                format!("unknown timezone '{}'", self.ctx.config.calendar.timezone),
            );
        };

        let windows = business_windows(date, &self.ctx.config.business_hours);
        if windows.is_empty() {
            return ToolOutcome::ok_with_message(
                json!({ "date": raw_date, "slots": [] }),
                "The shop is closed on Sundays",
            );
        }

        let utc_windows: Vec<_> = windows
            .iter()
            .filter_map(|&w| window_to_utc(date, w, tz))
            .collect();
        let Some(&(day_start, _)) = utc_windows.first() else {
            return ToolOutcome::fail("invalid_date", "date falls outside representable time");
        };
        let day_end = utc_windows.last().map(|&(_, end)| end).unwrap_or(day_start);

        let busy = match self.ctx.calendar.freebusy(day_start, day_end).await {
            Ok(busy) => busy,
            Err(e) => return ToolOutcome::fail("calendar_error", e.to_string()),
        };

        let mut starts = Vec::new();
        for window in utc_windows {
            starts.extend(slots_in(&subtract_busy(window, &busy), duration));
        }

        let slots: Vec<Value> = starts
            .iter()
            .map(|s| {
                json!({
                    "start": s.to_rfc3339(),
                    "local_time": s.with_timezone(&tz).format("%H:%M").to_string(),
                })
            })
            .collect();

        ToolOutcome::ok(json!({
            "date": raw_date,
            "duration_minutes": duration_minutes,
            "slots": slots,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours() -> BusinessHoursConfig {
        BusinessHoursConfig::default()
    }

    #[test]
    fn sunday_is_closed() {
        // 2026-08-02 is a Sunday
        let date = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();
        assert!(business_windows(date, &hours()).is_empty());
    }

    #[test]
    fn saturday_uses_short_window() {
        // 2026-08-01 is a Saturday
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(business_windows(date, &hours()), vec![(9, 12), (13, 15)]);
    }

    #[test]
    fn weekday_splits_around_lunch() {
        // 2026-08-03 is a Monday
        let date = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        assert_eq!(business_windows(date, &hours()), vec![(9, 12), (13, 17)]);
    }

    #[test]
    fn busy_interval_splits_free_window() {
        let window = (
            Utc.with_ymd_and_hms(2026, 8, 3, 13, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 3, 17, 0, 0).unwrap(),
        );
        let busy = vec![BusyInterval {
            start: Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 8, 3, 15, 0, 0).unwrap(),
        }];
        let free = subtract_busy(window, &busy);
        assert_eq!(free.len(), 2);
        assert_eq!(free[0].1, busy[0].start);
        assert_eq!(free[1].0, busy[0].end);
    }

    #[test]
    fn busy_covering_window_removes_it() {
        let window = (
            Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap(),
        );
        let busy = vec![BusyInterval {
            start: Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 8, 3, 13, 0, 0).unwrap(),
        }];
        assert!(subtract_busy(window, &busy).is_empty());
    }

    #[test]
    fn slots_fit_duration_inside_window() {
        let free = vec![(
            Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 3, 10, 30, 0).unwrap(),
        )];
        // 60-minute appointments: 09:00 and 09:30 fit, 10:00 does not
        let slots = slots_in(&free, Duration::minutes(60));
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].time().to_string(), "09:00:00");
        assert_eq!(slots[1].time().to_string(), "09:30:00");
    }

    #[test]
    fn nine_am_slot_present_on_open_weekday() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let tz = Tz::from_str("America/New_York").unwrap();
        let utc_windows: Vec<_> = business_windows(date, &hours())
            .into_iter()
            .filter_map(|w| window_to_utc(date, w, tz))
            .collect();
        let slots: Vec<_> = utc_windows
            .iter()
            .flat_map(|&w| slots_in(&subtract_busy(w, &[]), Duration::minutes(30)))
            .collect();
        let local: Vec<String> = slots
            .iter()
            .map(|s| s.with_timezone(&tz).format("%H:%M").to_string())
            .collect();
        assert!(local.contains(&"09:00".to_string()));
        // lunch hour excluded
        assert!(!local.contains(&"12:00".to_string()));
        assert!(!local.contains(&"12:30".to_string()));
        assert!(local.contains(&"13:00".to_string()));
    }
}
