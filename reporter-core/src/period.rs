//! Period calculator: maps "now" to a canonical weekly reporting window.
//!
//! Weeks run Monday 00:00 to the following Monday 00:00 in the configured
//! IANA timezone. Selection is by calendar-week containment of `now`, so a
//! trigger that fires a few minutes late still lands in the same period.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{ReportError, Result};
use crate::model::Window;

/// Which calendar week a run reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekSelection {
    /// The week containing `now`.
    #[default]
    Current,
    /// The last fully completed week before the one containing `now`.
    Previous,
}

/// Weekly cadence anchored in a timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub timezone: Tz,
    pub week: WeekSelection,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            week: WeekSelection::Current,
        }
    }
}

impl Schedule {
    pub fn new(timezone: Tz, week: WeekSelection) -> Self {
        Self { timezone, week }
    }
}

/// Parse an IANA timezone name like "America/Chicago".
pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.trim()
        .parse()
        .map_err(|_| ReportError::config(format!("invalid timezone: {tz}")))
}

/// Compute the reporting window for `now`. Pure and infallible.
pub fn compute_window(now: DateTime<Utc>, schedule: &Schedule) -> Window {
    let local = now.with_timezone(&schedule.timezone).date_naive();
    let monday = local - Duration::days(i64::from(local.weekday().num_days_from_monday()));
    let monday = match schedule.week {
        WeekSelection::Current => monday,
        WeekSelection::Previous => monday - Duration::days(7),
    };
    week_window(monday, &schedule.timezone)
}

/// The week immediately before `window`.
pub fn previous_window(window: &Window, schedule: &Schedule) -> Window {
    let local_start = window.start.with_timezone(&schedule.timezone).date_naive();
    week_window(local_start - Duration::days(7), &schedule.timezone)
}

/// Stable identifier for the week starting on `monday`.
pub fn period_id_for(monday: NaiveDate) -> String {
    let iso = monday.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

fn week_window(monday: NaiveDate, tz: &Tz) -> Window {
    Window {
        start: start_of_day_utc(monday, tz),
        end: start_of_day_utc(monday + Duration::days(7), tz),
        period_id: period_id_for(monday),
    }
}

/// First valid local instant of `date`. Midnight can fall inside a DST gap in
/// some zones; step forward until the local time exists.
pub fn start_of_day_utc(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    let mut probe = midnight;
    for _ in 0..(4 * 24) {
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return dt.with_timezone(&Utc);
        }
        probe = probe + Duration::minutes(15);
    }
    Utc.from_utc_datetime(&midnight)
}
