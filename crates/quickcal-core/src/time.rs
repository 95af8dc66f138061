//! Time windows and date keys.
//!
//! [`TimeWindow`] is the half-open `[start, end)` range handed to the
//! calendar API. Event caches are keyed by the local calendar date the
//! window starts on, formatted by [`date_key`].

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Format used for dates in cache keys and on the command line.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A time window for querying calendar events.
///
/// Represents a half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window. `end` is clamped so it is never before `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Creates a time window from a start time and duration.
    pub fn from_duration(start: DateTime<Utc>, duration: Duration) -> Self {
        Self::new(start, start + duration)
    }

    /// Creates a window covering `days` whole local days starting at `date`.
    ///
    /// Falls back to UTC midnight when the local midnight is ambiguous or
    /// skipped by a DST transition.
    pub fn for_days<Tz: TimeZone>(date: NaiveDate, days: u32, tz: &Tz) -> Self {
        let start = local_midnight(date, tz);
        let end_date = date
            .checked_add_days(chrono::Days::new(u64::from(days.max(1))))
            .unwrap_or(date);
        Self::new(start, local_midnight(end_date, tz))
    }

    /// Returns true if `instant` falls inside the window.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::default());
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

/// Formats a date the way cache keys and CLI arguments expect it.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Cache key holding the merged events for the given date.
pub fn date_key(date: NaiveDate) -> String {
    format!("events-{}.json", format_date(date))
}

/// Today's date in the local timezone.
pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_key_format() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(date_key(date), "events-2024-06-01.json");
    }

    #[test]
    fn parse_date_accepts_iso_and_trims() {
        assert_eq!(
            parse_date(" 2024-06-01 "),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert!(parse_date("2024/06/01").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn window_for_days_in_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let window = TimeWindow::for_days(date, 3, &Utc);
        assert_eq!(window.start.to_rfc3339(), "2024-06-01T00:00:00+00:00");
        assert_eq!(window.end.to_rfc3339(), "2024-06-04T00:00:00+00:00");
    }

    #[test]
    fn window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::from_duration(start, Duration::hours(1));
        assert!(window.contains(start));
        assert!(!window.contains(start + Duration::hours(1)));
    }

    #[test]
    fn window_end_never_precedes_start() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::new(start, start - Duration::hours(1));
        assert_eq!(window.start, window.end);
    }
}
