//! Events as the calendar API returns them, before validation.
//!
//! Start and end stay as the raw strings Google sent. Conversion into a
//! [`quickcal_core::Event`] is where all-day events are recognised and
//! timestamps are parsed.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use quickcal_core::{Calendar, Event};

use crate::error::{ProviderError, ProviderResult};

/// Start or end of a raw event.
///
/// Timed events carry `date_time` (RFC 3339); all-day events only `date`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventTime {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub date_time: Option<String>,
}

impl RawEventTime {
    pub fn timed(date_time: impl Into<String>) -> Self {
        Self {
            date: None,
            date_time: Some(date_time.into()),
        }
    }

    pub fn all_day(date: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            date_time: None,
        }
    }

    /// True when there is no time of day.
    pub fn is_all_day(&self) -> bool {
        self.date_time.as_deref().is_none_or(str::is_empty)
    }

    fn parse(&self, which: &str) -> ProviderResult<DateTime<Utc>> {
        let raw = self.date_time.as_deref().unwrap_or_default();
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ProviderError::invalid_response(format!("bad {} time {:?}: {}", which, raw, e))
            })
    }
}

/// One item of an `events.list` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "iCalUID")]
    pub ical_uid: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub html_link: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start: RawEventTime,
    #[serde(default)]
    pub end: RawEventTime,
}

impl RawEvent {
    /// Creates a timed raw event.
    pub fn new(
        id: impl Into<String>,
        summary: impl Into<String>,
        start: RawEventTime,
        end: RawEventTime,
    ) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            start,
            end,
            ..Self::default()
        }
    }

    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    /// Converts into an event of `calendar`, inheriting its colour and title.
    ///
    /// Fails if either timestamp is not valid RFC 3339.
    pub fn into_event(self, calendar: &Calendar) -> ProviderResult<Event> {
        let start = self.start.parse("start")?;
        let end = self.end.parse("end")?;
        Ok(Event {
            id: self.id,
            ical_uid: self.ical_uid,
            title: self.summary,
            description: self.description,
            url: self.html_link,
            location: self.location,
            start,
            end,
            color: calendar.color.clone(),
            calendar_id: calendar.id.clone(),
            calendar_title: calendar.title.clone(),
        })
    }
}
