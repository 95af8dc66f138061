//! Calendar and event types shared by the fetch, cache and CLI layers.
//!
//! Both types are immutable snapshots of provider data. They are persisted
//! as JSON in the cache directory, so field names are part of the on-disk
//! format.

use std::fmt;

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};

/// A calendar belonging to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    /// Provider calendar ID.
    pub id: String,
    /// Display title (the user's override when one is set).
    pub title: String,
    /// Calendar description.
    #[serde(default)]
    pub description: String,
    /// CSS hex accent colour, e.g. `#9fe1e7`.
    #[serde(default)]
    pub color: String,
    /// Name of the account the calendar was fetched from.
    pub account_name: String,
    /// Whether the account may create events in this calendar.
    #[serde(default)]
    pub writable: bool,
}

impl Calendar {
    /// Creates a calendar with the given ID and title.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        account_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            color: String::new(),
            account_name: account_name.into(),
            writable: false,
        }
    }

    /// Builder method to set the accent colour.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Builder method to mark the calendar writable.
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }
}

/// Sorts calendars by title, the order they are listed in.
pub fn sort_by_title(calendars: &mut [Calendar]) {
    calendars.sort_by(|a, b| a.title.cmp(&b.title));
}

/// A timed calendar event.
///
/// All-day events never reach this type; they are dropped when fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Provider event ID, unique within its calendar.
    pub id: String,
    /// Cross-platform iCalendar UID.
    #[serde(default)]
    pub ical_uid: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Link to the event in the provider's web UI.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub location: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Accent colour inherited from the calendar.
    #[serde(default)]
    pub color: String,
    pub calendar_id: String,
    #[serde(default)]
    pub calendar_title: String,
}

impl Event {
    /// Returns how long the event lasts.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The identity of the event across calendars.
    pub fn key(&self) -> (&str, &str) {
        (self.calendar_id.as_str(), self.id.as_str())
    }

    /// Returns true if `query` appears in the title, location or calendar
    /// title (case-insensitive).
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        [&self.title, &self.location, &self.calendar_title]
            .iter()
            .any(|field| field.to_lowercase().contains(&query))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.start.with_timezone(&Local);
        write!(
            f,
            "\"{}\" on {} for {}m",
            self.title,
            start.format("%-d/%-m at %H:%M"),
            self.duration().num_minutes()
        )
    }
}
