//! Choosing which calendars to act on.
//!
//! Every "nothing to show" situation is a named variant of
//! [`CalendarSelection`] so callers can give the user a specific hint
//! instead of an empty list.

use std::collections::HashSet;

use crate::model::Calendar;

/// Outcome of selecting calendars from the user's accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarSelection {
    /// The selected calendars, in account order.
    Ready(Vec<Calendar>),
    /// No account is logged in.
    NoAccounts,
    /// Accounts exist but none has any calendar yet.
    NoCalendars,
    /// Calendars exist but none is active.
    NoActive,
    /// Active calendars exist but none accepts new events.
    NoWritable,
}

impl CalendarSelection {
    /// Returns the calendars if the selection is ready.
    pub fn calendars(&self) -> Option<&[Calendar]> {
        match self {
            Self::Ready(calendars) => Some(calendars),
            _ => None,
        }
    }

    pub fn into_calendars(self) -> Option<Vec<Calendar>> {
        match self {
            Self::Ready(calendars) => Some(calendars),
            _ => None,
        }
    }

    /// Short hint for the user, or `None` when ready.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Ready(_) => None,
            Self::NoAccounts => Some("No account, log in first"),
            Self::NoCalendars => Some("No calendars yet, they are still loading"),
            Self::NoActive => Some("No active calendar, activate one in the calendar list"),
            Self::NoWritable => Some("No active calendar accepts new events"),
        }
    }
}

/// Selects the calendars whose IDs are in `active`.
///
/// `accounts` yields each logged-in account's calendars.
pub fn select_active<'a, I>(accounts: I, active: &HashSet<String>) -> CalendarSelection
where
    I: IntoIterator<Item = &'a [Calendar]>,
{
    let mut any_account = false;
    let mut any_calendar = false;
    let mut selected = Vec::new();

    for calendars in accounts {
        any_account = true;
        any_calendar |= !calendars.is_empty();
        selected.extend(
            calendars
                .iter()
                .filter(|c| active.contains(&c.id))
                .cloned(),
        );
    }

    if !any_account {
        CalendarSelection::NoAccounts
    } else if !any_calendar {
        CalendarSelection::NoCalendars
    } else if selected.is_empty() {
        CalendarSelection::NoActive
    } else {
        CalendarSelection::Ready(selected)
    }
}

/// Like [`select_active`], keeping only writable calendars.
pub fn select_writable<'a, I>(accounts: I, active: &HashSet<String>) -> CalendarSelection
where
    I: IntoIterator<Item = &'a [Calendar]>,
{
    match select_active(accounts, active) {
        CalendarSelection::Ready(calendars) => {
            let writable: Vec<_> = calendars.into_iter().filter(|c| c.writable).collect();
            if writable.is_empty() {
                CalendarSelection::NoWritable
            } else {
                CalendarSelection::Ready(writable)
            }
        }
        other => other,
    }
}
