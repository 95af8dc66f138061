//! Calendar list, writable calendars and the active set.

use tracing::info;

use quickcal_core::{Calendar, CalendarSelection};
use quickcal_refresh::Refreshed;

use crate::context::{AppContext, CALENDARS_KEY, UPDATE_CALENDARS};
use crate::error::ClientResult;
use crate::feedback::{self, Feedback, Item, RERUN_CALENDARS};

fn matches(calendar: &Calendar, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty()
        || calendar.title.to_lowercase().contains(&query)
        || calendar.account_name.to_lowercase().contains(&query)
}

/// Lists every calendar, marking the active ones.
pub fn list(ctx: &AppContext, query: Option<&str>) -> ClientResult<Feedback> {
    if ctx.accounts()?.is_empty() {
        return Ok(feedback::message(
            "No Accounts Configured",
            "Run `quickcal login` to add a Google account",
        ));
    }

    let Refreshed {
        value,
        still_refreshing: refreshing,
        error,
        ..
    } = ctx.orchestrator().get_or_refresh::<Vec<Calendar>>(
        CALENDARS_KEY,
        ctx.config().calendar_max_age(),
        UPDATE_CALENDARS,
        ctx.refresh_command(&["update", "calendars"]),
    );
    if value.is_none() && !refreshing {
        if let Some(err) = error {
            return Err(err.into());
        }
    }
    let calendars = value.unwrap_or_default();

    let mut fb = Feedback::new();
    if refreshing {
        fb.rerun(RERUN_CALENDARS);
        if calendars.is_empty() {
            fb.push(Item::new("Fetching List of Calendars…").subtitle("List will reload shortly"));
        }
    }

    let active = ctx.active_calendars()?;
    let query = query.unwrap_or_default();
    for calendar in calendars.iter().filter(|c| matches(c, query)) {
        let state = if active.contains(&calendar.id) { "on" } else { "off" };
        let mut subtitle = format!("[{}] {}", state, calendar.account_name);
        if !calendar.description.is_empty() {
            subtitle.push_str(" / ");
            subtitle.push_str(&calendar.description);
        }
        fb.push(Item::new(&calendar.title).subtitle(subtitle).arg(&calendar.id));
    }

    fb.warn_empty("No Calendars", "Did you log in with the right account?");
    if let Some(err) = error {
        fb.push(feedback::refresh_failed(&err));
    }
    Ok(fb)
}

/// Lists the active calendars new events can be added to.
pub fn writable(ctx: &AppContext, query: Option<&str>) -> ClientResult<Feedback> {
    let accounts = ctx.accounts()?;
    let calendars = match ctx.selection(&accounts, true)? {
        CalendarSelection::Ready(calendars) => calendars,
        CalendarSelection::NoCalendars => {
            ctx.start_job(UPDATE_CALENDARS, &["update", "calendars"])?;
            let mut fb = feedback::message("Fetching List of Calendars…", "List will reload shortly");
            fb.rerun(RERUN_CALENDARS);
            return Ok(fb);
        }
        other => {
            return Ok(feedback::message(
                "No Calendar Available",
                other.hint().unwrap_or_default(),
            ));
        }
    };

    let mut fb = Feedback::new();
    let query = query.unwrap_or_default();
    for calendar in calendars.iter().filter(|c| matches(c, query)) {
        fb.push(
            Item::new(&calendar.title)
                .subtitle(&calendar.account_name)
                .arg(&calendar.id),
        );
    }
    fb.warn_empty("No Matching Calendars", "Try a different query?");
    Ok(fb)
}

/// Flips a calendar in or out of the active set. Returns whether it is
/// now active.
///
/// Cached events are dropped because they only cover the old set.
pub fn toggle(ctx: &AppContext, calendar_id: &str) -> ClientResult<bool> {
    let mut active = ctx.active_calendars()?;
    let now_active = active.toggle(calendar_id);
    active.save(ctx.cache())?;
    ctx.cache().remove_matching("events-", ".json")?;
    info!(calendar = calendar_id, active = now_active, "toggled calendar");
    Ok(now_active)
}
