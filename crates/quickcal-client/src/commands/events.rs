//! The event list, served from cache.

use chrono::{Duration, Local, NaiveDate};
use tracing::{debug, info};

use quickcal_core::{CalendarSelection, Event, date_key, format_date};
use quickcal_refresh::Refreshed;

use crate::context::{AppContext, UPDATE_CALENDARS, UPDATE_EVENTS};
use crate::error::ClientResult;
use crate::feedback::{self, Feedback, Item, RERUN_EVENTS};

const LONG_DATE: &str = "%A, %-d %B %Y";
const HOUR: &str = "%H:%M";

/// Lists events: the coming days when `date` is `None`, otherwise one day.
///
/// Never waits for the network. Missing or stale events start the
/// `update-events` job and ask the launcher to poll.
pub fn run(ctx: &AppContext, date: Option<NaiveDate>, query: Option<&str>) -> ClientResult<Feedback> {
    let accounts = ctx.accounts()?;
    let calendars = match ctx.selection(&accounts, false)? {
        CalendarSelection::Ready(calendars) => calendars,
        CalendarSelection::NoAccounts => {
            return Ok(feedback::message(
                "No Accounts Configured",
                "Run `quickcal login` to add a Google account",
            ));
        }
        CalendarSelection::NoCalendars => {
            ctx.start_job(UPDATE_CALENDARS, &["update", "calendars"])?;
            let mut fb = feedback::message("Fetching List of Calendars…", "List will reload shortly");
            fb.rerun(RERUN_EVENTS);
            return Ok(fb);
        }
        other => {
            return Ok(feedback::message(
                "No Active Calendars",
                other.hint().unwrap_or_default(),
            ));
        }
    };
    debug!("{} active calendar(s)", calendars.len());

    let schedule = date.is_none();
    let day = date.unwrap_or_else(|| ctx.today());
    let day_str = format_date(day);

    let Refreshed {
        value,
        still_refreshing: refreshing,
        error,
        ..
    } = ctx.orchestrator().get_or_refresh::<Vec<Event>>(
        &date_key(day),
        ctx.config().event_max_age(),
        UPDATE_EVENTS,
        ctx.refresh_command(&["update", "events", &day_str]),
    );
    // Nothing to show and nothing coming: the failure is the answer.
    if value.is_none() && !refreshing {
        if let Some(err) = error {
            return Err(err.into());
        }
    }

    let now = ctx.clock().now();
    let (from, until) = if schedule {
        (now, now + Duration::days(i64::from(ctx.config().schedule_days())))
    } else {
        let window = quickcal_core::TimeWindow::for_days(day, 1, &Local);
        (window.start, window.end)
    };

    let events: Vec<Event> = value
        .unwrap_or_default()
        .into_iter()
        .filter(|e| calendars.iter().any(|c| c.id == e.calendar_id))
        .filter(|e| e.end > from && e.start < until)
        .collect();
    info!("{} event(s) for {}", events.len(), day_str);

    let query = query.map(str::trim).unwrap_or_default();
    let mut fb = render(&events, day, schedule, query, refreshing);
    if let Some(err) = error {
        fb.push(feedback::refresh_failed(&err));
    }
    Ok(fb)
}

fn render(events: &[Event], day: NaiveDate, schedule: bool, query: &str, refreshing: bool) -> Feedback {
    let mut fb = Feedback::new();

    if refreshing {
        fb.rerun(RERUN_EVENTS);
        if events.is_empty() {
            fb.push(Item::new("Fetching Events…").subtitle("Results will refresh shortly"));
        }
    }
    if events.is_empty() && query.is_empty() && !refreshing {
        fb.push(Item::new(format!("No Events on {}", day.format(LONG_DATE))));
    }

    let mut current_day = None;
    for event in events.iter().filter(|e| e.matches(query)) {
        let start = event.start.with_timezone(&Local);
        let end = event.end.with_timezone(&Local);

        if schedule && current_day != Some(start.date_naive()) {
            let date = start.date_naive();
            current_day = Some(date);
            fb.push(Item::new(date.format(LONG_DATE).to_string()).arg(format_date(date)));
        }

        let mut subtitle = format!(
            "{} - {} / {}",
            start.format(HOUR),
            end.format(HOUR),
            event.calendar_title
        );
        if !event.location.is_empty() {
            subtitle.push_str(" / ");
            subtitle.push_str(&event.location);
        }
        fb.push(Item::new(&event.title).subtitle(subtitle).arg(&event.url));
    }

    if !schedule && query.is_empty() {
        for (label, date) in [("Previous", day.pred_opt()), ("Next", day.succ_opt())] {
            if let Some(date) = date {
                fb.push(
                    Item::new(format!("{}: {}", label, date.format(LONG_DATE)))
                        .arg(format_date(date)),
                );
            }
        }
    }

    fb.warn_empty("No Matching Events", "Try a different query?");
    fb
}
