//! Background refresh jobs.
//!
//! These run detached, started by the launcher-facing commands through the
//! job coordinator. Nobody reads their output, so they log to the
//! background log file and report failures through the exit status.

use chrono::{Duration, Local, NaiveDate};
use tracing::{error, info, warn};

use quickcal_core::{Calendar, CalendarSelection, TimeWindow, date_key, format_date};

use crate::context::{AppContext, CALENDARS_KEY, UPDATE_CALENDARS, UPDATE_EVENTS};
use crate::error::ClientResult;

/// Event caches older than this are deleted by the events job.
pub const EVENT_CACHE_RETENTION_DAYS: i64 = 14;

/// Fetches every account's calendar list and writes `calendars.json`.
pub async fn calendars(ctx: &AppContext) -> ClientResult<usize> {
    let result = update_calendars(ctx).await;
    release(ctx, UPDATE_CALENDARS);
    result
}

/// Fetches events of the active calendars starting on `date` (today if
/// `None`) and writes that date's event cache.
pub async fn events(ctx: &AppContext, date: Option<NaiveDate>) -> ClientResult<usize> {
    let result = update_events(ctx, date).await;
    release(ctx, UPDATE_EVENTS);
    result
}

fn release(ctx: &AppContext, job: &str) {
    if let Err(e) = ctx.jobs().release(job) {
        warn!(job, "failed to release job lock: {}", e);
    }
}

async fn update_calendars(ctx: &AppContext) -> ClientResult<usize> {
    info!("reloading calendars");
    let accounts = ctx.accounts()?;
    if accounts.is_empty() {
        info!("no Google accounts configured");
    }

    let google = if accounts.iter().any(|a| !a.is_logged_out()) {
        Some(ctx.google_config()?)
    } else {
        None
    };

    let mut all: Vec<Calendar> = Vec::new();
    for account in accounts {
        let google = match (&google, account.is_logged_out()) {
            (Some(google), false) => google,
            _ => {
                warn!(account = %account.name, "account is logged out, keeping its stored calendars");
                all.extend(account.calendars);
                continue;
            }
        };

        let stored = account.calendars.clone();
        let session = ctx.open_session(google, account)?;
        match session.list_calendars().await {
            Ok(calendars) => {
                let mut account = session.authenticator().account().await;
                account.calendars = calendars.clone();
                ctx.tokens().save(&account)?;
                if let Err(e) = session.ensure_avatar(ctx.tokens()).await {
                    warn!(account = %account.name, "failed to fetch account avatar: {}", e);
                }
                info!(account = %account.name, "{} calendar(s)", calendars.len());
                all.extend(calendars);
            }
            Err(e) => {
                error!(account = %session.name(), "fetching calendars failed: {}", e);
                all.extend(stored);
            }
        }
    }

    ctx.cache().store_json(CALENDARS_KEY, &all)?;
    Ok(all.len())
}

async fn update_events(ctx: &AppContext, date: Option<NaiveDate>) -> ClientResult<usize> {
    let day = date.unwrap_or_else(|| ctx.today());
    info!("fetching events for {}", format_date(day));

    match ctx.cache().prune_older_than(
        "events-",
        ".json",
        Duration::days(EVENT_CACHE_RETENTION_DAYS),
    ) {
        Ok(removed) if !removed.is_empty() => info!("deleted {} old event cache(s)", removed.len()),
        Ok(_) => {}
        Err(e) => warn!("failed to delete old event caches: {}", e),
    }

    let accounts = ctx.accounts()?;
    let calendars = match ctx.selection(&accounts, false)? {
        CalendarSelection::Ready(calendars) => calendars,
        other => {
            info!("nothing to fetch: {}", other.hint().unwrap_or_default());
            return Ok(0);
        }
    };
    info!("{} active calendar(s)", calendars.len());

    let fetcher = ctx.fetcher(&accounts)?;
    let window = TimeWindow::for_days(day, ctx.config().schedule_days(), &Local);
    let events = fetcher.fetch_events(&calendars, window).await;
    for event in &events {
        info!("{}", event);
    }

    ctx.cache().store_json(&date_key(day), &events)?;
    Ok(events.len())
}
