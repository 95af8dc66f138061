//! Quick-add: create an event from a line of free text.

use std::fmt;

use tracing::{info, warn};

use quickcal_core::{Event, parse_date};

use crate::context::AppContext;
use crate::error::{ClientError, ClientResult};

/// What quick-add created.
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    Timed(Event),
    /// Google read the text as a whole day ("Holiday tomorrow").
    AllDay { title: String, date: String },
}

impl fmt::Display for Created {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timed(event) => write!(f, "{}", event),
            Self::AllDay { title, date } => match parse_date(date) {
                Some(day) => write!(f, "\"{}\" on {}, all day", title, day.format("%-d/%-m")),
                None => write!(f, "\"{}\", all day", title),
            },
        }
    }
}

/// Creates an event in `calendar_id` from `text` ("Lunch with Ann
/// tomorrow 1pm"), letting Google parse the date and time.
///
/// Cached events are dropped as soon as Google accepts the event, so it
/// shows up on the next lookup.
pub async fn add(ctx: &AppContext, calendar_id: &str, text: &str) -> ClientResult<Created> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ClientError::Invalid("event text is empty".to_string()));
    }

    let (account, calendar) = ctx
        .accounts()?
        .into_iter()
        .find_map(|account| {
            let calendar = account.calendars.iter().find(|c| c.id == calendar_id)?.clone();
            Some((account, calendar))
        })
        .ok_or_else(|| ClientError::Invalid(format!("unknown calendar {:?}", calendar_id)))?;

    if !calendar.writable {
        return Err(ClientError::Invalid(format!(
            "calendar {:?} is read-only",
            calendar.title
        )));
    }
    if account.is_logged_out() {
        return Err(ClientError::AuthRequired(account.name));
    }
    if !account.read_write {
        return Err(ClientError::Invalid(format!(
            "{} only granted read access, run `quickcal reauth --read-write {}`",
            account.name, account.name
        )));
    }

    let google = ctx.google_config()?;
    let session = ctx.open_session(&google, account)?;
    let raw = session.quick_add(&calendar.id, text).await?;
    info!(calendar = %calendar.title, "created event {:?}", raw.summary);

    if let Err(e) = ctx.cache().remove_matching("events-", ".json") {
        warn!("failed to drop cached events: {}", e);
    }

    if raw.is_all_day() {
        return Ok(Created::AllDay {
            date: raw.start.date.unwrap_or_default(),
            title: raw.summary,
        });
    }
    match raw.clone().into_event(&calendar) {
        Ok(event) => Ok(Created::Timed(event)),
        Err(e) => {
            warn!("created event has unexpected times: {}", e);
            Ok(Created::AllDay {
                date: String::new(),
                title: raw.summary,
            })
        }
    }
}
