//! Command-line interface definition.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// quickcal - Google Calendar for your launcher
#[derive(Debug, Parser)]
#[command(name = "quickcal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "QUICKCAL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Minutes before cached events are refreshed (minimum 5)
    #[arg(long, env = "EVENT_CACHE_MINS", global = true)]
    pub event_cache_mins: Option<u32>,

    /// Number of days shown when no date is given
    #[arg(long, env = "SCHEDULE_DAYS", global = true)]
    pub schedule_days: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List upcoming events, or the events of one day
    Events {
        /// Day to show (YYYY-MM-DD)
        #[arg(long, short, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Only show events matching this text
        query: Option<String>,
    },

    /// List all calendars and whether they are active
    Calendars {
        /// Only show calendars matching this text
        query: Option<String>,
    },

    /// List active calendars that accept new events
    Active {
        /// Only show calendars matching this text
        query: Option<String>,
    },

    /// Activate or deactivate a calendar
    Toggle {
        /// Calendar ID
        calendar_id: String,
    },

    /// Refresh cached data (run in the background by the other commands)
    Update {
        #[command(subcommand)]
        target: UpdateTarget,
    },

    /// Create an event from text, e.g. "Lunch with Ana tomorrow 1pm"
    Add {
        /// Calendar ID to create the event in
        calendar_id: String,

        /// Event description in natural language
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Sign in with a Google account
    Login {
        /// Ask for permission to create events
        #[arg(long)]
        read_write: bool,

        /// OAuth client ID (from Google Cloud Console)
        #[arg(long, env = "GOOGLE_CLIENT_ID")]
        client_id: Option<String>,

        /// OAuth client secret (from Google Cloud Console)
        #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
        client_secret: Option<String>,

        /// Path to Google Cloud Console credentials JSON file
        #[arg(long, env = "GOOGLE_CREDENTIALS_FILE")]
        credentials_file: Option<PathBuf>,
    },

    /// Sign in again with an existing account
    Reauth {
        /// Account email
        account: String,

        /// Ask for permission to create events
        #[arg(long)]
        read_write: bool,
    },

    /// Remove an account and its stored credential
    Logout {
        /// Account email
        account: String,
    },

    /// List accounts
    Accounts,

    /// Remove cached calendars and events
    Clear,
}

/// What `update` refreshes.
#[derive(Debug, Subcommand)]
pub enum UpdateTarget {
    /// Fetch every account's calendar list
    Calendars,

    /// Fetch events of the active calendars
    Events {
        /// First day to fetch (YYYY-MM-DD), today if omitted
        #[arg(value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
}

impl Command {
    /// Background refresh jobs log to a file instead of stderr.
    pub fn is_background(&self) -> bool {
        matches!(self, Self::Update { .. })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    quickcal_core::parse_date(s).ok_or_else(|| format!("invalid date {:?}, expected YYYY-MM-DD", s))
}
