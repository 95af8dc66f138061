//! Core types: calendars, events, time windows, selection, tracing

pub mod clock;
pub mod model;
pub mod selection;
pub mod time;
pub mod tracing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use model::{Calendar, Event, sort_by_title};
pub use selection::{CalendarSelection, select_active, select_writable};
pub use time::{TimeWindow, date_key, format_date, parse_date, today_local};
pub use self::tracing::{TracingConfig, TracingError, TracingOutput, init_tracing};
