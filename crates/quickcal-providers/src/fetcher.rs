//! Parallel event fetching across calendars and accounts.
//!
//! [`ConcurrentFetcher`] spawns one task per calendar. Each task lists the
//! calendar's events through its account's [`EventSource`], drops all-day
//! and unparseable events, and sends the rest down a shared channel. The
//! fetcher waits for every task before draining the channel, then merges
//! by start time.
//!
//! A calendar that fails only loses its own events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use quickcal_core::{Calendar, Event, TimeWindow};

use crate::source::EventSource;

/// Fetches events for many calendars at once.
#[derive(Default, Clone)]
pub struct ConcurrentFetcher {
    sources: HashMap<String, Arc<dyn EventSource>>,
}

impl std::fmt::Debug for ConcurrentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentFetcher")
            .field("accounts", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConcurrentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the source for its account, replacing any previous one.
    pub fn add_source(&mut self, source: Arc<dyn EventSource>) {
        self.sources
            .insert(source.account_name().to_string(), source);
    }

    pub fn with_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.add_source(source);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetches the events of `calendars` inside `window`.
    ///
    /// The result is sorted by start time (stable, so ties keep arrival
    /// order) and holds each (calendar id, event id) pair once. Never fails:
    /// per-calendar errors are logged and that calendar is left out.
    pub async fn fetch_events(&self, calendars: &[Calendar], window: TimeWindow) -> Vec<Event> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut seen_calendars = HashSet::new();
        let mut tasks = Vec::new();

        for calendar in calendars {
            if !seen_calendars.insert(calendar.id.clone()) {
                continue;
            }
            let Some(source) = self.sources.get(&calendar.account_name) else {
                warn!(
                    calendar = %calendar.title,
                    account = %calendar.account_name,
                    "no source for calendar's account, skipping"
                );
                continue;
            };

            let source = Arc::clone(source);
            let calendar = calendar.clone();
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                fetch_calendar(source, calendar, window, tx).await;
            }));
        }
        drop(tx);

        for task in tasks {
            if let Err(e) = task.await {
                warn!("calendar fetch task failed: {}", e);
            }
        }

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        let merged = merge(events);
        info!("fetched {} event(s) from {} calendar(s)", merged.len(), seen_calendars.len());
        merged
    }
}

async fn fetch_calendar(
    source: Arc<dyn EventSource>,
    calendar: Calendar,
    window: TimeWindow,
    tx: mpsc::UnboundedSender<Event>,
) {
    let raw_events = match source.list_events(&calendar.id, window).await {
        Ok(events) => events,
        Err(e) => {
            warn!(calendar = %calendar.title, "fetching events failed: {}", e);
            return;
        }
    };

    let mut count = 0;
    for raw in raw_events {
        if raw.is_all_day() {
            continue;
        }
        match raw.into_event(&calendar) {
            Ok(event) => {
                count += 1;
                let _ = tx.send(event);
            }
            Err(e) => warn!(calendar = %calendar.title, "skipping event: {}", e),
        }
    }
    debug!(calendar = %calendar.title, "{} event(s)", count);
}

/// Stable sort by start, keeping the first of any duplicate event.
fn merge(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|e| e.start);
    let mut seen = HashSet::new();
    events.retain(|e| seen.insert((e.calendar_id.clone(), e.id.clone())));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    use crate::error::{ProviderError, ProviderResult};
    use crate::raw_event::{RawEvent, RawEventTime};
    use crate::source::BoxFuture;

    /// Serves canned events per calendar; `broken` calendars fail.
    struct StaticSource {
        account: String,
        events: HashMap<String, Vec<RawEvent>>,
        broken: HashSet<String>,
        delay_ms: u64,
    }

    impl EventSource for StaticSource {
        fn account_name(&self) -> &str {
            &self.account
        }

        fn list_events<'a>(
            &'a self,
            calendar_id: &'a str,
            _window: TimeWindow,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
                if self.broken.contains(calendar_id) {
                    return Err(ProviderError::network("connection reset"));
                }
                Ok(self.events.get(calendar_id).cloned().unwrap_or_default())
            })
        }
    }

    fn at(hour: u32) -> String {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0)
            .unwrap()
            .to_rfc3339()
    }

    fn timed(id: &str, hour: u32) -> RawEvent {
        RawEvent::new(
            id,
            id,
            RawEventTime::timed(at(hour)),
            RawEventTime::timed(at(hour + 1)),
        )
    }

    fn window() -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        TimeWindow::from_duration(start, Duration::days(1))
    }

    fn calendar(id: &str, account: &str) -> Calendar {
        Calendar::new(id, id.to_uppercase(), account)
    }

    #[tokio::test]
    async fn one_failing_calendar_does_not_abort_the_others() {
        let source = StaticSource {
            account: "a".into(),
            events: HashMap::from([
                ("work".to_string(), vec![timed("w2", 14), timed("w1", 9)]),
                ("home".to_string(), vec![timed("h1", 11)]),
                ("team".to_string(), vec![timed("t1", 10)]),
            ]),
            broken: HashSet::from(["team".to_string()]),
            delay_ms: 0,
        };
        let fetcher = ConcurrentFetcher::new().with_source(Arc::new(source));

        let events = fetcher
            .fetch_events(
                &[calendar("work", "a"), calendar("home", "a"), calendar("team", "a")],
                window(),
            )
            .await;

        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "h1", "w2"]);
        assert!(events.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[tokio::test]
    async fn all_day_and_unparseable_events_are_dropped() {
        let mut broken = timed("bad", 12);
        broken.start = RawEventTime::timed("not a time");
        let holiday = RawEvent::new(
            "holiday",
            "Holiday",
            RawEventTime::all_day("2024-06-01"),
            RawEventTime::all_day("2024-06-02"),
        );
        let source = StaticSource {
            account: "a".into(),
            events: HashMap::from([(
                "work".to_string(),
                vec![holiday, broken, timed("ok", 8)],
            )]),
            broken: HashSet::new(),
            delay_ms: 0,
        };
        let fetcher = ConcurrentFetcher::new().with_source(Arc::new(source));
        let events = fetcher.fetch_events(&[calendar("work", "a")], window()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "ok");
        assert_eq!(events[0].calendar_title, "WORK");
    }

    #[tokio::test]
    async fn duplicates_are_removed_and_accounts_routed() {
        let a = StaticSource {
            account: "a".into(),
            events: HashMap::from([("shared".to_string(), vec![timed("s1", 9), timed("s1", 9)])]),
            broken: HashSet::new(),
            delay_ms: 20,
        };
        let b = StaticSource {
            account: "b".into(),
            events: HashMap::from([("other".to_string(), vec![timed("o1", 9)])]),
            broken: HashSet::new(),
            delay_ms: 0,
        };
        let fetcher = ConcurrentFetcher::new()
            .with_source(Arc::new(a))
            .with_source(Arc::new(b));

        let events = fetcher
            .fetch_events(
                &[
                    calendar("shared", "a"),
                    calendar("shared", "a"),
                    calendar("other", "b"),
                    calendar("orphan", "nobody"),
                ],
                window(),
            )
            .await;

        let mut keys: Vec<_> = events
            .iter()
            .map(|e| (e.calendar_id.as_str(), e.id.as_str()))
            .collect();
        keys.sort();
        assert_eq!(keys, vec![("other", "o1"), ("shared", "s1")]);
    }

    #[test]
    fn merge_is_stable_for_equal_starts() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let make = |cal: &str, id: &str| Event {
            id: id.into(),
            ical_uid: String::new(),
            title: id.into(),
            description: String::new(),
            url: String::new(),
            location: String::new(),
            start,
            end: start + Duration::hours(1),
            color: String::new(),
            calendar_id: cal.into(),
            calendar_title: String::new(),
        };
        let merged = merge(vec![make("b", "2"), make("a", "1"), make("b", "2")]);
        let ids: Vec<_> = merged.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }
}
