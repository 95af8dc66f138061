//! Google Calendar REST client.
//!
//! Stateless apart from the HTTP connection pool: every call takes the
//! access token to use, so one client can serve several accounts.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use quickcal_core::{Calendar, TimeWindow};

use crate::error::{ProviderError, ProviderResult};
use crate::raw_event::RawEvent;

use super::config::GoogleConfig;

/// Largest page Google accepts for `events.list`.
const MAX_EVENTS_PER_PAGE: u32 = 2500;

/// Google Calendar API client.
#[derive(Debug, Clone)]
pub struct CalendarClient {
    http: reqwest::Client,
    api_base: String,
}

impl CalendarClient {
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::internal(format!("failed to create HTTP client: {}", e))
                    .with_source(e)
            })?;
        Ok(Self {
            http,
            api_base: config.api_base.clone(),
        })
    }

    /// Lists the account's visible calendars, sorted by title.
    pub async fn list_calendars(
        &self,
        access_token: &str,
        account_name: &str,
    ) -> ProviderResult<Vec<Calendar>> {
        let url = format!("{}/users/me/calendarList", self.api_base);
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).bearer_auth(access_token);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: CalendarListResponse = self.send(request).await?;

            for entry in page.items {
                if entry.hidden {
                    debug!(account = account_name, "ignoring hidden calendar {:?}", entry.summary);
                    continue;
                }
                calendars.push(entry.into_calendar(account_name));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        quickcal_core::sort_by_title(&mut calendars);
        Ok(calendars)
    }

    /// Lists single (expanded) events of one calendar inside `window`,
    /// ordered by start time.
    pub async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> ProviderResult<Vec<RawEvent>> {
        let url = format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        );
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).bearer_auth(access_token).query(&[
                ("timeMin", window.start.to_rfc3339()),
                ("timeMax", window.end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", MAX_EVENTS_PER_PAGE.to_string()),
            ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: EventListResponse = self.send(request).await?;
            events.extend(page.items.into_iter().filter(|e| !e.is_cancelled()));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("fetched {} events from calendar {}", events.len(), calendar_id);
        Ok(events)
    }

    /// Creates an event from free text ("Lunch with Ann tomorrow 1pm").
    pub async fn quick_add(
        &self,
        access_token: &str,
        calendar_id: &str,
        text: &str,
    ) -> ProviderResult<RawEvent> {
        let url = format!(
            "{}/calendars/{}/events/quickAdd",
            self.api_base,
            urlencoding::encode(calendar_id)
        );
        let request = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .query(&[("text", text)]);
        self.send(request).await
    }

    /// Downloads `url` to `path`, creating parent directories.
    pub async fn download(&self, url: &str, path: &Path) -> ProviderResult<()> {
        download_to(&self.http, url, path).await
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ProviderResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {}", e))
        })
    }
}

pub(crate) async fn download_to(
    http: &reqwest::Client,
    url: &str,
    path: &Path,
) -> ProviderResult<()> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::from_status(status.as_u16(), ""));
    }
    let bytes = response.bytes().await?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ProviderError::storage(format!("failed to create {:?}: {}", parent, e)).with_source(e)
        })?;
    }
    tokio::fs::write(path, &bytes).await.map_err(|e| {
        ProviderError::storage(format!("failed to write {:?}: {}", path, e)).with_source(e)
    })?;
    debug!("downloaded {} to {:?}", url, path);
    Ok(())
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<RawEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    next_page_token: Option<String>,
}

/// A calendar from the calendar list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListEntry {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    /// The user's own name for the calendar.
    #[serde(default)]
    pub summary_override: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub background_color: Option<String>,
    /// `owner`, `writer`, `reader` or `freeBusyReader`.
    #[serde(default)]
    pub access_role: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl CalendarListEntry {
    pub fn into_calendar(self, account_name: &str) -> Calendar {
        let writable = matches!(self.access_role.as_deref(), Some("owner" | "writer"));
        let title = match self.summary_override {
            Some(title) if !title.is_empty() => title,
            _ => self.summary,
        };
        Calendar {
            id: self.id,
            title,
            description: self.description.unwrap_or_default(),
            color: self.background_color.unwrap_or_default(),
            account_name: account_name.to_string(),
            writable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::google::config::OAuthCredentials;
    use crate::ProviderErrorCode;

    async fn client(server: &MockServer) -> CalendarClient {
        let config =
            GoogleConfig::new(OAuthCredentials::new("id", "secret")).with_api_base(server.uri());
        CalendarClient::new(&config).unwrap()
    }

    #[test]
    fn calendar_entry_conversion() {
        let entry: CalendarListEntry = serde_json::from_str(
            r##"{"id":"c1","summary":"team@example.com","summaryOverride":"Team",
                "backgroundColor":"#123456","accessRole":"writer"}"##,
        )
        .unwrap();
        let cal = entry.into_calendar("me@example.com");
        assert_eq!(cal.title, "Team");
        assert_eq!(cal.color, "#123456");
        assert!(cal.writable);

        let entry: CalendarListEntry =
            serde_json::from_str(r#"{"id":"c2","summary":"Holidays","accessRole":"reader"}"#)
                .unwrap();
        assert!(!entry.into_calendar("me@example.com").writable);
    }

    #[tokio::test]
    async fn list_calendars_skips_hidden_and_sorts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items":[
                    {"id":"w","summary":"Work"},
                    {"id":"h","summary":"Hidden","hidden":true},
                    {"id":"b","summary":"Birthdays"}
                ]}"#,
            ))
            .mount(&server)
            .await;

        let cals = client(&server)
            .await
            .list_calendars("tok", "me@example.com")
            .await
            .unwrap();
        let ids: Vec<_> = cals.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "w"]);
        assert_eq!(cals[0].account_name, "me@example.com");
    }

    #[tokio::test]
    async fn list_events_sends_window_and_follows_pages() {
        let server = MockServer::start().await;
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::from_duration(start, chrono::Duration::days(1));

        Mock::given(method("GET"))
            .and(path("/calendars/a%40b.com/events"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items":[{"id":"e2","start":{"dateTime":"2024-06-01T12:00:00Z"},"end":{"dateTime":"2024-06-01T13:00:00Z"}}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/a%40b.com/events"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("orderBy", "startTime"))
            .and(query_param("timeMin", "2024-06-01T00:00:00+00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"nextPageToken":"p2","items":[
                    {"id":"e1","start":{"dateTime":"2024-06-01T09:00:00Z"},"end":{"dateTime":"2024-06-01T10:00:00Z"}},
                    {"id":"gone","status":"cancelled"}
                ]}"#,
            ))
            .mount(&server)
            .await;

        let events = client(&server)
            .await
            .list_events("tok", "a@b.com", window)
            .await
            .unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn api_errors_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .list_calendars("tok", "me")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("icons").join("me.png");
        client(&server)
            .await
            .download(&format!("{}/photo.png", server.uri()), &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), vec![1, 2, 3]);
    }
}
