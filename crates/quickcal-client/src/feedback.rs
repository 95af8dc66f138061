//! Launcher feedback: the JSON item list printed on stdout.
//!
//! A launcher runs quickcal on every keystroke and shows the returned
//! items. When `rerun` is set it runs the same command again after that
//! many seconds, which is how stale results get replaced once a background
//! refresh lands.

use serde::Serialize;

use quickcal_refresh::RefreshError;

/// Poll interval while events are being fetched.
pub const RERUN_EVENTS: f64 = 0.1;
/// Poll interval while the calendar list is being fetched.
pub const RERUN_CALENDARS: f64 = 0.3;

/// One row in the launcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Item {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
    /// Value passed on when the row is actioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
    /// Text put into the query box on tab.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autocomplete: Option<String>,
    pub valid: bool,
}

impl Item {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = subtitle.into();
        self
    }

    /// Sets the argument and marks the row actionable.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = Some(arg.into());
        self.valid = true;
        self
    }

    pub fn autocomplete(mut self, text: impl Into<String>) -> Self {
        self.autocomplete = Some(text.into());
        self
    }
}

/// The whole response for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Feedback {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerun: Option<f64>,
    pub items: Vec<Item>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Asks the launcher to call again. Keeps the shortest interval asked for.
    pub fn rerun(&mut self, seconds: f64) {
        self.rerun = Some(match self.rerun {
            Some(current) => current.min(seconds),
            None => seconds,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds a placeholder row if nothing else is shown.
    pub fn warn_empty(&mut self, title: &str, subtitle: &str) {
        if self.items.is_empty() {
            self.push(Item::new(title).subtitle(subtitle));
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"items":[]}"#.to_string())
    }
}

/// Row shown under stale results when a refresh could not be read or
/// started.
pub fn refresh_failed(err: &RefreshError) -> Item {
    Item::new("Refresh Failed").subtitle(err.to_string())
}

/// Feedback made of a single message row.
pub fn message(title: impl Into<String>, subtitle: impl Into<String>) -> Feedback {
    let mut feedback = Feedback::new();
    feedback.push(Item::new(title).subtitle(subtitle));
    feedback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_compactly() {
        let mut feedback = Feedback::new();
        feedback.push(Item::new("Standup").subtitle("09:00 - 09:15 / Work").arg("https://x"));
        feedback.push(Item::new("Loading"));
        assert_eq!(
            feedback.to_json(),
            r#"{"items":[{"title":"Standup","subtitle":"09:00 - 09:15 / Work","arg":"https://x","valid":true},{"title":"Loading","valid":false}]}"#
        );
    }

    #[test]
    fn rerun_keeps_shortest_interval() {
        let mut feedback = Feedback::new();
        feedback.rerun(RERUN_CALENDARS);
        feedback.rerun(RERUN_EVENTS);
        feedback.rerun(RERUN_CALENDARS);
        assert_eq!(feedback.rerun, Some(RERUN_EVENTS));
        assert!(feedback.to_json().starts_with(r#"{"rerun":0.1,"#));
    }

    #[test]
    fn warn_empty_only_when_empty() {
        let mut feedback = Feedback::new();
        feedback.warn_empty("No Events", "");
        feedback.warn_empty("Again", "");
        assert_eq!(feedback.items.len(), 1);
        assert_eq!(feedback.items[0].title, "No Events");
    }
}
