//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/quickcal/config.toml` by default. Every setting is optional.
//!
//! ```toml
//! [google]
//! client_id = "xxx.apps.googleusercontent.com"
//! client_secret = "pass::google/quickcal"
//!
//! [cache]
//! event_cache_mins = 30
//! schedule_days = 3
//! ```
//!
//! `client_id` and `client_secret` support secret references (see
//! [`crate::secret`]). Instead of inline values, `credentials_file` may point
//! at the JSON file downloaded from the Google Cloud Console.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use quickcal_providers::google::{GoogleConfig, OAuthCredentials};

/// Configuration for the quickcal client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug logging for interactive runs.
    pub debug: bool,

    /// Google OAuth client settings.
    pub google: GoogleSettings,

    /// Cache lifetimes and the schedule length.
    pub cache: CacheSettings,

    /// Overrides for the data and cache directories.
    pub paths: PathSettings,
}

/// Google OAuth client settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,

    /// Path to a Google Cloud Console credentials JSON file.
    pub credentials_file: Option<PathBuf>,

    /// Loopback port for the OAuth redirect.
    pub callback_port: Option<u16>,

    /// Seconds to wait for the user to finish signing in.
    pub callback_timeout_secs: Option<u64>,
}

/// Cache lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Minutes before cached events are refreshed. Never less than 5.
    pub event_cache_mins: u32,

    /// Days shown when no date is given.
    pub schedule_days: u32,

    /// Hours before the calendar list is refreshed.
    pub calendar_max_age_hours: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            event_cache_mins: 30,
            schedule_days: 3,
            calendar_max_age_hours: 3,
        }
    }
}

/// Directory overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Account files and avatars.
    pub data_dir: Option<PathBuf>,
    /// Cached calendars, events, job locks and logs.
    pub cache_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Shortest allowed event cache lifetime.
    pub const MIN_EVENT_CACHE_MINS: u32 = 5;

    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Applies command-line and environment overrides.
    pub fn with_overrides(mut self, event_cache_mins: Option<u32>, schedule_days: Option<u32>) -> Self {
        if let Some(mins) = event_cache_mins {
            self.cache.event_cache_mins = mins;
        }
        if let Some(days) = schedule_days {
            self.cache.schedule_days = days;
        }
        self
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quickcal")
            .join("config.toml")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.paths.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quickcal")
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.paths.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quickcal")
        })
    }

    /// How long cached events are served before a refresh is started.
    pub fn event_max_age(&self) -> Duration {
        Duration::minutes(i64::from(
            self.cache.event_cache_mins.max(Self::MIN_EVENT_CACHE_MINS),
        ))
    }

    pub fn calendar_max_age(&self) -> Duration {
        Duration::hours(i64::from(self.cache.calendar_max_age_hours))
    }

    /// Length of the schedule view in days, at least one.
    pub fn schedule_days(&self) -> u32 {
        self.cache.schedule_days.max(1)
    }

    /// Records Google client credentials under `[google]` in `path`,
    /// keeping the rest of the file (comments included) intact.
    pub fn save_google_credentials(
        path: &Path,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(), String> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };
        let mut doc = content
            .parse::<toml_edit::DocumentMut>()
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;

        if !doc.contains_key("google") {
            doc["google"] = toml_edit::Item::Table(toml_edit::Table::new());
        }
        let google = doc["google"]
            .as_table_mut()
            .ok_or_else(|| "`google` in config.toml is not a table".to_string())?;
        google["client_id"] = toml_edit::value(client_id);
        google["client_secret"] = toml_edit::value(client_secret);
        google.remove("credentials_file");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        std::fs::write(path, doc.to_string())
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        debug!("saved Google credentials to {}", path.display());
        Ok(())
    }
}

impl GoogleSettings {
    /// Builds the provider configuration.
    pub fn to_provider_config(&self) -> Result<GoogleConfig, String> {
        let credentials = self.resolve_credentials()?;
        credentials.validate().map_err(|e| e.to_string())?;

        let mut config = GoogleConfig::new(credentials);
        if let Some(port) = self.callback_port {
            config = config.with_callback_port(port);
        }
        if let Some(secs) = self.callback_timeout_secs {
            config = config.with_callback_timeout(StdDuration::from_secs(secs));
        }
        Ok(config)
    }

    /// Resolves the OAuth client credentials.
    ///
    /// Inline `client_id`/`client_secret` win over `credentials_file`. Each
    /// inline value goes through [`crate::secret::resolve`].
    pub fn resolve_credentials(&self) -> Result<OAuthCredentials, String> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => {
                let id = crate::secret::resolve(id)
                    .map_err(|e| format!("failed to resolve client_id: {}", e))?;
                let secret = crate::secret::resolve(secret)
                    .map_err(|e| format!("failed to resolve client_secret: {}", e))?;
                Ok(OAuthCredentials::new(id, secret))
            }
            (Some(_), None) => {
                Err("client_secret is missing from [google] section in config.toml".to_string())
            }
            _ => match &self.credentials_file {
                Some(path) => OAuthCredentials::from_file(path).map_err(|e| e.to_string()),
                None => Err(format!(
                    "Google credentials not found. Add to {}:\n  \
                     [google]\n  \
                     client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                     client_secret = \"YOUR_SECRET\"\n\n  \
                     Or run: quickcal login --credentials-file <path>",
                    ClientConfig::default_path().display()
                )),
            },
        }
    }
}
