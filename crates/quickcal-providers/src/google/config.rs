//! Google OAuth client and endpoint configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProviderError, ProviderResult};

use super::auth::SignInFailures;

/// OAuth 2.0 credentials for Google API access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Structure of Google's OAuth credentials JSON file.
///
/// Accepts the Cloud Console download (`installed` or `web` section) as well
/// as a flat `client_id`/`client_secret` object.
#[derive(Debug, Deserialize)]
struct GoogleCredentialsFile {
    installed: Option<NestedCredentials>,
    web: Option<NestedCredentials>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedCredentials {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads OAuth credentials from a Google Cloud Console JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProviderError::configuration(format!(
                "failed to read credentials file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses OAuth credentials from a Google credentials JSON string.
    pub fn from_json(json: &str) -> ProviderResult<Self> {
        let file: GoogleCredentialsFile = serde_json::from_str(json).map_err(|e| {
            ProviderError::configuration(format!("failed to parse credentials JSON: {}", e))
        })?;

        if let Some(creds) = file.installed.or(file.web) {
            return Ok(Self::new(creds.client_id, creds.client_secret));
        }
        if let (Some(client_id), Some(client_secret)) = (file.client_id, file.client_secret) {
            return Ok(Self::new(client_id, client_secret));
        }

        Err(ProviderError::configuration(
            "credentials must contain an 'installed'/'web' section or 'client_id'/'client_secret'",
        ))
    }

    /// Checks that the credentials look like a Google desktop client.
    pub fn validate(&self) -> ProviderResult<()> {
        if self.client_id.is_empty() {
            return Err(ProviderError::configuration("client_id is required"));
        }
        if !self.client_id.ends_with(".apps.googleusercontent.com") {
            return Err(ProviderError::configuration(
                "client_id should end with .apps.googleusercontent.com",
            ));
        }
        if self.client_secret.is_empty() {
            return Err(ProviderError::configuration("client_secret is required"));
        }
        Ok(())
    }
}

/// Which calendar permissions to ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    ReadOnly,
    /// Needed to create events.
    ReadWrite,
}

impl AccessMode {
    pub const READ_ONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/calendar.readonly";
    pub const READ_WRITE_SCOPE: &'static str = "https://www.googleapis.com/auth/calendar";
    const IDENTITY_SCOPES: [&'static str; 2] = [
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
    ];

    pub fn calendar_scope(self) -> &'static str {
        match self {
            Self::ReadOnly => Self::READ_ONLY_SCOPE,
            Self::ReadWrite => Self::READ_WRITE_SCOPE,
        }
    }

    /// All scopes requested during the handshake.
    pub fn scopes(self) -> Vec<String> {
        std::iter::once(self.calendar_scope())
            .chain(Self::IDENTITY_SCOPES)
            .map(String::from)
            .collect()
    }

    /// Returns true if a space-separated granted scope list includes
    /// read-write calendar access.
    pub fn grants_read_write(granted: &str) -> bool {
        granted
            .split_whitespace()
            .any(|s| s == Self::READ_WRITE_SCOPE)
    }
}

/// OAuth endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
        }
    }
}

impl OAuthEndpoints {
    /// Endpoints rooted at `base`, e.g. a local mock server.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{}/o/oauth2/v2/auth", base),
            token_url: format!("{}/token", base),
            userinfo_url: format!("{}/oauth2/v2/userinfo", base),
        }
    }
}

/// Configuration shared by every account's authenticator and API client.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub credentials: OAuthCredentials,
    pub endpoints: OAuthEndpoints,
    /// Calendar REST API root.
    pub api_base: String,
    /// Port the loopback callback listener binds on 127.0.0.1.
    pub callback_port: u16,
    /// How long to wait for the browser to come back.
    pub callback_timeout: Duration,
    /// Request timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Shared by every authenticator built from this config or its clones.
    pub sign_in_failures: SignInFailures,
}

impl GoogleConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_CALLBACK_PORT: u16 = 61432;
    pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_API_BASE: &'static str = "https://www.googleapis.com/calendar/v3";
    pub const CALLBACK_PATH: &'static str = "/callback";

    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            endpoints: OAuthEndpoints::default(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            callback_port: Self::DEFAULT_CALLBACK_PORT,
            callback_timeout: Duration::from_secs(Self::DEFAULT_CALLBACK_TIMEOUT_SECS),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("quickcal/{}", env!("CARGO_PKG_VERSION")),
            sign_in_failures: SignInFailures::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Shares `failures` with the authenticators of another config.
    pub fn with_sign_in_failures(mut self, failures: SignInFailures) -> Self {
        self.sign_in_failures = failures;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The redirect URI registered with Google for the loopback flow.
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://127.0.0.1:{}{}",
            self.callback_port,
            Self::CALLBACK_PATH
        )
    }
}
