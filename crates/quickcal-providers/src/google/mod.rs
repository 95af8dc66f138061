//! Google Calendar accounts.
//!
//! # Authentication Flow
//!
//! 1. The user provides their own OAuth client ID/secret (required by Google)
//! 2. A loopback listener is bound on `127.0.0.1:61432`
//! 3. The browser is sent to Google's consent page with a PKCE challenge and
//!    a random CSRF `state`
//! 4. Google redirects to `/callback` with the authorization code
//! 5. The state is checked and the code exchanged for tokens
//! 6. On first login the user-info endpoint names the account
//! 7. The account and its credential are saved to the data directory
//!
//! ```ignore
//! use quickcal_providers::google::{AccountSession, GoogleConfig, OAuthCredentials, TokenStore};
//!
//! let config = GoogleConfig::new(OAuthCredentials::from_file("client.json")?);
//! let store = TokenStore::new(data_dir);
//! for account in store.list()? {
//!     let session = AccountSession::open(&config, store.clone(), account)?;
//!     let calendars = session.list_calendars().await?;
//! }
//! ```

mod auth;
mod client;
mod config;
mod oauth;
mod session;
mod tokens;

pub use auth::{AuthState, Authenticator, SignInFailures};
pub use client::{CalendarClient, CalendarListEntry};
pub use config::{AccessMode, GoogleConfig, OAuthCredentials, OAuthEndpoints};
pub use oauth::{
    BrowserLauncher, CallbackListener, OAuthClient, PkceFlow, SystemBrowser, TokenResponse,
    UserInfo,
};
pub use session::AccountSession;
pub use tokens::{Account, Credential, TokenStore};
