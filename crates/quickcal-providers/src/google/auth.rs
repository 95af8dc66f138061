//! Per-account authentication state machine.
//!
//! An [`Authenticator`] hands out a usable [`Credential`] for one account.
//! It tries, in order: the credential it already holds in memory, the
//! stored credential if it has not expired, a refresh of the stored
//! credential, and finally the browser handshake.
//!
//! Failure is sticky: once a first acquisition fails the authenticator is
//! [`AuthState::PermanentlyFailed`] for the rest of the process. The failure
//! is also recorded in the [`SignInFailures`] shared by all accounts, so a
//! refresh job never pops up a second browser window, whichever account
//! asks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};

use super::client::download_to;
use super::config::{AccessMode, GoogleConfig};
use super::oauth::{BrowserLauncher, CallbackListener, OAuthClient, PkceFlow, SystemBrowser};
use super::tokens::{Account, Credential, TokenStore};

/// Where an [`Authenticator`] stands in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated(Credential),
    PermanentlyFailed,
}

/// Process-wide record of a failed sign-in.
///
/// Clones share the flag. Once set, no authenticator holding it starts a
/// browser handshake.
#[derive(Debug, Clone, Default)]
pub struct SignInFailures(Arc<AtomicBool>);

impl SignInFailures {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Inner {
    account: Account,
    state: AuthState,
}

/// Obtains and caches credentials for one account.
pub struct Authenticator {
    oauth: OAuthClient,
    store: TokenStore,
    mode: AccessMode,
    callback_port: u16,
    callback_timeout: Duration,
    browser: Arc<dyn BrowserLauncher>,
    failures: SignInFailures,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("mode", &self.mode)
            .field("callback_port", &self.callback_port)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator for `account`.
    ///
    /// The account's `read_write` flag picks the scopes requested if a new
    /// handshake is needed; use [`with_access_mode`](Self::with_access_mode)
    /// to override it.
    pub fn new(config: &GoogleConfig, store: TokenStore, account: Account) -> ProviderResult<Self> {
        let mode = if account.read_write {
            AccessMode::ReadWrite
        } else {
            AccessMode::ReadOnly
        };
        Ok(Self {
            oauth: OAuthClient::new(config)?,
            store,
            mode,
            callback_port: config.callback_port,
            callback_timeout: config.callback_timeout,
            browser: Arc::new(SystemBrowser),
            failures: config.sign_in_failures.clone(),
            inner: Mutex::new(Inner {
                account,
                state: AuthState::Unauthenticated,
            }),
        })
    }

    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// A snapshot of the account as currently known.
    pub async fn account(&self) -> Account {
        self.inner.lock().await.account.clone()
    }

    pub async fn state(&self) -> AuthState {
        self.inner.lock().await.state.clone()
    }

    /// Returns a credential that is valid right now.
    ///
    /// Concurrent callers queue behind the first; they get its result (or
    /// the credential it cached) without starting another handshake.
    pub async fn credential(&self) -> ProviderResult<Credential> {
        let mut guard = self.inner.lock().await;
        let Inner { account, state } = &mut *guard;

        let outcome = match state {
            AuthState::PermanentlyFailed => {
                return Err(ProviderError::authentication(
                    "authentication already failed in this process",
                )
                .with_provider(account.name.clone()));
            }
            AuthState::Authenticated(cred) if !cred.is_expired() => return Ok(cred.clone()),
            AuthState::Authenticated(cred) => {
                let cred = cred.clone();
                self.refresh(account, &cred).await
            }
            AuthState::Unauthenticated => self.acquire(account).await,
        };

        self.settle(account, state, outcome)
    }

    /// Runs the browser handshake even if a credential is stored.
    ///
    /// Used for explicit logins and re-authentication.
    pub async fn login(&self) -> ProviderResult<Credential> {
        let mut guard = self.inner.lock().await;
        let Inner { account, state } = &mut *guard;

        if *state == AuthState::PermanentlyFailed {
            return Err(ProviderError::authentication(
                "authentication already failed in this process",
            )
            .with_provider(account.name.clone()));
        }
        let outcome = self.handshake(account).await;
        self.settle(account, state, outcome)
    }

    /// Forgets the account's stored credential and persists that.
    ///
    /// Called when Google reports the grant as revoked. The in-memory state
    /// is left alone: the next process starts without a credential.
    pub async fn revoke(&self) -> ProviderResult<()> {
        let mut guard = self.inner.lock().await;
        guard.account.credential = None;
        self.store.save(&guard.account)?;
        warn!(account = %guard.account.name, "cleared revoked credential");
        Ok(())
    }

    fn settle(
        &self,
        account: &Account,
        state: &mut AuthState,
        outcome: ProviderResult<Credential>,
    ) -> ProviderResult<Credential> {
        match outcome {
            Ok(cred) => {
                *state = AuthState::Authenticated(cred.clone());
                Ok(cred)
            }
            Err(err) => {
                if *state == AuthState::Unauthenticated {
                    warn!(account = %account.name, "authentication failed, giving up for this process: {}", err);
                    *state = AuthState::PermanentlyFailed;
                    self.failures.set();
                }
                Err(err.with_provider(account.name.clone()))
            }
        }
    }

    async fn acquire(&self, account: &mut Account) -> ProviderResult<Credential> {
        if let Some(cred) = account.credential.clone() {
            if !cred.is_expired() {
                debug!(account = %account.name, "using stored credential");
                return Ok(cred);
            }
            if cred.can_refresh() {
                return self.refresh(account, &cred).await;
            }
            debug!(account = %account.name, "stored credential expired and cannot be refreshed");
        }
        self.handshake(account).await
    }

    async fn refresh(&self, account: &mut Account, cred: &Credential) -> ProviderResult<Credential> {
        let refresh_token = cred
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::authentication("credential has no refresh token"))?;

        let token = self.oauth.refresh(refresh_token).await?;
        let renewed = cred.refreshed(token.access_token, token.refresh_token, token.expires_in);
        account.credential = Some(renewed.clone());
        self.store.save(account)?;
        debug!(account = %account.name, "refreshed access token");
        Ok(renewed)
    }

    async fn handshake(&self, account: &mut Account) -> ProviderResult<Credential> {
        if self.failures.is_set() {
            return Err(ProviderError::authentication(
                "sign-in already failed in this process, not opening the browser again",
            ));
        }
        let pkce = PkceFlow::new();
        let scopes = self.mode.scopes();

        let listener = CallbackListener::bind(self.callback_port).await?;
        let redirect_uri = listener.redirect_uri();
        let url = self.oauth.authorization_url(&pkce, &redirect_uri, &scopes);

        info!(account = %account.name, "opening browser for sign-in");
        self.browser.open(&url)?;

        let code = listener
            .wait_for_code(&pkce.state, self.callback_timeout)
            .await?;
        let token = self
            .oauth
            .exchange_code(&code, &pkce.verifier, &redirect_uri)
            .await?;

        account.read_write = match token.scope {
            Some(ref granted) => AccessMode::grants_read_write(granted),
            None => self.mode == AccessMode::ReadWrite,
        };
        let cred = token.into_credential(&scopes);
        account.credential = Some(cred.clone());

        if account.is_first_login() {
            self.resolve_identity(account, &cred).await?;
        }

        self.store.save(account)?;
        info!(account = %account.name, read_write = account.read_write, "signed in");
        Ok(cred)
    }

    /// Fills in the account's identity from the user-info endpoint and
    /// fetches its avatar. A failed avatar download is only logged.
    async fn resolve_identity(&self, account: &mut Account, cred: &Credential) -> ProviderResult<()> {
        let info = self.oauth.userinfo(&cred.access_token).await?;

        account.email = info.email.clone();
        account.display_name = info.name;
        account.avatar_url = info.picture;
        if account.name.is_empty() {
            account.name = info.email;
        } else {
            self.store.rename(account, &info.email)?;
        }

        if !account.avatar_url.is_empty() {
            let path = self.store.avatar_path(account);
            if let Err(e) = download_to(self.oauth.http(), &account.avatar_url, &path).await {
                warn!(account = %account.name, "failed to download avatar: {}", e);
            }
        }
        Ok(())
    }
}
