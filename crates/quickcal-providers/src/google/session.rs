//! Authenticated calls for one account.
//!
//! Every API call goes through [`AccountSession`], which is where a revoked
//! grant (`invalid_grant`) is noticed: the account's stored credential is
//! cleared so the next interactive run asks the user to sign in again.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use quickcal_core::{Calendar, TimeWindow};

use crate::error::{ProviderError, ProviderResult};
use crate::raw_event::RawEvent;
use crate::source::{BoxFuture, EventSource};

use super::auth::Authenticator;
use super::client::CalendarClient;
use super::config::GoogleConfig;
use super::tokens::{Account, TokenStore};

/// One account's authenticator bound to the REST client.
#[derive(Debug, Clone)]
pub struct AccountSession {
    name: String,
    auth: Arc<Authenticator>,
    client: CalendarClient,
}

impl AccountSession {
    pub fn new(name: impl Into<String>, auth: Arc<Authenticator>, client: CalendarClient) -> Self {
        Self {
            name: name.into(),
            auth,
            client,
        }
    }

    /// Builds the authenticator and client for a stored account.
    pub fn open(config: &GoogleConfig, store: TokenStore, account: Account) -> ProviderResult<Self> {
        let name = account.name.clone();
        let auth = Authenticator::new(config, store, account)?;
        Ok(Self::new(name, Arc::new(auth), CalendarClient::new(config)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Lists the account's visible calendars.
    pub async fn list_calendars(&self) -> ProviderResult<Vec<Calendar>> {
        self.call(|token| async move { self.client.list_calendars(&token, &self.name).await })
            .await
    }

    pub async fn list_events(
        &self,
        calendar_id: &str,
        window: TimeWindow,
    ) -> ProviderResult<Vec<RawEvent>> {
        self.call(|token| async move {
            self.client.list_events(&token, calendar_id, window).await
        })
        .await
    }

    /// Creates an event from free text in `calendar_id`.
    pub async fn quick_add(&self, calendar_id: &str, text: &str) -> ProviderResult<RawEvent> {
        self.call(|token| async move { self.client.quick_add(&token, calendar_id, text).await })
            .await
    }

    /// Downloads the account's avatar unless it is already on disk.
    pub async fn ensure_avatar(&self, store: &TokenStore) -> ProviderResult<()> {
        let account = self.auth.account().await;
        if account.avatar_url.is_empty() {
            return Ok(());
        }
        let path = store.avatar_path(&account);
        if path.exists() {
            return Ok(());
        }
        self.client.download(&account.avatar_url, &path).await
    }

    async fn call<'a, T, F, Fut>(&'a self, request: F) -> ProviderResult<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ProviderResult<T>> + 'a,
    {
        let result = match self.auth.credential().await {
            Ok(cred) => request(cred.access_token).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(value) => Ok(value),
            Err(err) => Err(self.inspect(err).await),
        }
    }

    /// Clears the stored credential if the error says the grant is gone.
    async fn inspect(&self, err: ProviderError) -> ProviderError {
        if err.is_invalid_grant() {
            debug!(account = %self.name, "grant revoked");
            if let Err(e) = self.auth.revoke().await {
                warn!(account = %self.name, "failed to clear revoked credential: {}", e);
            }
        }
        err.with_provider(self.name.clone())
    }
}

impl EventSource for AccountSession {
    fn account_name(&self) -> &str {
        &self.name
    }

    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(AccountSession::list_events(self, calendar_id, window))
    }
}
