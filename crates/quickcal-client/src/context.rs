//! Everything a command needs, resolved once per invocation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{debug, warn};

use quickcal_core::{CalendarSelection, Clock, SystemClock, select_active, select_writable};
use quickcal_providers::ConcurrentFetcher;
use quickcal_providers::google::{
    Account, AccountSession, GoogleConfig, SignInFailures, TokenStore,
};
use quickcal_refresh::{
    ActiveCalendars, CacheStore, JobCoordinator, JobStatus, RefreshOrchestrator,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Cache key of the merged calendar list.
pub const CALENDARS_KEY: &str = "calendars.json";
/// Job refreshing the calendar list.
pub const UPDATE_CALENDARS: &str = "update-calendars";
/// Job refreshing cached events.
pub const UPDATE_EVENTS: &str = "update-events";

/// Paths, stores and settings shared by all commands.
pub struct AppContext {
    config: ClientConfig,
    config_path: Option<PathBuf>,
    cache_dir: PathBuf,
    tokens: TokenStore,
    orchestrator: RefreshOrchestrator,
    clock: Arc<dyn Clock>,
    program: PathBuf,
    google: Option<GoogleConfig>,
    sign_in_failures: SignInFailures,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config_path", &self.config_path)
            .field("data_dir", &self.tokens.dir())
            .field("cache_dir", &self.cache_dir)
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Builds the context. Refresh jobs re-run the current executable.
    pub fn new(config: ClientConfig, config_path: Option<PathBuf>) -> ClientResult<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::with_clock(config, Arc::new(SystemClock))
            .with_config_path(config_path)
            .with_refresh_program(program))
    }

    pub fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> Self {
        let cache_dir = config.cache_dir();
        let cache = CacheStore::with_clock(&cache_dir, clock.clone());
        let jobs = JobCoordinator::new(cache_dir.join("jobs"));
        Self {
            tokens: TokenStore::new(config.data_dir()),
            orchestrator: RefreshOrchestrator::new(cache, jobs),
            cache_dir,
            config,
            config_path: None,
            clock,
            program: PathBuf::from("quickcal"),
            google: None,
            sign_in_failures: SignInFailures::default(),
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Program started for background refreshes.
    pub fn with_refresh_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Uses `google` instead of building it from the configuration.
    pub fn with_google_config(mut self, google: GoogleConfig) -> Self {
        self.google = Some(google);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Config file in use, falling back to the default location.
    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(ClientConfig::default_path)
    }

    pub fn cache(&self) -> &CacheStore {
        self.orchestrator.cache()
    }

    pub fn jobs(&self) -> &JobCoordinator {
        self.orchestrator.jobs()
    }

    pub fn orchestrator(&self) -> &RefreshOrchestrator {
        &self.orchestrator
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn log_file(&self) -> PathBuf {
        log_file(&self.cache_dir)
    }

    /// Today in the local timezone, as seen by the context's clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&Local).date_naive()
    }

    /// Command line that runs `quickcal <args>` in the background.
    pub fn refresh_command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command.args(args);
        command
    }

    /// Starts `job` unless it is already running.
    pub fn start_job(&self, job: &str, args: &[&str]) -> ClientResult<JobStatus> {
        let status = self.jobs().run_in_background(job, self.refresh_command(args))?;
        debug!(job, ?status, "requested job");
        Ok(status)
    }

    /// Google settings. Every config handed out shares this process's
    /// sign-in failure record, so one failed browser sign-in stops the
    /// others.
    pub fn google_config(&self) -> ClientResult<GoogleConfig> {
        let google = match &self.google {
            Some(google) => google.clone(),
            None => self
                .config
                .google
                .to_provider_config()
                .map_err(ClientError::Config)?,
        };
        Ok(google.with_sign_in_failures(self.sign_in_failures.clone()))
    }

    pub fn sign_in_failures(&self) -> &SignInFailures {
        &self.sign_in_failures
    }

    pub fn accounts(&self) -> ClientResult<Vec<Account>> {
        Ok(self.tokens.list()?)
    }

    /// Loads an account by name, failing if it does not exist.
    pub fn account(&self, name: &str) -> ClientResult<Account> {
        self.tokens
            .load(name)?
            .ok_or_else(|| ClientError::Invalid(format!("no account named {:?}", name)))
    }

    pub fn active_calendars(&self) -> ClientResult<ActiveCalendars> {
        Ok(ActiveCalendars::load(self.cache())?)
    }

    /// Active calendars of all accounts, or why there are none.
    pub fn selection(&self, accounts: &[Account], writable_only: bool) -> ClientResult<CalendarSelection> {
        let active: HashSet<String> = self.active_calendars()?.ids().iter().cloned().collect();
        let calendars = accounts.iter().map(|a| a.calendars.as_slice());
        Ok(if writable_only {
            select_writable(calendars, &active)
        } else {
            select_active(calendars, &active)
        })
    }

    pub fn open_session(&self, google: &GoogleConfig, account: Account) -> ClientResult<AccountSession> {
        Ok(AccountSession::open(google, self.tokens.clone(), account)?)
    }

    /// One event source per signed-in account.
    ///
    /// Logged-out accounts are skipped: they need an explicit `reauth`.
    pub fn fetcher(&self, accounts: &[Account]) -> ClientResult<ConcurrentFetcher> {
        let google = self.google_config()?;
        let mut fetcher = ConcurrentFetcher::new();
        for account in accounts {
            if account.is_logged_out() {
                warn!(account = %account.name, "account is logged out, skipping");
                continue;
            }
            fetcher.add_source(Arc::new(self.open_session(&google, account.clone())?));
        }
        Ok(fetcher)
    }
}

/// Log file of background jobs inside `cache_dir`.
pub fn log_file(cache_dir: &Path) -> PathBuf {
    cache_dir.join("logs").join("quickcal.log")
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use quickcal_core::Calendar;
    use quickcal_providers::ProviderError;
    use quickcal_providers::google::{Authenticator, BrowserLauncher, OAuthCredentials};

    #[test]
    fn refresh_command_forwards_config() {
        let t = context();
        let ctx = t.ctx.with_config_path(Some(PathBuf::from("/etc/quickcal.toml")));
        let command = ctx.refresh_command(&["update", "events", "2024-06-01"]);
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(command.get_program(), "true");
        assert_eq!(args, vec!["--config", "/etc/quickcal.toml", "update", "events", "2024-06-01"]);
    }

    #[test]
    fn selection_reads_accounts_and_active_set() {
        let t = context();
        assert_eq!(
            t.ctx.selection(&[], false).unwrap(),
            CalendarSelection::NoAccounts
        );

        let mut account = Account::new("me@example.com");
        account.calendars = vec![
            Calendar::new("work", "Work", "me@example.com").with_writable(true),
            Calendar::new("holidays", "Holidays", "me@example.com"),
        ];
        let accounts = vec![account];
        assert_eq!(
            t.ctx.selection(&accounts, false).unwrap(),
            CalendarSelection::NoActive
        );

        let mut active = t.ctx.active_calendars().unwrap();
        active.toggle("holidays");
        active.save(t.ctx.cache()).unwrap();
        assert_eq!(t.ctx.selection(&accounts, false).unwrap().calendars().unwrap().len(), 1);
        assert_eq!(
            t.ctx.selection(&accounts, true).unwrap(),
            CalendarSelection::NoWritable
        );
    }

    #[test]
    fn missing_account_is_reported() {
        let t = context();
        assert!(matches!(
            t.ctx.account("nobody@example.com"),
            Err(ClientError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn google_configs_share_sign_in_failures() {
        struct NoBrowser;
        impl BrowserLauncher for NoBrowser {
            fn open(&self, _url: &str) -> Result<(), ProviderError> {
                Err(ProviderError::authentication("no display"))
            }
        }

        let t = context();
        let google = GoogleConfig::new(OAuthCredentials::new("cid", "secret")).with_callback_port(0);
        let ctx = t.ctx.with_google_config(google.clone());
        let first = ctx.google_config().unwrap();
        let second = ctx.google_config().unwrap();
        assert!(!second.sign_in_failures.is_set());

        let auth = Authenticator::new(&first, ctx.tokens().clone(), Account::new("me@example.com"))
            .unwrap()
            .with_browser(Arc::new(NoBrowser));
        assert!(auth.credential().await.is_err());
        assert!(second.sign_in_failures.is_set());
        assert!(ctx.sign_in_failures().is_set());
        assert!(!google.sign_in_failures.is_set());
    }

    #[test]
    fn today_follows_the_clock() {
        let t = context();
        assert_eq!(t.ctx.today(), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }
}
