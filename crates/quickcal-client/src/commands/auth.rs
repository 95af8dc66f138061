//! Account commands: login, reauth, logout, accounts.

use std::path::PathBuf;

use tracing::{info, warn};

use quickcal_providers::google::{
    AccessMode, Account, Authenticator, GoogleConfig, OAuthCredentials,
};

use crate::config::{ClientConfig, GoogleSettings};
use crate::context::{AppContext, CALENDARS_KEY, UPDATE_CALENDARS};
use crate::error::{ClientError, ClientResult};
use crate::feedback::{Feedback, Item};

/// Where the credentials were resolved from.
#[derive(Debug, PartialEq)]
enum CredentialSource {
    /// `--client-id`/`--client-secret` or `--credentials-file`
    Cli,
    /// Already in config.toml
    Config,
}

/// Signs in a new Google account through the browser.
///
/// Credentials given on the command line are written to config.toml so
/// background jobs find them. The calendar list is refreshed afterwards.
pub async fn login(
    ctx: &AppContext,
    read_write: bool,
    client_id: Option<String>,
    client_secret: Option<String>,
    credentials_file: Option<PathBuf>,
) -> ClientResult<Account> {
    let (credentials, source) = resolve_credentials(
        client_id,
        client_secret,
        credentials_file,
        &ctx.config().google,
    )?;
    credentials
        .validate()
        .map_err(|e| ClientError::Config(format!("invalid Google credentials: {}", e)))?;
    let google = with_settings(GoogleConfig::new(credentials.clone()), &ctx.config().google)
        .with_sign_in_failures(ctx.sign_in_failures().clone());

    println!("A browser window will open for you to sign in.");
    println!("If it doesn't, copy the URL from the log output.");

    let auth = Authenticator::new(&google, ctx.tokens().clone(), Account::new(""))?
        .with_access_mode(access_mode(read_write));
    auth.login().await?;
    let account = auth.account().await;

    if source == CredentialSource::Cli {
        let path = ctx.config_path();
        ClientConfig::save_google_credentials(
            &path,
            &credentials.client_id,
            &credentials.client_secret,
        )
        .map_err(ClientError::Config)?;
        println!("Credentials saved to {}", path.display());
    }

    info!(account = %account.name, "login successful");
    println!("Signed in as {}", account.name);
    if let Err(e) = ctx.start_job(UPDATE_CALENDARS, &["update", "calendars"]) {
        warn!("failed to start calendar refresh: {}", e);
    }
    Ok(account)
}

/// Runs the browser handshake again for an existing account.
pub async fn reauth(ctx: &AppContext, name: &str, read_write: bool) -> ClientResult<Account> {
    let account = ctx.account(name)?;
    let google = ctx.google_config()?;
    let mode = access_mode(read_write || account.read_write);

    let auth = Authenticator::new(&google, ctx.tokens().clone(), account)?.with_access_mode(mode);
    auth.login().await?;
    let account = auth.account().await;

    info!(account = %account.name, "re-authenticated");
    println!("Signed in as {}", account.name);
    if let Err(e) = ctx.start_job(UPDATE_CALENDARS, &["update", "calendars"]) {
        warn!("failed to start calendar refresh: {}", e);
    }
    Ok(account)
}

/// Removes an account, its credential and the caches built from it.
pub fn logout(ctx: &AppContext, name: &str) -> ClientResult<()> {
    let account = ctx.account(name)?;
    ctx.tokens().remove(&account)?;
    ctx.cache().remove(CALENDARS_KEY)?;
    ctx.cache().remove_matching("events-", ".json")?;
    println!("Removed account {}", account.name);
    Ok(())
}

/// Lists accounts with their sign-in state.
pub fn accounts(ctx: &AppContext) -> ClientResult<Feedback> {
    let mut fb = Feedback::new();
    for account in ctx.accounts()? {
        let mut subtitle = if account.is_logged_out() {
            format!("Logged out, run `quickcal reauth {}`", account.name)
        } else if account.read_write {
            "Read-write".to_string()
        } else {
            "Read-only".to_string()
        };
        if !account.display_name.is_empty() {
            subtitle = format!("{} / {}", account.display_name, subtitle);
        }
        fb.push(
            Item::new(&account.name)
                .subtitle(subtitle)
                .arg(&account.name)
                .autocomplete(&account.name),
        );
    }
    fb.warn_empty("No Accounts Configured", "Run `quickcal login` to add a Google account");
    Ok(fb)
}

fn access_mode(read_write: bool) -> AccessMode {
    if read_write {
        AccessMode::ReadWrite
    } else {
        AccessMode::ReadOnly
    }
}

fn with_settings(mut google: GoogleConfig, settings: &GoogleSettings) -> GoogleConfig {
    if let Some(port) = settings.callback_port {
        google = google.with_callback_port(port);
    }
    if let Some(secs) = settings.callback_timeout_secs {
        google = google.with_callback_timeout(std::time::Duration::from_secs(secs));
    }
    google
}

/// Resolves Google credentials, first match wins:
/// 1. `--client-id` + `--client-secret`
/// 2. `--credentials-file`
/// 3. the `[google]` section of config.toml
fn resolve_credentials(
    cli_client_id: Option<String>,
    cli_client_secret: Option<String>,
    cli_credentials_file: Option<PathBuf>,
    settings: &GoogleSettings,
) -> ClientResult<(OAuthCredentials, CredentialSource)> {
    if let (Some(id), Some(secret)) = (&cli_client_id, &cli_client_secret) {
        return Ok((OAuthCredentials::new(id, secret), CredentialSource::Cli));
    }

    if let Some(path) = cli_credentials_file {
        let creds = OAuthCredentials::from_file(&path).map_err(|e| {
            ClientError::Config(format!(
                "failed to load credentials from {}: {}",
                path.display(),
                e
            ))
        })?;
        return Ok((creds, CredentialSource::Cli));
    }

    if cli_client_id.is_some() || cli_client_secret.is_some() {
        return Err(ClientError::Config(
            "both --client-id and --client-secret are required when providing credentials directly"
                .to_string(),
        ));
    }

    let creds = settings.resolve_credentials().map_err(ClientError::Config)?;
    Ok((creds, CredentialSource::Config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcal_core::Calendar;
    use quickcal_providers::google::Credential;

    use crate::context::testing::context;

    #[test]
    fn credentials_from_cli_win() {
        let settings = GoogleSettings {
            client_id: Some("config-id".into()),
            client_secret: Some("config-secret".into()),
            ..GoogleSettings::default()
        };
        let (creds, source) = resolve_credentials(
            Some("cli-id".into()),
            Some("cli-secret".into()),
            None,
            &settings,
        )
        .unwrap();
        assert_eq!(creds.client_id, "cli-id");
        assert_eq!(source, CredentialSource::Cli);

        let (creds, source) = resolve_credentials(None, None, None, &settings).unwrap();
        assert_eq!(creds.client_secret, "config-secret");
        assert_eq!(source, CredentialSource::Config);
    }

    #[test]
    fn credentials_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret.json");
        std::fs::write(
            &path,
            r#"{"installed":{"client_id":"file.apps.googleusercontent.com","client_secret":"file-secret"}}"#,
        )
        .unwrap();
        let (creds, source) =
            resolve_credentials(None, None, Some(path), &GoogleSettings::default()).unwrap();
        assert_eq!(creds.client_id, "file.apps.googleusercontent.com");
        assert_eq!(source, CredentialSource::Cli);
    }

    #[test]
    fn partial_cli_credentials_fail() {
        let err = resolve_credentials(Some("id".into()), None, None, &GoogleSettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("--client-secret"));
    }

    #[test]
    fn logout_removes_account_and_caches() {
        let t = context();
        let mut account = Account::new("me@example.com");
        account.calendars = vec![Calendar::new("work", "Work", "me@example.com")];
        t.ctx.tokens().save(&account).unwrap();
        t.ctx.cache().store(CALENDARS_KEY, b"[]").unwrap();
        t.ctx.cache().store("events-2024-06-01.json", b"[]").unwrap();

        logout(&t.ctx, "me@example.com").unwrap();
        assert!(t.ctx.accounts().unwrap().is_empty());
        assert!(!t.ctx.cache().exists(CALENDARS_KEY));
        assert!(!t.ctx.cache().exists("events-2024-06-01.json"));
    }

    #[test]
    fn logout_unknown_account() {
        let t = context();
        assert!(matches!(
            logout(&t.ctx, "nobody@example.com"),
            Err(ClientError::Invalid(_))
        ));
    }

    #[test]
    fn accounts_show_sign_in_state() {
        let t = context();
        assert_eq!(accounts(&t.ctx).unwrap().items[0].title, "No Accounts Configured");

        let mut signed_in = Account::new("a@example.com");
        signed_in.display_name = "Ann".into();
        signed_in.read_write = true;
        signed_in.credential = Some(Credential::new("t", None, Some(3600), vec![]));
        t.ctx.tokens().save(&signed_in).unwrap();
        t.ctx.tokens().save(&Account::new("b@example.com")).unwrap();

        let fb = accounts(&t.ctx).unwrap();
        assert_eq!(fb.items.len(), 2);
        assert_eq!(fb.items[0].subtitle, "Ann / Read-write");
        assert_eq!(
            fb.items[1].subtitle,
            "Logged out, run `quickcal reauth b@example.com`"
        );
    }
}
