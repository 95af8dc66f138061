//! Accounts and their persisted credentials.
//!
//! Each account lives in its own `account-<name>.json` file in the data
//! directory, next to an `icons/` directory holding downloaded avatars.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use quickcal_core::Calendar;

use crate::error::{ProviderError, ProviderResult};

/// Seconds shaved off the reported lifetime so a token is refreshed before
/// Google starts rejecting it.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// An OAuth token set for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The access token for API requests.
    pub access_token: String,

    /// The refresh token for obtaining new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// When the access token expires (safety margin already applied).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// The OAuth scopes that were granted.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// When the tokens were last refreshed.
    pub last_refresh: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential from token endpoint response data.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expiry_from(expires_in_secs),
            scopes,
            last_refresh: Utc::now(),
        }
    }

    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Returns true if the credential can be renewed without the user.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Replaces the access token after a refresh.
    ///
    /// Google only sends a new refresh token occasionally; the old one is
    /// kept when `refresh_token` is `None`.
    pub fn refreshed(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at: expiry_from(expires_in_secs),
            scopes: self.scopes.clone(),
            last_refresh: Utc::now(),
        }
    }
}

fn expiry_from(expires_in_secs: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in_secs
        .map(|secs| Utc::now() + Duration::seconds(secs) - Duration::seconds(EXPIRY_MARGIN_SECS))
}

/// A Google account known to quickcal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Storage name; the email address once known.
    pub name: String,
    /// Empty until the first successful login.
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
    /// Whether the account granted the read-write calendar scope.
    #[serde(default)]
    pub read_write: bool,
    #[serde(default)]
    pub calendars: Vec<Calendar>,
    /// `None` once the user logged out or the grant was revoked.
    #[serde(default)]
    pub credential: Option<Credential>,
}

impl Account {
    /// A new, never logged in account.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_logged_out(&self) -> bool {
        self.credential.is_none()
    }

    /// True until the user-info endpoint has been queried once.
    pub fn is_first_login(&self) -> bool {
        self.email.is_empty()
    }

    /// Name of the account's file in the data directory.
    pub fn file_name(&self) -> String {
        account_file_name(&self.name)
    }

    /// Extension of the avatar image, taken from its URL.
    pub fn avatar_extension(&self) -> &str {
        let path = self.avatar_url.split(['?', '#']).next().unwrap_or_default();
        let last = path.rsplit('/').next().unwrap_or_default();
        match last.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 => ext,
            _ => "jpg",
        }
    }
}

fn account_file_name(name: &str) -> String {
    format!("account-{}.json", sanitize(name))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}

/// File-backed store of [`Account`]s.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn account_path(&self, name: &str) -> PathBuf {
        self.dir.join(account_file_name(name))
    }

    /// Directory holding downloaded avatars.
    pub fn icons_dir(&self) -> PathBuf {
        self.dir.join("icons")
    }

    /// Where the account's avatar is (or would be) stored.
    pub fn avatar_path(&self, account: &Account) -> PathBuf {
        self.icons_dir().join(format!(
            "{}.{}",
            sanitize(&account.name),
            account.avatar_extension()
        ))
    }

    /// Loads an account. Returns `Ok(None)` if it has never been saved.
    pub fn load(&self, name: &str) -> ProviderResult<Option<Account>> {
        let path = self.account_path(name);
        if !path.exists() {
            debug!(account = name, "no account file at {:?}", path);
            return Ok(None);
        }
        read_account(&path).map(Some)
    }

    /// Saves the account, replacing the previous file atomically.
    pub fn save(&self, account: &Account) -> ProviderResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            ProviderError::storage(format!("failed to create account directory: {}", e))
                .with_source(e)
        })?;

        let path = self.account_path(&account.name);
        let temp_path = temp_path_for(&path);
        let content = serde_json::to_string_pretty(account).map_err(|e| {
            ProviderError::internal(format!("failed to serialize account: {}", e))
        })?;

        fs::write(&temp_path, &content).map_err(|e| {
            ProviderError::storage(format!("failed to write account file: {}", e)).with_source(e)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600));
        }

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(
                ProviderError::storage(format!("failed to rename account file: {}", e))
                    .with_source(e),
            );
        }

        debug!(account = %account.name, "saved account to {:?}", path);
        Ok(())
    }

    /// Lists every saved account, sorted by name.
    ///
    /// Unreadable files are skipped with a warning so one corrupt account
    /// does not hide the others.
    pub fn list(&self) -> ProviderResult<Vec<Account>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ProviderError::storage(format!(
                    "failed to read account directory: {}",
                    e
                ))
                .with_source(e));
            }
        };

        let mut accounts = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !file_name.starts_with("account-") || !file_name.ends_with(".json") {
                continue;
            }
            match read_account(&entry.path()) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!("skipping {}: {}", file_name, e),
            }
        }
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    /// Deletes an account file and its avatar.
    pub fn remove(&self, account: &Account) -> ProviderResult<()> {
        let path = self.account_path(&account.name);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| {
                ProviderError::storage(format!("failed to remove account file: {}", e))
                    .with_source(e)
            })?;
            info!(account = %account.name, "removed account");
        }
        let _ = fs::remove_file(self.avatar_path(account));
        Ok(())
    }

    /// Moves an account to a new storage name (used once the email is known).
    pub fn rename(&self, account: &mut Account, new_name: &str) -> ProviderResult<()> {
        if account.name == new_name {
            return Ok(());
        }
        let old_path = self.account_path(&account.name);
        account.name = new_name.to_string();
        self.save(account)?;
        if old_path.exists() {
            let _ = fs::remove_file(old_path);
        }
        Ok(())
    }
}

/// Per-process temp file, so a refresh job and an interactive command
/// saving the same account never write the same temp file.
fn temp_path_for(path: &Path) -> PathBuf {
    path.with_extension(format!("json.{}.tmp", std::process::id()))
}

fn read_account(path: &Path) -> ProviderResult<Account> {
    let content = fs::read_to_string(path).map_err(|e| {
        ProviderError::storage(format!("failed to read account file: {}", e)).with_source(e)
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ProviderError::storage(format!("failed to parse account file {:?}: {}", path, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> Account {
        Account {
            name: name.into(),
            email: name.into(),
            credential: Some(Credential::new(
                "access",
                Some("refresh".into()),
                Some(3600),
                vec!["scope".into()],
            )),
            ..Account::default()
        }
    }

    #[test]
    fn credential_expiry_margin() {
        let cred = Credential::new("a", None, Some(3600), vec![]);
        assert!(!cred.is_expired());
        let left = cred.expires_at.unwrap() - Utc::now();
        assert!(left <= Duration::seconds(3600 - EXPIRY_MARGIN_SECS));

        let short = Credential::new("a", None, Some(30), vec![]);
        assert!(short.is_expired());

        let forever = Credential::new("a", None, None, vec![]);
        assert!(!forever.is_expired());
    }

    #[test]
    fn refreshed_keeps_old_refresh_token() {
        let cred = Credential::new("a", Some("r1".into()), Some(10), vec!["s".into()]);
        let next = cred.refreshed("b", None, Some(3600));
        assert_eq!(next.access_token, "b");
        assert_eq!(next.refresh_token.as_deref(), Some("r1"));
        assert_eq!(next.scopes, vec!["s"]);
        assert!(!next.is_expired());

        let rotated = cred.refreshed("c", Some("r2".into()), None);
        assert_eq!(rotated.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn avatar_extension_from_url() {
        let mut acc = Account::new("me");
        acc.avatar_url = "https://lh3.example.com/a/photo.png?sz=50".into();
        assert_eq!(acc.avatar_extension(), "png");
        acc.avatar_url = "https://lh3.example.com/a/AAcHTt".into();
        assert_eq!(acc.avatar_extension(), "jpg");
    }

    #[test]
    fn save_load_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());

        assert!(store.load("a@example.com").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());

        let a = account("a@example.com");
        store.save(&account("b@example.com")).unwrap();
        store.save(&a).unwrap();

        let loaded = store.load("a@example.com").unwrap().unwrap();
        assert_eq!(loaded, a);
        assert!(!loaded.is_logged_out());

        let names: Vec<_> = store.list().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a@example.com", "b@example.com"]);

        store.remove(&loaded).unwrap();
        assert!(store.load("a@example.com").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn account_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&account("me")).unwrap();
        let mode = fs::metadata(store.account_path("me")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn list_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&account("good")).unwrap();
        fs::write(dir.path().join("account-bad.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn save_uses_a_per_process_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let path = store.account_path("me@example.com");
        let temp = temp_path_for(&path);
        assert_ne!(temp, path);
        assert!(
            temp.to_string_lossy()
                .ends_with(&format!(".{}.tmp", std::process::id()))
        );

        // A temp file left by another process is not in the way.
        fs::write(path.with_extension("json.tmp"), "{partial").unwrap();
        store.save(&account("me@example.com")).unwrap();
        assert!(!temp.exists());
        assert_eq!(store.load("me@example.com").unwrap().unwrap().name, "me@example.com");
    }

    #[test]
    fn rename_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let mut acc = account("pending");
        store.save(&acc).unwrap();
        store.rename(&mut acc, "me@example.com").unwrap();
        assert!(store.load("pending").unwrap().is_none());
        assert_eq!(store.load("me@example.com").unwrap().unwrap().name, "me@example.com");
    }
}
