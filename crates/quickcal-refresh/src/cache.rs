//! File-backed cache of whole values.
//!
//! Each key is a file in the cache directory; its modification time is the
//! write timestamp. Writes go to a temporary file that is renamed over the
//! old one, so readers in other processes see either the old or the new
//! value, never half of one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use quickcal_core::{Clock, SystemClock};

use crate::error::{RefreshError, RefreshResult, check_key};

/// Keyed store of blobs with age-based expiry.
#[derive(Clone)]
pub struct CacheStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").field("dir", &self.dir).finish()
    }
}

impl CacheStore {
    /// A store rooted at `dir`, using the wall clock.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> RefreshResult<PathBuf> {
        Ok(self.dir.join(check_key(key)?))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_ok_and(|p| p.is_file())
    }

    /// When `key` was last stored.
    pub fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let modified = fs::metadata(self.path(key).ok()?).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// How long ago `key` was stored. Never negative.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let stored = self.stored_at(key)?;
        Some((self.clock.now() - stored).max(Duration::zero()))
    }

    /// True if `key` is missing or at least `max_age` old.
    pub fn expired(&self, key: &str, max_age: Duration) -> bool {
        match self.age(key) {
            Some(age) => age >= max_age,
            None => true,
        }
    }

    /// Reads the raw value. A missing key is `Ok(None)`.
    pub fn load(&self, key: &str) -> RefreshResult<Option<Vec<u8>>> {
        match fs::read(self.path(key)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RefreshError::io(key, e)),
        }
    }

    /// Replaces the value of `key`.
    pub fn store(&self, key: &str, data: &[u8]) -> RefreshResult<()> {
        let path = self.path(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| RefreshError::io(key, e))?;

        let temp_path = self.dir.join(format!(".{}.{}.tmp", key, std::process::id()));
        fs::write(&temp_path, data).map_err(|e| RefreshError::io(key, e))?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(RefreshError::io(key, e));
        }

        debug!(key, bytes = data.len(), "stored cache entry");
        Ok(())
    }

    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> RefreshResult<Option<T>> {
        match self.load(key)? {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| RefreshError::json(key, e)),
            None => Ok(None),
        }
    }

    pub fn store_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> RefreshResult<()> {
        let data = serde_json::to_vec(value).map_err(|e| RefreshError::json(key, e))?;
        self.store(key, &data)
    }

    /// Deletes `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> RefreshResult<bool> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RefreshError::io(key, e)),
        }
    }

    /// Keys whose names start with `prefix` and end with `suffix`.
    pub fn keys_matching(&self, prefix: &str, suffix: &str) -> RefreshResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RefreshError::io(self.dir.to_string_lossy(), e)),
        };

        let mut keys: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(prefix) && name.ends_with(suffix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Deletes every key matching `prefix`/`suffix`. Returns the removed keys.
    pub fn remove_matching(&self, prefix: &str, suffix: &str) -> RefreshResult<Vec<String>> {
        let mut removed = Vec::new();
        for key in self.keys_matching(prefix, suffix)? {
            if self.remove(&key)? {
                debug!(key = %key, "removed cache entry");
                removed.push(key);
            }
        }
        Ok(removed)
    }

    /// Deletes matching keys stored more than `max_age` ago.
    ///
    /// Failures on single files are logged and skipped.
    pub fn prune_older_than(
        &self,
        prefix: &str,
        suffix: &str,
        max_age: Duration,
    ) -> RefreshResult<Vec<String>> {
        let mut removed = Vec::new();
        for key in self.keys_matching(prefix, suffix)? {
            if !self.age(&key).is_some_and(|age| age > max_age) {
                continue;
            }
            match self.remove(&key) {
                Ok(true) => removed.push(key),
                Ok(false) => {}
                Err(e) => warn!("failed to prune {}: {}", key, e),
            }
        }
        Ok(removed)
    }
}

/// Sets a file's modification time; used by tests to age entries.
#[doc(hidden)]
pub fn set_stored_at(path: &Path, at: DateTime<Utc>) -> io::Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    file.set_modified(SystemTime::from(at))
}
