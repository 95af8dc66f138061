//! Refresh layer error types.

use std::io;
use thiserror::Error;

/// Result type for cache and job operations.
pub type RefreshResult<T> = Result<T, RefreshError>;

/// Errors from the cache store and the job coordinator.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// IO error reading or writing a cache file.
    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    /// A cached value could not be (de)serialized.
    #[error("invalid cached data in {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The background process could not be started.
    #[error("failed to start job {job}: {source}")]
    Spawn {
        job: String,
        #[source]
        source: io::Error,
    },

    /// Cache keys and job names are plain file names.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
}

impl RefreshError {
    pub fn io(key: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }

    pub fn json(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            key: key.into(),
            source,
        }
    }

    pub fn spawn(job: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            job: job.into(),
            source,
        }
    }
}

/// Rejects keys that would escape their directory.
pub(crate) fn check_key(key: &str) -> RefreshResult<&str> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\', '\0']);
    if valid {
        Ok(key)
    } else {
        Err(RefreshError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(check_key("events-2024-06-01.json").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("..").is_err());
        assert!(check_key("../etc/passwd").is_err());
        assert!(check_key("a\\b").is_err());
    }

    #[test]
    fn display_names_the_key() {
        let err = RefreshError::io("calendars.json", io::Error::other("denied"));
        assert_eq!(err.to_string(), "IO error on calendars.json: denied");
    }
}
