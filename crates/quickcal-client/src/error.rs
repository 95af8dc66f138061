//! Client error types.

use std::fmt;

use quickcal_providers::ProviderError;
use quickcal_refresh::RefreshError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// Google API or authentication error.
    Provider(ProviderError),
    /// Cache or background job error.
    Refresh(RefreshError),
    /// IO error.
    Io(std::io::Error),
    /// The account must sign in again.
    AuthRequired(String),
    /// The request cannot be carried out as asked.
    Invalid(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Provider(err) => write!(f, "provider error: {}", err),
            Self::Refresh(err) => write!(f, "cache error: {}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::AuthRequired(account) => {
                write!(f, "authentication required: run `quickcal reauth {}`", account)
            }
            Self::Invalid(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(err) => Some(err),
            Self::Refresh(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProviderError> for ClientError {
    fn from(err: ProviderError) -> Self {
        if err.is_invalid_grant() {
            return Self::AuthRequired(err.provider().unwrap_or("<account>").to_string());
        }
        Self::Provider(err)
    }
}

impl From<RefreshError> for ClientError {
    fn from(err: RefreshError) -> Self {
        Self::Refresh(err)
    }
}
