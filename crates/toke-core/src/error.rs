//! Error types for toke-core

use thiserror::Error;

use crate::auth::AuthError;
use crate::cache::StorageError;
use crate::remote::RemoteError;

/// Result type alias using toke-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in toke-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Remote service unreachable or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid credentials, or an expired/revoked session
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Entry payload rejected locally or by the remote service
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local persistence failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Entry not found
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification used by callers to pick a recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Auth,
    Validation,
    Storage,
    NotFound,
    Other,
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(_) => ErrorKind::Storage,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Serialization(_) | Self::Config(_) => ErrorKind::Other,
        }
    }

    /// Network and storage failures are degraded locally instead of being
    /// reported as hard failures.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Storage)
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Network(message) | RemoteError::Api(message) => Self::Network(message),
            RemoteError::Auth(message) => Self::Auth(AuthError::Api(message)),
            RemoteError::Validation(message) => Self::Validation(message),
            RemoteError::NotFound(what) => Self::NotFound(what),
        }
    }
}
