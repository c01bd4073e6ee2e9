//! Session model and the authentication lifecycle that gates data access.

mod manager;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::unix_timestamp_now;

pub use manager::{SessionManager, MAX_AVATAR_BYTES};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: UserMetadata,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token expiry, Unix seconds.
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    /// A session is only usable while its access token has not expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now()
    }

    #[must_use]
    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at <= unix_timestamp_now().saturating_add(seconds)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Authentication state observed by the auth gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
    /// Transient: always followed by a purge and `Unauthenticated`.
    Expired,
}

impl SessionState {
    /// Whether data operations may run in this state.
    #[must_use]
    pub const fn is_signed_in(self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("Session expired; sign in again")]
    SessionExpired,
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error("Auth API error: {0}")]
    Api(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if email.trim().is_empty() {
        return Err(AuthError::Api("Email is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(AuthError::Api("Password is required".to_string()));
    }
    Ok(())
}
