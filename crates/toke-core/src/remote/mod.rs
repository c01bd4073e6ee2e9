//! Remote data gateway: account-scoped entry CRUD, blob upload, and auth.

mod supabase;

use std::future::Future;

use thiserror::Error;

use crate::auth::{AuthSession, AuthUser};
use crate::models::{Entry, EntryId};

pub use supabase::{normalize_project_url, SupabaseGateway};

pub const ENTRIES_TABLE: &str = "entries";
pub const AVATARS_BUCKET: &str = "avatars";
pub const ENTRY_IMAGES_BUCKET: &str = "entry-images";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote service unreachable: {0}")]
    Network(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rejected by remote service: {0}")]
    Validation(String),
    #[error("Remote auth error: {0}")]
    Auth(String),
    #[error("Remote API error: {0}")]
    Api(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(AuthSession),
    ConfirmationRequired,
}

/// Account changes accepted by the auth service. `None` leaves a field as is.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.email.is_none() && self.password.is_none() && self.avatar_url.is_none()
    }
}

impl std::fmt::Debug for UserUpdate {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UserUpdate")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("avatar_url", &self.avatar_url)
            .finish()
    }
}

/// Narrow contract the client core needs from the backend.
///
/// Every data call is authorized with the caller's access token; the gateway
/// itself holds no session state.
pub trait RemoteGateway: Send + Sync + 'static {
    /// All entries owned by `user_id`, newest first.
    fn query_entries(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> impl Future<Output = RemoteResult<Vec<Entry>>> + Send;

    fn get_entry(
        &self,
        access_token: &str,
        id: &EntryId,
    ) -> impl Future<Output = RemoteResult<Entry>> + Send;

    fn insert_entry(
        &self,
        access_token: &str,
        entry: &Entry,
    ) -> impl Future<Output = RemoteResult<Entry>> + Send;

    fn update_entry(
        &self,
        access_token: &str,
        entry: &Entry,
    ) -> impl Future<Output = RemoteResult<Entry>> + Send;

    fn delete_entry(
        &self,
        access_token: &str,
        id: &EntryId,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Store `bytes` at `bucket/path` and return its public URL.
    fn upload_blob(
        &self,
        access_token: &str,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = RemoteResult<String>> + Send;

    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = RemoteResult<AuthSession>> + Send;

    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = RemoteResult<SignUpOutcome>> + Send;

    fn sign_out(&self, access_token: &str) -> impl Future<Output = RemoteResult<()>> + Send;

    fn update_user(
        &self,
        access_token: &str,
        update: &UserUpdate,
    ) -> impl Future<Output = RemoteResult<AuthUser>> + Send;

    fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = RemoteResult<AuthSession>> + Send;
}
