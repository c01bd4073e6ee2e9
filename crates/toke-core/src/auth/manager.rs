//! Session lifecycle state machine.
//!
//! ```text
//! Unauthenticated --sign_in/sign_up--> Authenticating --ok--> Authenticated
//!                                                     --err-> Unauthenticated
//! Authenticated --refresh--> Refreshing --ok--> Authenticated
//!                                       --auth err--> Expired --> Unauthenticated (purged)
//! any --sign_out--> Unauthenticated (purged)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::{validate_credentials, AuthError, AuthSession, AuthUser, SessionState};
use crate::cache::{purge_user_scope, read_json, write_json, CacheKey, CacheStore};
use crate::remote::{RemoteError, RemoteGateway, SignUpOutcome, UserUpdate, AVATARS_BUCKET};
use crate::util::{image_content_type, normalize_extension, unix_timestamp_millis_now};
use crate::{Error, Result};

/// Largest avatar image accepted for upload.
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Default)]
struct SessionSlot {
    session: Option<AuthSession>,
    /// Bumped whenever the slot is replaced or cleared, so a refresh that
    /// started before a sign-out cannot reinstall its result.
    generation: u64,
}

#[derive(Debug, Clone)]
enum RefreshFailure {
    Network(String),
    Expired,
    NotAuthenticated,
}

impl From<RefreshFailure> for Error {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Network(message) => Self::Network(message),
            RefreshFailure::Expired => Self::Auth(AuthError::SessionExpired),
            RefreshFailure::NotAuthenticated => Self::Auth(AuthError::NotAuthenticated),
        }
    }
}

type RefreshOutcome = std::result::Result<AuthSession, RefreshFailure>;

#[derive(Debug, Default)]
struct RefreshLedger {
    /// Outcome of the last refresh and the slot generation it started from.
    last: Option<(u64, RefreshOutcome)>,
}

pub struct SessionManager<R: RemoteGateway> {
    remote: Arc<R>,
    cache: Arc<dyn CacheStore>,
    refresh_margin_secs: i64,
    slot: RwLock<SessionSlot>,
    state: watch::Sender<SessionState>,
    refresh: Mutex<RefreshLedger>,
    completed_refreshes: AtomicU64,
}

impl<R: RemoteGateway> SessionManager<R> {
    /// Build the manager, resuming a persisted session when it is still valid.
    ///
    /// A persisted session that has expired (or cannot be read) is purged
    /// together with the owner's cached data and the manager starts signed out.
    pub fn start(remote: Arc<R>, cache: Arc<dyn CacheStore>, refresh_margin_secs: i64) -> Self {
        let restored = match read_json::<AuthSession>(cache.as_ref(), CacheKey::SESSION) {
            Ok(Some(session)) if !session.is_expired() => {
                tracing::info!("Restored session for user {}", session.user.id);
                Some(session)
            }
            Ok(Some(session)) => {
                tracing::warn!(
                    "Persisted session for user {} has expired; purging",
                    session.user.id
                );
                if let Err(error) = purge_user_scope(cache.as_ref(), &session.user.id) {
                    tracing::warn!("Failed to purge expired session data: {}", error);
                }
                None
            }
            Ok(None) => None,
            Err(error) => {
                tracing::warn!("Discarding unreadable persisted session: {}", error);
                if let Err(error) = cache.delete(CacheKey::SESSION) {
                    tracing::warn!("Failed to delete unreadable session: {}", error);
                }
                None
            }
        };

        let initial = if restored.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };

        Self {
            remote,
            cache,
            refresh_margin_secs,
            slot: RwLock::new(SessionSlot {
                session: restored,
                generation: 0,
            }),
            state: watch::Sender::new(initial),
            refresh: Mutex::new(RefreshLedger::default()),
            completed_refreshes: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver for the auth gate; yields every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.slot
            .read()
            .await
            .session
            .as_ref()
            .map(|session| session.user.clone())
    }

    /// Whether `user_id` still owns the active session.
    pub async fn is_active_for(&self, user_id: &str) -> bool {
        self.slot
            .read()
            .await
            .session
            .as_ref()
            .is_some_and(|session| session.user.id == user_id)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        validate_credentials(email, password)?;
        self.begin_authenticating("sign in")?;

        match self.remote.sign_in(email.trim(), password).await {
            Ok(session) => {
                self.install(session.clone()).await;
                self.transition(SessionState::Authenticated);
                Ok(session)
            }
            Err(error) => {
                tracing::warn!("Sign-in failed: {}", error);
                self.transition(SessionState::Unauthenticated);
                Err(error.into())
            }
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        validate_credentials(email, password)?;
        self.begin_authenticating("sign up")?;

        match self.remote.sign_up(email.trim(), password).await {
            Ok(SignUpOutcome::SignedIn(session)) => {
                self.install(session.clone()).await;
                self.transition(SessionState::Authenticated);
                Ok(SignUpOutcome::SignedIn(session))
            }
            Ok(SignUpOutcome::ConfirmationRequired) => {
                tracing::info!("Sign-up requires e-mail confirmation");
                self.transition(SessionState::Unauthenticated);
                Ok(SignUpOutcome::ConfirmationRequired)
            }
            Err(error) => {
                tracing::warn!("Sign-up failed: {}", error);
                self.transition(SessionState::Unauthenticated);
                Err(error.into())
            }
        }
    }

    /// Sign out from any state. Local state is cleared even when the remote
    /// call fails.
    pub async fn sign_out(&self) {
        let current = self.slot.read().await.session.clone();
        if let Some(session) = &current {
            if let Err(error) = self.remote.sign_out(&session.access_token).await {
                tracing::warn!("Remote sign-out failed; clearing local session anyway: {}", error);
            }
        }

        self.clear_local(current.as_ref().map(|session| session.user.id.as_str()))
            .await;
        self.transition(SessionState::Unauthenticated);
        tracing::info!("Signed out");
    }

    /// Refresh the access token. Concurrent callers share one remote call.
    pub async fn refresh(&self) -> Result<AuthSession> {
        let seen = self.completed_refreshes.load(Ordering::Acquire);
        let generation = self.slot.read().await.generation;
        self.refresh_single_flight(seen, generation).await
    }

    /// The current session, refreshed first when it is about to expire.
    ///
    /// Every entry and favorites operation passes through here.
    pub async fn authorized(&self) -> Result<AuthSession> {
        let seen = self.completed_refreshes.load(Ordering::Acquire);
        let (session, generation) = {
            let slot = self.slot.read().await;
            (slot.session.clone(), slot.generation)
        };
        let session = session.ok_or(AuthError::NotAuthenticated)?;

        if !session.expires_within(self.refresh_margin_secs) {
            return Ok(session);
        }

        match self.refresh_single_flight(seen, generation).await {
            Ok(refreshed) => Ok(refreshed),
            Err(Error::Network(message)) if !session.is_expired() => {
                tracing::warn!("Token refresh failed, using current token: {}", message);
                Ok(session)
            }
            Err(error) => Err(error),
        }
    }

    /// Expire the session after the remote rejected `access_token`.
    ///
    /// Ignored when the session has already moved on to a different token.
    pub async fn expire_if_current(&self, access_token: &str) {
        let user_id = {
            let slot = self.slot.read().await;
            match &slot.session {
                Some(session) if session.access_token == access_token => session.user.id.clone(),
                _ => return,
            }
        };
        self.expire(&user_id).await;
    }

    pub async fn update_user(&self, update: UserUpdate) -> Result<AuthUser> {
        if update.is_empty() {
            return Err(Error::Validation("nothing to update".to_string()));
        }
        let session = self.authorized().await?;

        let user = match self.remote.update_user(&session.access_token, &update).await {
            Ok(user) => user,
            Err(error) => return Err(self.handle_remote_error(&session, error).await),
        };

        let mut slot = self.slot.write().await;
        if let Some(current) = slot.session.as_mut() {
            if current.user.id == user.id {
                current.user = user.clone();
                self.persist(current);
            }
        }
        Ok(user)
    }

    /// Upload a new avatar image and store its public URL in the user metadata.
    pub async fn upload_avatar(&self, bytes: Vec<u8>, extension: &str) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::Validation("avatar image is empty".to_string()));
        }
        if bytes.len() > MAX_AVATAR_BYTES {
            return Err(Error::Validation(
                "File size must be less than 5MB".to_string(),
            ));
        }
        let session = self.authorized().await?;

        let extension = normalize_extension(extension);
        let path = format!(
            "{}/{}.{extension}",
            session.user.id,
            unix_timestamp_millis_now()
        );
        let url = match self
            .remote
            .upload_blob(
                &session.access_token,
                AVATARS_BUCKET,
                &path,
                bytes,
                &image_content_type(&extension),
            )
            .await
        {
            Ok(url) => url,
            Err(error) => return Err(self.handle_remote_error(&session, error).await),
        };

        self.update_user(UserUpdate {
            avatar_url: Some(url.clone()),
            ..Default::default()
        })
        .await?;
        Ok(url)
    }

    /// Whether the background refresher should act now.
    pub async fn needs_refresh(&self) -> bool {
        self.state() == SessionState::Authenticated
            && self
                .slot
                .read()
                .await
                .session
                .as_ref()
                .is_some_and(|session| session.expires_within(self.refresh_margin_secs))
    }

    /// Periodically refresh the token ahead of expiry. Abort the handle to
    /// stop; the task also ends once the manager is dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if manager.needs_refresh().await {
                    if let Err(error) = manager.refresh().await {
                        tracing::warn!("Background token refresh failed: {}", error);
                    }
                }
            }
        })
    }

    /// Map a remote failure on an authorized call, expiring the session when
    /// the token was rejected.
    pub(crate) async fn handle_remote_error(
        &self,
        session: &AuthSession,
        error: RemoteError,
    ) -> Error {
        if matches!(error, RemoteError::Auth(_)) {
            tracing::warn!("Remote rejected the session token: {}", error);
            self.expire_if_current(&session.access_token).await;
            return Error::Auth(AuthError::SessionExpired);
        }
        error.into()
    }

    /// `seen` and `generation` are what the caller observed before waiting;
    /// a refresh that completed meanwhile for the same session is reused.
    async fn refresh_single_flight(&self, seen: u64, generation: u64) -> Result<AuthSession> {
        let mut ledger = self.refresh.lock().await;
        if self.completed_refreshes.load(Ordering::Acquire) != seen {
            if let Some((started_at, outcome)) = ledger.last.clone() {
                if started_at == generation {
                    tracing::debug!("Joined an already completed token refresh");
                    return outcome.map_err(Error::from);
                }
            }
        }

        let (started_at, outcome) = self.refresh_now().await;
        ledger.last = Some((started_at, outcome.clone()));
        self.completed_refreshes.fetch_add(1, Ordering::AcqRel);
        outcome.map_err(Error::from)
    }

    async fn refresh_now(&self) -> (u64, RefreshOutcome) {
        let (current, generation) = {
            let slot = self.slot.read().await;
            (slot.session.clone(), slot.generation)
        };
        (generation, self.refresh_session(current, generation).await)
    }

    async fn refresh_session(
        &self,
        current: Option<AuthSession>,
        generation: u64,
    ) -> RefreshOutcome {
        let Some(current) = current else {
            return Err(RefreshFailure::NotAuthenticated);
        };
        if self.state() != SessionState::Authenticated {
            return Err(RefreshFailure::NotAuthenticated);
        }

        self.transition(SessionState::Refreshing);
        tracing::debug!("Refreshing access token for user {}", current.user.id);

        match self.remote.refresh_token(&current.refresh_token).await {
            Ok(refreshed) => {
                let mut slot = self.slot.write().await;
                if slot.generation != generation {
                    tracing::info!("Session changed during refresh; discarding refreshed tokens");
                    return Err(RefreshFailure::NotAuthenticated);
                }
                self.persist(&refreshed);
                slot.session = Some(refreshed.clone());
                slot.generation += 1;
                drop(slot);
                self.transition(SessionState::Authenticated);
                Ok(refreshed)
            }
            Err(RemoteError::Auth(message)) => {
                if !self.take_session_if(generation).await {
                    tracing::info!("Session changed during refresh; ignoring rejected token");
                    return Err(RefreshFailure::NotAuthenticated);
                }
                tracing::warn!("Refresh token rejected: {}", message);
                self.transition(SessionState::Expired);
                self.purge(Some(&current.user.id));
                self.transition(SessionState::Unauthenticated);
                Err(RefreshFailure::Expired)
            }
            Err(error) => {
                tracing::warn!("Token refresh failed: {}", error);
                if self.state() == SessionState::Refreshing {
                    self.transition(SessionState::Authenticated);
                }
                Err(RefreshFailure::Network(error.to_string()))
            }
        }
    }

    async fn expire(&self, user_id: &str) {
        self.transition(SessionState::Expired);
        self.clear_local(Some(user_id)).await;
        self.transition(SessionState::Unauthenticated);
    }

    fn begin_authenticating(&self, action: &'static str) -> Result<()> {
        let mut rejected_in = None;
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Unauthenticated | SessionState::Expired) {
                *state = SessionState::Authenticating;
                true
            } else {
                rejected_in = Some(*state);
                false
            }
        });

        match rejected_in {
            Some(state) => Err(AuthError::InvalidTransition { state, action }.into()),
            None => {
                tracing::debug!("Session state -> {}", SessionState::Authenticating);
                Ok(())
            }
        }
    }

    async fn install(&self, session: AuthSession) {
        self.persist(&session);
        let mut slot = self.slot.write().await;
        slot.session = Some(session);
        slot.generation += 1;
    }

    async fn clear_local(&self, user_id: Option<&str>) {
        {
            let mut slot = self.slot.write().await;
            slot.session = None;
            slot.generation += 1;
        }
        self.purge(user_id);
    }

    /// Clear the slot only if it still holds the session of `generation`.
    async fn take_session_if(&self, generation: u64) -> bool {
        let mut slot = self.slot.write().await;
        if slot.generation != generation {
            return false;
        }
        slot.session = None;
        slot.generation += 1;
        true
    }

    fn purge(&self, user_id: Option<&str>) {
        let purge = match user_id {
            Some(user_id) => purge_user_scope(self.cache.as_ref(), user_id),
            None => self.cache.delete(CacheKey::SESSION),
        };
        if let Err(error) = purge {
            tracing::warn!("Failed to purge local session data: {}", error);
        }
    }

    /// Persisting is best effort: the in-memory session stays authoritative.
    fn persist(&self, session: &AuthSession) {
        if let Err(error) = write_json(self.cache.as_ref(), CacheKey::SESSION, session) {
            tracing::warn!("Failed to persist session: {}", error);
        }
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("Session state {} -> {}", previous, next);
        }
    }
}
