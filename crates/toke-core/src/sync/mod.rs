//! Entry synchronization between the remote service and the local cache.
//!
//! Reads are stale-while-revalidate: a cached snapshot is returned at once
//! and a background task replaces it with the remote result. Writes are
//! remote-first and only touch the cache after the remote acknowledged them.
//!
//! Every cache key has a [`ScopeGate`] holding a ticket counter. A refresh
//! draws its ticket when the remote fetch is issued; a mutation draws its
//! ticket while holding the gate. A write is applied only if its ticket is
//! newer than the last applied one, so a delete confirmed after a refresh was
//! issued always wins over that refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::auth::{AuthError, AuthSession, SessionManager};
use crate::cache::{index_entry, read_json, unindex_entry, write_json, CacheKey, CacheStore};
use crate::models::{filter_entries, sort_entries, Entry, EntryDraft, EntryId, EntryPatch};
use crate::remote::{RemoteError, RemoteGateway, ENTRY_IMAGES_BUCKET};
use crate::util::{image_content_type, normalize_extension};
use crate::{Error, ErrorKind, Result};

/// Largest entry photo accepted for upload.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const EVENT_CAPACITY: usize = 64;

/// Change notifications for subscribed views.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The cached list for `user_id` was replaced.
    EntriesRefreshed { user_id: String, entries: Vec<Entry> },
    EntryRefreshed(Entry),
    EntryRemoved(EntryId),
    /// Non-fatal degradation, e.g. a failed background refresh.
    Warning(String),
}

/// Where the data in a [`Listing`] or [`EntryView`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Local snapshot; a background refresh is running.
    Cached,
    /// Fetched from the remote during this call.
    Fresh,
    /// Nothing cached and the remote was unreachable.
    Unavailable,
}

#[derive(Debug)]
pub struct Listing {
    pub entries: Vec<Entry>,
    pub freshness: Freshness,
    /// Background refresh started for a cached listing.
    pub refresh: Option<JoinHandle<()>>,
    pub warning: Option<String>,
}

#[derive(Debug)]
pub struct EntryView {
    pub entry: Entry,
    pub freshness: Freshness,
    pub refresh: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct ScopeGate {
    issued: AtomicU64,
    /// Last applied ticket; held while writing the key.
    applied: Mutex<u64>,
}

impl ScopeGate {
    fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel) + 1
    }
}

pub struct EntrySynchronizer<R: RemoteGateway> {
    remote: Arc<R>,
    cache: Arc<dyn CacheStore>,
    session: Arc<SessionManager<R>>,
    gates: std::sync::Mutex<HashMap<String, Arc<ScopeGate>>>,
    /// Serializes updates of the per-user entry key index.
    index: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: RemoteGateway> EntrySynchronizer<R> {
    pub fn new(
        remote: Arc<R>,
        cache: Arc<dyn CacheStore>,
        session: Arc<SessionManager<R>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            remote,
            cache,
            session,
            gates: std::sync::Mutex::new(HashMap::new()),
            index: Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Entries of the signed-in user, newest first.
    pub async fn list_entries(self: &Arc<Self>) -> Result<Listing> {
        let session = self.session.authorized().await?;
        let scope = CacheKey::entries(&session.user.id);
        let gate = self.gate(&scope);

        let (cached, ticket) = {
            let _applied = gate.applied.lock().await;
            (self.read_cached::<Vec<Entry>>(&scope), gate.issue())
        };

        if let Some(entries) = cached {
            tracing::debug!("Serving {} cached entries for {}", entries.len(), scope);
            let this = Arc::clone(self);
            let refresh = tokio::spawn(async move {
                let outcome = this.refresh_list(&session, &gate, ticket).await;
                this.release_gate(&scope, gate);
                if let Err(error) = outcome {
                    this.report_refresh_failure("entries", &error);
                }
            });
            return Ok(Listing {
                entries,
                freshness: Freshness::Cached,
                refresh: Some(refresh),
                warning: None,
            });
        }

        let outcome = self.refresh_list(&session, &gate, ticket).await;
        self.release_gate(&scope, gate);
        match outcome {
            Ok(entries) => Ok(Listing {
                entries,
                freshness: Freshness::Fresh,
                refresh: None,
                warning: None,
            }),
            Err(error) if error.kind() == ErrorKind::Network => {
                let warning = format!("Entries unavailable offline: {error}");
                self.warn(warning.clone());
                Ok(Listing {
                    entries: Vec::new(),
                    freshness: Freshness::Unavailable,
                    refresh: None,
                    warning: Some(warning),
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Entries whose strain or brand matches `query`.
    pub async fn search_entries(self: &Arc<Self>, query: &str) -> Result<Listing> {
        let mut listing = self.list_entries().await?;
        listing.entries = filter_entries(&listing.entries, query);
        Ok(listing)
    }

    pub async fn get_entry(self: &Arc<Self>, id: &EntryId) -> Result<EntryView> {
        let session = self.session.authorized().await?;
        let key = CacheKey::entry(id);
        let gate = self.gate(&key);

        let (cached, ticket) = {
            let _applied = gate.applied.lock().await;
            let cached = self
                .read_cached::<Entry>(&key)
                .filter(|entry| entry.user_id == session.user.id);
            (cached, gate.issue())
        };

        if let Some(entry) = cached {
            let this = Arc::clone(self);
            let id = id.clone();
            let refresh = tokio::spawn(async move {
                let outcome = this.refresh_entry(&session, &id, &gate, ticket).await;
                this.release_gate(&key, gate);
                if let Err(error) = outcome {
                    this.report_refresh_failure(&format!("entry {id}"), &error);
                }
            });
            return Ok(EntryView {
                entry,
                freshness: Freshness::Cached,
                refresh: Some(refresh),
            });
        }

        let outcome = self.refresh_entry(&session, id, &gate, ticket).await;
        self.release_gate(&key, gate);
        let entry = outcome?;
        Ok(EntryView {
            entry,
            freshness: Freshness::Fresh,
            refresh: None,
        })
    }

    pub async fn create_entry(&self, draft: EntryDraft) -> Result<Entry> {
        let session = self.session.authorized().await?;
        let entry = draft.into_entry(&session.user.id)?;

        let stored = match self.remote.insert_entry(&session.access_token, &entry).await {
            Ok(stored) => stored,
            Err(error) => return Err(self.session.handle_remote_error(&session, error).await),
        };
        tracing::info!("Created entry {}", stored.id);

        self.apply_upsert(&session.user.id, &stored).await;
        Ok(stored)
    }

    pub async fn update_entry(&self, id: &EntryId, patch: EntryPatch) -> Result<Entry> {
        if patch.is_empty() {
            return Err(Error::Validation("nothing to update".to_string()));
        }
        let session = self.session.authorized().await?;

        let current = match self.remote.get_entry(&session.access_token, id).await {
            Ok(current) => current,
            Err(RemoteError::NotFound(what)) => {
                self.apply_removal(&session.user.id, id).await;
                return Err(Error::NotFound(what));
            }
            Err(error) => return Err(self.session.handle_remote_error(&session, error).await),
        };
        let updated = patch.apply_to(&current)?;

        let stored = match self.remote.update_entry(&session.access_token, &updated).await {
            Ok(stored) => stored,
            Err(error) => return Err(self.session.handle_remote_error(&session, error).await),
        };
        tracing::info!("Updated entry {}", stored.id);

        self.apply_upsert(&session.user.id, &stored).await;
        Ok(stored)
    }

    /// Delete remotely, then drop the entry from every cached view.
    ///
    /// An entry the remote no longer has counts as deleted.
    pub async fn delete_entry(&self, id: &EntryId) -> Result<()> {
        let session = self.session.authorized().await?;

        match self.remote.delete_entry(&session.access_token, id).await {
            Ok(()) => tracing::info!("Deleted entry {}", id),
            Err(RemoteError::NotFound(_)) => {
                tracing::debug!("Entry {} was already gone remotely", id);
            }
            Err(error) => return Err(self.session.handle_remote_error(&session, error).await),
        }

        self.apply_removal(&session.user.id, id).await;
        Ok(())
    }

    /// Upload a photo for an entry and point the entry's `image` at it.
    pub async fn attach_image(
        &self,
        id: &EntryId,
        bytes: Vec<u8>,
        extension: &str,
    ) -> Result<Entry> {
        if bytes.is_empty() {
            return Err(Error::Validation("image is empty".to_string()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(Error::Validation(
                "File size must be less than 5MB".to_string(),
            ));
        }
        let session = self.session.authorized().await?;

        let extension = normalize_extension(extension);
        let path = format!("{}/{id}.{extension}", session.user.id);
        let url = match self
            .remote
            .upload_blob(
                &session.access_token,
                ENTRY_IMAGES_BUCKET,
                &path,
                bytes,
                &image_content_type(&extension),
            )
            .await
        {
            Ok(url) => url,
            Err(error) => return Err(self.session.handle_remote_error(&session, error).await),
        };

        self.update_entry(
            id,
            EntryPatch {
                image: Some(Some(url)),
                ..Default::default()
            },
        )
        .await
    }

    /// Fetch the scope list and apply it unless a newer write landed first.
    ///
    /// A superseded result is never returned: the caller gets the newer
    /// snapshot, or one more fetch is made when no snapshot exists.
    async fn refresh_list(
        &self,
        session: &AuthSession,
        gate: &ScopeGate,
        mut ticket: u64,
    ) -> Result<Vec<Entry>> {
        let user_id = &session.user.id;
        let scope = CacheKey::entries(user_id);
        let mut refetched = false;

        loop {
            let mut entries = match self
                .remote
                .query_entries(&session.access_token, user_id)
                .await
            {
                Ok(entries) => entries,
                Err(error) => return Err(self.session.handle_remote_error(session, error).await),
            };
            sort_entries(&mut entries);

            let mut applied = gate.applied.lock().await;
            if !self.session.is_active_for(user_id).await {
                tracing::debug!("Session ended during refresh of {}", scope);
                return Err(AuthError::NotAuthenticated.into());
            }
            if ticket > *applied {
                *applied = ticket;
                self.write_cached(&scope, &entries);
                self.emit(SyncEvent::EntriesRefreshed {
                    user_id: user_id.clone(),
                    entries: entries.clone(),
                });
                return Ok(entries);
            }

            tracing::debug!(
                "Discarding superseded refresh of {} (ticket {}, applied {})",
                scope,
                ticket,
                *applied
            );
            if let Some(current) = self.read_cached::<Vec<Entry>>(&scope) {
                return Ok(current);
            }
            if refetched {
                return Ok(entries);
            }
            refetched = true;
            ticket = gate.issue();
        }
    }

    async fn refresh_entry(
        &self,
        session: &AuthSession,
        id: &EntryId,
        gate: &ScopeGate,
        ticket: u64,
    ) -> Result<Entry> {
        let entry = match self.remote.get_entry(&session.access_token, id).await {
            Ok(entry) => entry,
            Err(RemoteError::NotFound(what)) => {
                self.apply_removal(&session.user.id, id).await;
                return Err(Error::NotFound(what));
            }
            Err(error) => return Err(self.session.handle_remote_error(session, error).await),
        };

        let key = CacheKey::entry(id);
        let mut applied = gate.applied.lock().await;
        if !self.session.is_active_for(&session.user.id).await {
            return Err(AuthError::NotAuthenticated.into());
        }
        if ticket <= *applied {
            tracing::debug!("Discarding superseded refresh of {}", key);
            // A newer write either cached the entry or removed it.
            return self
                .read_cached(&key)
                .ok_or_else(|| Error::NotFound(format!("entry {id}")));
        }

        *applied = ticket;
        self.index_entry_key(&session.user.id, id).await;
        self.write_cached(&key, &entry);
        self.emit(SyncEvent::EntryRefreshed(entry.clone()));
        Ok(entry)
    }

    /// Reflect an acknowledged create or update in the per-entry key and in
    /// the scope list, when a list snapshot exists.
    async fn apply_upsert(&self, user_id: &str, entry: &Entry) {
        let key = CacheKey::entry(&entry.id);
        let gate = self.gate(&key);
        {
            let mut applied = gate.applied.lock().await;
            *applied = gate.issue();
            if self.session.is_active_for(user_id).await {
                self.index_entry_key(user_id, &entry.id).await;
                self.write_cached(&key, entry);
            }
        }
        self.release_gate(&key, gate);
        self.emit(SyncEvent::EntryRefreshed(entry.clone()));

        let scope = CacheKey::entries(user_id);
        let gate = self.gate(&scope);
        let listed = {
            let mut applied = gate.applied.lock().await;
            *applied = gate.issue();
            self.upsert_listed(user_id, &scope, entry).await
        };
        self.release_gate(&scope, gate);
        if let Some(entries) = listed {
            self.emit(SyncEvent::EntriesRefreshed {
                user_id: user_id.to_string(),
                entries,
            });
        }
    }

    /// Caller holds the scope gate.
    async fn upsert_listed(&self, user_id: &str, scope: &str, entry: &Entry) -> Option<Vec<Entry>> {
        if !self.session.is_active_for(user_id).await {
            return None;
        }
        let mut entries = self.read_cached::<Vec<Entry>>(scope)?;
        match entries.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        sort_entries(&mut entries);
        self.write_cached(scope, &entries);
        Some(entries)
    }

    async fn apply_removal(&self, user_id: &str, id: &EntryId) {
        let key = CacheKey::entry(id);
        let gate = self.gate(&key);
        {
            let mut applied = gate.applied.lock().await;
            *applied = gate.issue();
            match self.cache.delete(&key) {
                Ok(()) => self.unindex_entry_key(user_id, id).await,
                Err(error) => tracing::warn!("Failed to drop cached {}: {}", key, error),
            }
        }
        self.release_gate(&key, gate);
        self.emit(SyncEvent::EntryRemoved(id.clone()));

        let scope = CacheKey::entries(user_id);
        let gate = self.gate(&scope);
        let listed = {
            let mut applied = gate.applied.lock().await;
            *applied = gate.issue();
            self.remove_listed(&scope, id)
        };
        self.release_gate(&scope, gate);
        if let Some(entries) = listed {
            self.emit(SyncEvent::EntriesRefreshed {
                user_id: user_id.to_string(),
                entries,
            });
        }
    }

    /// Caller holds the scope gate. `None` when nothing changed.
    fn remove_listed(&self, scope: &str, id: &EntryId) -> Option<Vec<Entry>> {
        let mut entries = self.read_cached::<Vec<Entry>>(scope)?;
        let before = entries.len();
        entries.retain(|entry| &entry.id != id);
        if entries.len() == before {
            return None;
        }
        self.write_cached(scope, &entries);
        Some(entries)
    }

    fn gate(&self, key: &str) -> Arc<ScopeGate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(key.to_string()).or_default())
    }

    /// Forget `gate` once no other task holds it.
    ///
    /// Tickets are only compared against the gate they were drawn from, so a
    /// gate nobody holds has no pending tickets and a later one for the same
    /// key can start a fresh sequence.
    fn release_gate(&self, key: &str, gate: Arc<ScopeGate>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = gates.get(key) {
            if Arc::ptr_eq(current, &gate) && Arc::strong_count(&gate) == 2 {
                gates.remove(key);
            }
        }
    }

    /// Index failures are logged: an unindexed key may outlive a purge.
    async fn index_entry_key(&self, user_id: &str, id: &EntryId) {
        let _index = self.index.lock().await;
        if let Err(error) = index_entry(self.cache.as_ref(), user_id, id) {
            tracing::warn!("Failed to index cached entry {}: {}", id, error);
        }
    }

    async fn unindex_entry_key(&self, user_id: &str, id: &EntryId) {
        let _index = self.index.lock().await;
        if let Err(error) = unindex_entry(self.cache.as_ref(), user_id, id) {
            tracing::warn!("Failed to unindex cached entry {}: {}", id, error);
        }
    }

    /// Number of cache keys that currently have a ticket gate.
    pub fn tracked_keys(&self) -> usize {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cache reads degrade to a miss on storage failure.
    fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match read_json(self.cache.as_ref(), key) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("Ignoring unreadable cache value {}: {}", key, error);
                None
            }
        }
    }

    fn write_cached<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(error) = write_json(self.cache.as_ref(), key, value) {
            tracing::warn!("Failed to cache {}: {}", key, error);
        }
    }

    fn report_refresh_failure(&self, what: &str, error: &Error) {
        match error.kind() {
            ErrorKind::Network => {
                self.warn(format!("Showing cached {what}; refresh failed: {error}"));
            }
            _ => tracing::warn!("Background refresh of {} failed: {}", what, error),
        }
    }

    fn warn(&self, message: String) {
        tracing::warn!("{}", message);
        self.emit(SyncEvent::Warning(message));
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}
