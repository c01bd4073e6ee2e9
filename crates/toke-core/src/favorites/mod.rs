//! Device-local favorites, one set per user.
//!
//! Favorites never leave the device, so toggles are applied to the cache
//! immediately without a remote round trip.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;

use crate::auth::SessionManager;
use crate::cache::{read_json, write_json, CacheKey, CacheStore};
use crate::models::EntryId;
use crate::remote::RemoteGateway;
use crate::Result;

pub struct FavoritesManager<R: RemoteGateway> {
    cache: Arc<dyn CacheStore>,
    session: Arc<SessionManager<R>>,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<R: RemoteGateway> FavoritesManager<R> {
    pub fn new(cache: Arc<dyn CacheStore>, session: Arc<SessionManager<R>>) -> Self {
        Self {
            cache,
            session,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Unreadable favorites count as "not a favorite".
    pub async fn is_favorite(&self, id: &EntryId) -> Result<bool> {
        let user_id = self.user_id().await?;
        Ok(self.read_degraded(&user_id).contains(id))
    }

    pub async fn favorites(&self) -> Result<BTreeSet<EntryId>> {
        let user_id = self.user_id().await?;
        Ok(self.read_degraded(&user_id))
    }

    /// Flip membership of `id` and return the new membership.
    pub async fn toggle_favorite(&self, id: &EntryId) -> Result<bool> {
        let user_id = self.user_id().await?;
        let lock = self.user_lock(&user_id);
        let toggled = {
            let _guard = lock.lock().await;
            self.toggle_locked(&user_id, id)
        };
        self.release_user_lock(&user_id, lock);

        let member = toggled?;
        tracing::debug!(
            "Entry {} {} favorites",
            id,
            if member { "added to" } else { "removed from" }
        );
        Ok(member)
    }

    fn toggle_locked(&self, user_id: &str, id: &EntryId) -> Result<bool> {
        let key = CacheKey::favorites(user_id);
        let mut favorites = read_json::<BTreeSet<EntryId>>(self.cache.as_ref(), &key)?
            .unwrap_or_default();
        let member = if favorites.remove(id) {
            false
        } else {
            favorites.insert(id.clone());
            true
        };
        write_json(self.cache.as_ref(), &key, &favorites)?;
        Ok(member)
    }

    /// Favorites are local, but an expired session still may not use them.
    async fn user_id(&self) -> Result<String> {
        Ok(self.session.authorized().await?.user.id)
    }

    fn read_degraded(&self, user_id: &str) -> BTreeSet<EntryId> {
        let key = CacheKey::favorites(user_id);
        match read_json::<BTreeSet<EntryId>>(self.cache.as_ref(), &key) {
            Ok(favorites) => favorites.unwrap_or_default(),
            Err(error) => {
                tracing::warn!("Treating unreadable favorites as empty: {}", error);
                BTreeSet::new()
            }
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }

    /// Drop the user's lock when no other toggle is holding or waiting on it.
    fn release_user_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(user_id)
            .is_some_and(|current| Arc::ptr_eq(current, &lock) && Arc::strong_count(&lock) == 2)
        {
            locks.remove(user_id);
        }
    }

    /// Number of users with a live toggle lock.
    pub fn tracked_users(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
