//! Durable key/value cache for entries, favorites, and the persisted session.
//!
//! Stores only offer `get`/`set`/`delete` with no cross-key transactions.
//! Callers that touch several keys sequence the writes themselves and
//! tolerate partial application.

mod file;
mod memory;

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Entry, EntryId};

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Io(String),
    #[error("Corrupt cache value for {key}: {message}")]
    Corrupt { key: String, message: String },
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;
    /// Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Logical cache keys.
pub struct CacheKey;

impl CacheKey {
    pub const SESSION: &'static str = "session";

    #[must_use]
    pub fn entries(user_id: &str) -> String {
        format!("entries:{user_id}")
    }

    #[must_use]
    pub fn entry(id: &EntryId) -> String {
        format!("entry:{id}")
    }

    #[must_use]
    pub fn favorites(user_id: &str) -> String {
        format!("favorites:{user_id}")
    }

    /// Ids of every `entry:{id}` key written for `user_id`.
    #[must_use]
    pub fn entry_index(user_id: &str) -> String {
        format!("entry_ids:{user_id}")
    }
}

pub fn read_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> StorageResult<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|error| StorageError::Corrupt {
            key: key.to_string(),
            message: error.to_string(),
        })
}

pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_vec(value).map_err(|error| StorageError::Corrupt {
        key: key.to_string(),
        message: error.to_string(),
    })?;
    store.set(key, &raw)
}

/// Add `id` to the per-user entry key index. Call before writing `entry:{id}`.
pub fn index_entry(store: &dyn CacheStore, user_id: &str, id: &EntryId) -> StorageResult<()> {
    let key = CacheKey::entry_index(user_id);
    let mut ids = read_json::<BTreeSet<EntryId>>(store, &key)?.unwrap_or_default();
    if ids.insert(id.clone()) {
        write_json(store, &key, &ids)?;
    }
    Ok(())
}

/// Drop `id` from the per-user entry key index once `entry:{id}` is gone.
pub fn unindex_entry(store: &dyn CacheStore, user_id: &str, id: &EntryId) -> StorageResult<()> {
    let key = CacheKey::entry_index(user_id);
    let Some(mut ids) = read_json::<BTreeSet<EntryId>>(store, &key)? else {
        return Ok(());
    };
    if ids.remove(id) {
        write_json(store, &key, &ids)?;
    }
    Ok(())
}

/// Remove every cached value owned by `user_id` plus the persisted session.
///
/// Per-entry keys are found through the entry key index and the cached
/// entries snapshot; both are deleted after the keys they list. All deletes
/// are attempted and the first failure is returned.
pub fn purge_user_scope(store: &dyn CacheStore, user_id: &str) -> StorageResult<()> {
    let entries_key = CacheKey::entries(user_id);
    let index_key = CacheKey::entry_index(user_id);
    let mut first_error = None;

    let mut ids = BTreeSet::new();
    match read_json::<BTreeSet<EntryId>>(store, &index_key) {
        Ok(indexed) => ids.extend(indexed.unwrap_or_default()),
        Err(error) => tracing::warn!("Could not read {} while purging: {}", index_key, error),
    }
    match read_json::<Vec<Entry>>(store, &entries_key) {
        Ok(listed) => ids.extend(listed.unwrap_or_default().into_iter().map(|entry| entry.id)),
        Err(error) => tracing::warn!("Could not read {} while purging: {}", entries_key, error),
    }
    for id in &ids {
        record_failure(&mut first_error, store.delete(&CacheKey::entry(id)));
    }

    let favorites_key = CacheKey::favorites(user_id);
    for key in [
        entries_key.as_str(),
        index_key.as_str(),
        favorites_key.as_str(),
        CacheKey::SESSION,
    ] {
        record_failure(&mut first_error, store.delete(key));
    }

    first_error.map_or(Ok(()), Err)
}

fn record_failure(slot: &mut Option<StorageError>, result: StorageResult<()>) {
    if let Err(error) = result {
        tracing::warn!("Cache purge step failed: {}", error);
        slot.get_or_insert(error);
    }
}
