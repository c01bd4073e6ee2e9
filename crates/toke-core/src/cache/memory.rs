//! In-process cache store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{CacheStore, StorageError, StorageResult};

/// Volatile store for tests and for running without a writable data dir.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values().map_or(0, |values| values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn values(&self) -> StorageResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.values
            .lock()
            .map_err(|error| StorageError::Unavailable(error.to_string()))
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.values()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.values()?.remove(key);
        Ok(())
    }
}
