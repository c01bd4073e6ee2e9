//! Directory-backed cache store, one file per key.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{CacheStore, StorageError, StorageResult};

const VALUE_EXTENSION: &str = "json";

/// Persists each key as `<root>/<percent-encoded key>.json`.
///
/// Writes land in a temporary sibling first and are renamed into place, so
/// a crash mid-write leaves either the old value or the new one.
#[derive(Debug)]
pub struct FileCacheStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl FileCacheStore {
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| {
            StorageError::Unavailable(format!(
                "failed to create cache directory {}: {error}",
                root.display()
            ))
        })?;
        tracing::debug!("Opened file cache at {}", root.display());
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{VALUE_EXTENSION}", urlencoding::encode(key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let sequence = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            ".{}.{}-{sequence}.tmp",
            urlencoding::encode(key),
            std::process::id()
        ))
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.value_path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let temp_path = self.temp_path(key);
        let result = (|| {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&temp_path, self.value_path(key))
        })();

        if let Err(error) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(error.into());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
