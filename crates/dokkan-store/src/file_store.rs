//! JSON files on disk with an in-memory front.
//!
//! Each key is stored as `<dir>/<key>.json`. Writes go to a temporary file in
//! the same directory and are renamed into place, so a reader never sees a
//! half-written entry. A file that does not parse is reported as absent.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dokkan_core::config::is_valid_key;
use dokkan_core::error::AppError;
use dokkan_core::traits::CacheStore;
use moka::future::Cache;

use crate::config::StoreConfig;

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct FileCacheStore {
    dir: Arc<PathBuf>,
    memory: Cache<String, Arc<serde_json::Value>>,
}

impl FileCacheStore {
    /// Open (creating if needed) the cache directory.
    pub async fn open(config: &StoreConfig) -> Result<Self, AppError> {
        tokio::fs::create_dir_all(&config.dir).await.map_err(|e| {
            AppError::CacheError(format!(
                "Failed to create cache directory {}: {e}",
                config.dir.display()
            ))
        })?;
        tracing::debug!(dir = %config.dir.display(), "Cache store opened");
        Ok(Self {
            dir: Arc::new(config.dir.clone()),
            memory: Cache::new(config.memory_capacity),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, AppError> {
        if !is_valid_key(key) {
            return Err(AppError::CacheError(format!("Invalid cache key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.{ENTRY_EXTENSION}")))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{key}.{}.{n}.{TEMP_EXTENSION}",
            std::process::id()
        ))
    }

    async fn read_file(&self, key: &str, path: &Path) -> Result<Option<serde_json::Value>, AppError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::CacheError(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring unparseable cache file");
                Ok(None)
            }
        }
    }

    async fn remove_entry_files(&self) -> Result<usize, AppError> {
        let mut entries = match tokio::fs::read_dir(self.dir.as_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::CacheError(format!(
                    "Failed to list {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to list cache directory: {e}")))?
        {
            let path = entry.path();
            let ours = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == ENTRY_EXTENSION || ext == TEMP_EXTENSION);
            if !ours {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AppError::CacheError(format!(
                        "Failed to remove {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(removed)
    }
}

impl CacheStore for FileCacheStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), AppError> {
        let path = self.entry_path(key)?;
        let bytes = serde_json::to_vec(value)?;

        let temp = self.temp_path(key);
        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            return Err(AppError::CacheError(format!(
                "Failed to write {}: {e}",
                temp.display()
            )));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(AppError::CacheError(format!(
                "Failed to move entry into {}: {e}",
                path.display()
            )));
        }

        self.memory
            .insert(key.to_string(), Arc::new(value.clone()))
            .await;
        tracing::debug!(key = %key, bytes = bytes.len(), "Cache entry written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        let path = self.entry_path(key)?;
        if let Some(value) = self.memory.get(key).await {
            return Ok(Some(value.as_ref().clone()));
        }

        let value = self.read_file(key, &path).await?;
        if let Some(value) = &value {
            self.memory
                .insert(key.to_string(), Arc::new(value.clone()))
                .await;
        }
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let path = self.entry_path(key)?;
        if self.memory.contains_key(key) {
            return Ok(true);
        }
        tokio::fs::try_exists(&path).await.map_err(|e| {
            AppError::CacheError(format!("Failed to check {}: {e}", path.display()))
        })
    }

    async fn clear_all(&self) -> Result<(), AppError> {
        // Files go first so a concurrent read cannot refill memory from them.
        let removed = self.remove_entry_files().await;
        self.memory.invalidate_all();
        let removed = removed?;
        tracing::info!(dir = %self.dir.display(), removed, "Cache directory cleared");
        Ok(())
    }
}
