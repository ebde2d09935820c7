use std::future::Future;

use crate::error::AppError;
use crate::models::{FetchParams, RawRecord};

/// Fetches raw records of a data type from a named upstream source.
///
/// One adapter value serves every source it knows about; the orchestrator
/// tells it which one to call. An unknown source should be reported as
/// [`AppError::ConfigError`].
pub trait SourceAdapter: Send + Sync + Clone {
    fn fetch(
        &self,
        source: &str,
        data_type: &str,
        params: &FetchParams,
    ) -> impl Future<Output = Result<Vec<RawRecord>, AppError>> + Send;
}

/// Key/value persistence of JSON payloads. Holds no TTL logic.
pub trait CacheStore: Send + Sync + Clone {
    /// Persist `value` under `key`, overwriting any previous value.
    fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Return the stored value, or `None` when the key is absent.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, AppError>> + Send;

    /// Whether `key` holds a value. Stores with a cheaper check than a full
    /// read should override this.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, AppError>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Remove every stored key.
    fn clear_all(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op [`CacheStore`] for when nothing should be remembered between calls.
#[derive(Debug, Clone)]
pub struct NullCache;

impl CacheStore for NullCache {
    async fn put(&self, _key: &str, _value: &serde_json::Value) -> Result<(), AppError> {
        Ok(())
    }

    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, AppError> {
        Ok(None)
    }

    async fn clear_all(&self) -> Result<(), AppError> {
        Ok(())
    }
}
