use std::path::PathBuf;

use dokkan_core::AppError;

pub const DEFAULT_CACHE_DIR: &str = ".dokkan-cache";
pub const DEFAULT_MEMORY_CAPACITY: u64 = 256;

/// Configuration of the file cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// Maximum number of entries kept in memory in front of the files.
    pub memory_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DOKKAN_CACHE_DIR` (optional, defaults to `.dokkan-cache`)
    /// - `DOKKAN_CACHE_CAPACITY` (optional, defaults to 256)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let dir = match var("DOKKAN_CACHE_DIR") {
            Some(dir) if dir.trim().is_empty() => {
                return Err(AppError::ConfigError(
                    "DOKKAN_CACHE_DIR must not be empty".into(),
                ));
            }
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(DEFAULT_CACHE_DIR),
        };

        let memory_capacity = match var("DOKKAN_CACHE_CAPACITY") {
            None => DEFAULT_MEMORY_CAPACITY,
            Some(raw) => raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid DOKKAN_CACHE_CAPACITY '{raw}': must be a non-negative integer"
                ))
            })?,
        };

        Ok(Self {
            dir,
            memory_capacity,
        })
    }
}
