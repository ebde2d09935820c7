use thiserror::Error;

/// Application-wide error types for dokkan.
#[derive(Error, Debug)]
pub enum AppError {
    /// One source failed to deliver data. Recovered by falling back to the next source.
    #[error("Source '{source_id}' failed: {message}")]
    SourceError { source_id: String, message: String },

    /// Every configured source for a data type failed or returned nothing.
    #[error("All sources exhausted for '{data_type}'{}", last_error_suffix(.last_error))]
    SourcesExhausted {
        data_type: String,
        last_error: Option<Box<AppError>>,
    },

    /// Missing or invalid configuration (unknown data type, no priority list, bad config file).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A single field transformation failed. Only ever logged; never aborts a batch.
    #[error("Transform failed for field '{field}': {message}")]
    FieldTransform { field: String, message: String },

    /// Cache persistence failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,
}

fn last_error_suffix(last: &Option<Box<AppError>>) -> String {
    match last {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl AppError {
    /// Returns true if a fallback to another source may recover from this error.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::SourceError { .. }
            | AppError::HttpError(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::SerializationError(_) => true,
            AppError::SourcesExhausted { .. }
            | AppError::ConfigError(_)
            | AppError::FieldTransform { .. }
            | AppError::CacheError(_)
            | AppError::Cancelled => false,
        }
    }

    /// Short machine-readable identifier, used in batch reports and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::SourceError { .. } => "source_error",
            AppError::SourcesExhausted { .. } => "sources_exhausted",
            AppError::ConfigError(_) => "config_error",
            AppError::FieldTransform { .. } => "field_transform",
            AppError::CacheError(_) => "cache_error",
            AppError::HttpError(_) => "http_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::Timeout(_) => "timeout",
            AppError::NetworkError(_) => "network_error",
            AppError::Cancelled => "cancelled",
        }
    }
}
