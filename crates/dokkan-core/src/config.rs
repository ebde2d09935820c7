use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::SourceId;

/// An upstream source and how politely it must be called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    pub id: SourceId,
    /// Minimum delay between consecutive requests to this source.
    #[serde(default)]
    pub rate_limit_ms: u64,
    /// Endpoint template understood by the adapter; `{data_type}` is substituted.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// JSON pointer to the record array inside the response body (e.g. `/data`).
    #[serde(default)]
    pub records_pointer: Option<String>,
}

impl SourceDef {
    pub fn new(id: impl Into<SourceId>, rate_limit: Duration) -> Self {
        Self {
            id: id.into(),
            rate_limit_ms: rate_limit.as_millis() as u64,
            endpoint: None,
            records_pointer: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_records_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.records_pointer = Some(pointer.into());
        self
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }
}

/// A named category of records with its cache policy and source priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTypeDef {
    pub name: String,
    pub ttl_ms: u64,
    /// Source ids, most-preferred first.
    pub sources: Vec<SourceId>,
}

impl DataTypeDef {
    pub fn new(name: impl Into<String>, ttl: Duration, sources: &[&str]) -> Self {
        Self {
            name: name.into(),
            ttl_ms: ttl.as_millis() as u64,
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Key under which this type's entry lives in the cache store.
    pub fn cache_key(&self) -> &str {
        &self.name
    }
}

/// Weights of the freshness heuristic.
///
/// The defaults make an explicit version number outweigh recency, and recency
/// outweigh mere record completeness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessWeights {
    pub version_weight: f64,
    /// Recency term of the source with the newest data in a pass. Older
    /// sources decay towards zero; kept below `version_weight`.
    pub recency_weight: f64,
    pub completeness_weight: f64,
    /// Lag behind the newest sampled source at which the recency term halves.
    pub timestamp_scale_secs: f64,
    /// Number of records requested from each source when scoring.
    pub sample_size: usize,
    /// Fields inspected (first match wins) for an update timestamp.
    pub updated_at_fields: Vec<String>,
    /// Fields inspected (first match wins) for a version number.
    pub version_fields: Vec<String>,
}

impl Default for FreshnessWeights {
    fn default() -> Self {
        Self {
            version_weight: 1000.0,
            recency_weight: 500.0,
            completeness_weight: 10.0,
            timestamp_scale_secs: 3600.0,
            sample_size: 5,
            updated_at_fields: vec![
                "updated_at".into(),
                "updatedAt".into(),
                "last_updated".into(),
                "lastUpdated".into(),
            ],
            version_fields: vec!["version".into(), "data_version".into()],
        }
    }
}

/// Intervals of the periodic refresher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub update_interval_secs: u64,
    pub rescore_interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 15 * 60,
            rescore_interval_secs: 6 * 60 * 60,
        }
    }
}

impl RefreshConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn rescore_interval(&self) -> Duration {
        Duration::from_secs(self.rescore_interval_secs)
    }
}

/// The static table the aggregator is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub sources: Vec<SourceDef>,
    pub data_types: Vec<DataTypeDef>,
    #[serde(default)]
    pub freshness: FreshnessWeights,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl AggregatorConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Invalid JSON in config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in table for the Dokkan Battle data sources.
    pub fn default_seed() -> Self {
        let hour = Duration::from_secs(60 * 60);
        Self {
            sources: vec![
                SourceDef::new("fandom", Duration::from_millis(1500))
                    .with_endpoint("https://dbz-dokkanbattle.fandom.com/api/{data_type}.json")
                    .with_records_pointer("/items"),
                SourceDef::new("dokkanInfo", Duration::from_millis(1000))
                    .with_endpoint("https://dokkaninfo.com/api/{data_type}"),
                SourceDef::new("dokkanGlobal", Duration::from_millis(2000))
                    .with_endpoint("https://dokkan.global/api/{data_type}")
                    .with_records_pointer("/data"),
            ],
            data_types: vec![
                DataTypeDef::new("cards", hour * 6, &["dokkanInfo", "fandom", "dokkanGlobal"]),
                DataTypeDef::new("events", hour, &["dokkanGlobal", "dokkanInfo", "fandom"]),
                DataTypeDef::new("items", hour * 12, &["dokkanInfo", "fandom"]),
                DataTypeDef::new("categories", hour * 24, &["fandom", "dokkanInfo"]),
                DataTypeDef::new("links", hour * 24, &["fandom", "dokkanInfo"]),
            ],
            freshness: FreshnessWeights::default(),
            refresh: RefreshConfig::default(),
        }
    }

    pub fn source(&self, id: &str) -> Option<&SourceDef> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Check internal consistency: unique ids, known sources, positive TTLs, safe keys.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(AppError::ConfigError("Source id must not be empty".into()));
            }
            if !source_ids.insert(source.id.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "Duplicate source id '{}'",
                    source.id
                )));
            }
        }

        let mut type_names = HashSet::new();
        for data_type in &self.data_types {
            validate_data_type(data_type, &source_ids)?;
            if !type_names.insert(data_type.name.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "Duplicate data type '{}'",
                    data_type.name
                )));
            }
        }

        let freshness = &self.freshness;
        if !(0.0..freshness.version_weight).contains(&freshness.recency_weight) {
            return Err(AppError::ConfigError(
                "freshness.recency_weight must be non-negative and below version_weight".into(),
            ));
        }
        if freshness.timestamp_scale_secs <= 0.0 {
            return Err(AppError::ConfigError(
                "freshness.timestamp_scale_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::default_seed()
    }
}

/// Validate a single data type definition against the known source ids.
pub(crate) fn validate_data_type(
    data_type: &DataTypeDef,
    known_sources: &HashSet<&str>,
) -> Result<(), AppError> {
    if !is_valid_key(&data_type.name) {
        return Err(AppError::ConfigError(format!(
            "Invalid data type name '{}': use letters, digits, '_' or '-'",
            data_type.name
        )));
    }
    if data_type.ttl_ms == 0 {
        return Err(AppError::ConfigError(format!(
            "Data type '{}' must have a positive ttl_ms",
            data_type.name
        )));
    }
    if data_type.sources.is_empty() {
        return Err(AppError::ConfigError(format!(
            "Data type '{}' has no sources",
            data_type.name
        )));
    }
    for source in &data_type.sources {
        if !known_sources.contains(source.as_str()) {
            return Err(AppError::ConfigError(format!(
                "Data type '{}' references unknown source '{source}'",
                data_type.name
            )));
        }
    }
    Ok(())
}

/// Cache keys double as file names, so they are restricted to a safe alphabet.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
