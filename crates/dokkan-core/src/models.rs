use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of an upstream source (e.g. `"fandom"`, `"dokkanInfo"`).
pub type SourceId = String;

/// One raw record as delivered by a source adapter, before normalization.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// The kind of value a field is expected to hold.
///
/// Drives both the default inserted for a missing required field and the
/// coercion applied by learned parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Number,
    Boolean,
    Date,
    List,
    Map,
    Text,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::List => "list",
            FieldKind::Map => "map",
            FieldKind::Text => "text",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed field value with an explicit type tag.
///
/// Persisted as `{"type": "...", "value": ...}` so that a cache round-trip
/// restores exactly the same variant (a date stays a date, not a string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(DateTime<Utc>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Convert raw JSON into a typed value without any coercion.
    ///
    /// Strings stay text even when they look like dates; only a parser
    /// transformation turns them into [`FieldValue::Date`].
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(FieldValue::Number)
                .unwrap_or(FieldValue::Null),
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.iter().map(FieldValue::from_json).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as plain JSON for callers that do not care about type tags.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Number(n) => number_to_json(*n),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(FieldValue::to_json).collect())
            }
            FieldValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Human-readable rendering used for text coercion and tabular output.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Date(d) => d.to_rfc3339(),
            FieldValue::List(_) | FieldValue::Map(_) => self.to_json().to_string(),
        }
    }

    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(_) => Some(FieldKind::Boolean),
            FieldValue::Number(_) => Some(FieldKind::Number),
            FieldValue::Text(_) => Some(FieldKind::Text),
            FieldValue::Date(_) => Some(FieldKind::Date),
            FieldValue::List(_) => Some(FieldKind::List),
            FieldValue::Map(_) => Some(FieldKind::Map),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    // Integral values render as integers so `3` does not come back as `3.0`.
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A record after required-field backfill and transformation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(field.into(), value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl From<&RawRecord> for NormalizedRecord {
    fn from(raw: &RawRecord) -> Self {
        Self {
            fields: raw
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect(),
        }
    }
}

impl FromIterator<(String, FieldValue)> for NormalizedRecord {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Parameters passed through to a source adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchParams {
    /// Upper bound on the number of records wanted (used for freshness samples).
    pub limit: Option<usize>,
}

impl FetchParams {
    pub fn sample(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Normalized records from the first source that delivered, with their origin.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub data_type: String,
    pub records: Vec<NormalizedRecord>,
    pub source: SourceId,
    pub fetched_at: DateTime<Utc>,
    /// Hash of the upstream records before normalization.
    pub raw_hash: String,
}

/// The persisted cache record for one data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Vec<NormalizedRecord>,
    pub timestamp: DateTime<Utc>,
    pub source: SourceId,
    /// SHA-256 of the upstream payload the entry was built from, used for
    /// change detection between refreshes. Values backfilled during
    /// normalization do not affect it.
    #[serde(default)]
    pub data_hash: String,
}

impl CacheEntry {
    pub fn new(data: Vec<NormalizedRecord>, timestamp: DateTime<Utc>, source: SourceId) -> Self {
        let data_hash = payload_hash(&data);
        Self {
            data,
            timestamp,
            source,
            data_hash,
        }
    }

    /// Entry for a fetch, keyed for change detection by the upstream payload.
    pub fn from_outcome(outcome: FetchOutcome) -> Self {
        Self {
            data: outcome.records,
            timestamp: outcome.fetched_at,
            source: outcome.source,
            data_hash: outcome.raw_hash,
        }
    }

    /// An entry is fresh iff `now - timestamp < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.timestamp) < ttl
    }
}

/// Result of a cache-aware read for one data type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Refreshed {
    pub data: Vec<NormalizedRecord>,
    pub from_cache: bool,
    pub source: Option<SourceId>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// True when a fresh fetch produced a payload different from the previous entry.
    pub changed: bool,
    /// True when an expired entry was served because every source failed.
    pub stale: bool,
}

/// Per-type outcome inside an [`UpdateReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypeResult {
    Refreshed {
        count: usize,
        from_cache: bool,
        source: Option<SourceId>,
    },
    Failed {
        error: String,
        kind: String,
    },
}

impl TypeResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, TypeResult::Refreshed { .. })
    }
}

/// Summary of a batch refresh across data types.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateReport {
    /// True iff every requested type refreshed (or was served from cache) successfully.
    pub success: bool,
    pub results: BTreeMap<String, TypeResult>,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of a record payload, stable across cache round-trips.
pub fn payload_hash<T: Serialize>(records: &[T]) -> String {
    let rendered = serde_json::to_string(records).unwrap_or_default();
    compute_hash(&rendered)
}
