//! Per-type normalization of raw source records.
//!
//! A [`Parser`] pairs a list of required fields (each with a [`FieldKind`]
//! deciding its default) with per-field [`Transform`]s. The
//! [`ParserRegistry`] owns one parser per data type and is the single place
//! where type coercion happens.
//!
//! Parsing is total: missing required fields are backfilled, a failing
//! transformation leaves the original value in place and is logged, and no
//! record is ever dropped or reordered.
//!
//! Types without a registered parser can have one learned from sample
//! records with [`ParserRegistry::learn_parser`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::models::{FieldKind, FieldValue, NormalizedRecord, RawRecord};

/// Share of samples a field must appear in to be learned as required.
const REQUIRED_PRESENCE_NUM: usize = 3;
const REQUIRED_PRESENCE_DEN: usize = 4;

type TransformFn = dyn Fn(&FieldValue) -> Result<FieldValue, String> + Send + Sync;

/// A pure value-to-value function applied to one field.
#[derive(Clone)]
pub enum Transform {
    /// Lenient coercion into a kind. Never fails; unparseable input falls back
    /// to the kind's neutral value (0, now, empty).
    Coerce(FieldKind),
    /// Arbitrary conversion that may reject its input.
    Custom(Arc<TransformFn>),
}

impl Transform {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&FieldValue) -> Result<FieldValue, String> + Send + Sync + 'static,
    {
        Transform::Custom(Arc::new(f))
    }

    /// Apply to the value of `field`. Panics inside custom functions are
    /// reported as errors like any other rejection.
    pub fn apply(&self, field: &str, value: &FieldValue) -> Result<FieldValue, AppError> {
        match self {
            Transform::Coerce(kind) => Ok(coerce(value, *kind)),
            Transform::Custom(f) => match std::panic::catch_unwind(AssertUnwindSafe(|| f(value)))
            {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(message)) => Err(AppError::FieldTransform {
                    field: field.to_string(),
                    message,
                }),
                Err(_) => Err(AppError::FieldTransform {
                    field: field.to_string(),
                    message: "transform panicked".to_string(),
                }),
            },
        }
    }

    /// The kind this transform coerces into, if it is a plain coercion.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Transform::Coerce(kind) => Some(*kind),
            Transform::Custom(_) => None,
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Coerce(kind) => write!(f, "Coerce({kind})"),
            Transform::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A field every normalized record must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredField {
    pub name: String,
    pub kind: FieldKind,
}

/// Required fields plus field-level transformations for one data type.
///
/// The default parser requires nothing and transforms nothing.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    required: Vec<RequiredField>,
    transforms: BTreeMap<String, Transform>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name`; a later call for the same name replaces its kind.
    pub fn require(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        match self.required.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.kind = kind,
            None => self.required.push(RequiredField { name, kind }),
        }
        self
    }

    pub fn transform(mut self, name: impl Into<String>, transform: Transform) -> Self {
        self.transforms.insert(name.into(), transform);
        self
    }

    /// Require `name` and coerce it into `kind`.
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        self.require(name.clone(), kind)
            .transform(name, Transform::Coerce(kind))
    }

    pub fn required(&self) -> &[RequiredField] {
        &self.required
    }

    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(|r| r.name.as_str())
    }

    pub fn transforms(&self) -> &BTreeMap<String, Transform> {
        &self.transforms
    }

    /// Kinds of every field with a plain coercion transform.
    pub fn inferred_kinds(&self) -> BTreeMap<String, FieldKind> {
        self.transforms
            .iter()
            .filter_map(|(name, t)| t.kind().map(|k| (name.clone(), k)))
            .collect()
    }

    pub fn is_default(&self) -> bool {
        self.required.is_empty() && self.transforms.is_empty()
    }

    pub fn summary(&self) -> ParserSummary {
        ParserSummary {
            required: self.required_names().map(str::to_string).collect(),
            kinds: self.inferred_kinds(),
            custom: self
                .transforms
                .iter()
                .filter(|(_, t)| t.kind().is_none())
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    /// Normalize one raw record. Never fails.
    pub fn apply(&self, raw: &RawRecord, data_type: &str, source: &str) -> NormalizedRecord {
        let mut record = NormalizedRecord::from(raw);

        for required in &self.required {
            let absent = matches!(record.get(&required.name), None | Some(FieldValue::Null));
            if absent {
                record.insert(
                    required.name.clone(),
                    default_value(&required.name, required.kind),
                );
            }
        }

        for (field, transform) in &self.transforms {
            let Some(current) = record.get(field) else {
                continue;
            };
            match transform.apply(field, current) {
                Ok(value) => {
                    record.insert(field.clone(), value);
                }
                Err(e) => {
                    tracing::warn!(
                        data_type = %data_type,
                        source = %source,
                        field = %field,
                        error = %e,
                        "Field transform failed, keeping raw value"
                    );
                }
            }
        }

        record
    }
}

/// Serializable description of a parser, for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParserSummary {
    pub required: Vec<String>,
    pub kinds: BTreeMap<String, FieldKind>,
    pub custom: Vec<String>,
}

/// Owns the parser of every data type.
#[derive(Debug, Default)]
pub struct ParserRegistry {
    parsers: RwLock<HashMap<String, Arc<Parser>>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in parsers of the seeded data types.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        for (data_type, parser) in crate::catalog::builtin_parsers() {
            registry.register_parser(data_type, parser);
        }
        registry
    }

    /// The registered parser, or the default parser if none is registered.
    pub fn get_parser(&self, data_type: &str) -> Arc<Parser> {
        let parsers = self.parsers.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned parser registry lock");
            poisoned.into_inner()
        });
        parsers.get(data_type).cloned().unwrap_or_default()
    }

    pub fn has_parser(&self, data_type: &str) -> bool {
        let parsers = self.parsers.read().unwrap_or_else(|p| p.into_inner());
        parsers.contains_key(data_type)
    }

    /// Replace the parser for a type wholesale.
    pub fn register_parser(&self, data_type: impl Into<String>, parser: Parser) {
        let data_type = data_type.into();
        tracing::info!(
            data_type = %data_type,
            required = parser.required().len(),
            transforms = parser.transforms().len(),
            "Registering parser"
        );
        let mut parsers = self.parsers.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned parser registry lock");
            poisoned.into_inner()
        });
        parsers.insert(data_type, Arc::new(parser));
    }

    /// Normalize a batch. Output has the same length and order as the input.
    pub fn parse(&self, data_type: &str, raw: &[RawRecord], source: &str) -> Vec<NormalizedRecord> {
        let parser = self.get_parser(data_type);
        raw.iter()
            .map(|record| parser.apply(record, data_type, source))
            .collect()
    }

    /// Infer a parser from sample records, register it and return it.
    pub fn learn_parser(&self, data_type: &str, samples: &[RawRecord]) -> Arc<Parser> {
        let parser = learn(samples);
        tracing::info!(
            data_type = %data_type,
            samples = samples.len(),
            fields = ?parser.required_names().collect::<Vec<_>>(),
            "Learned parser from samples"
        );
        self.register_parser(data_type, parser);
        self.get_parser(data_type)
    }
}

/// Infer a parser by inspecting the union of field names across `samples`.
///
/// A field is required iff it appears in at least 75% of samples. Its kind
/// comes from the first non-null value seen, in sample order. Fields are
/// visited in first-seen order, so the result is deterministic for a given
/// ordered sample set.
pub fn learn(samples: &[RawRecord]) -> Parser {
    let mut order: Vec<&str> = Vec::new();
    let mut presence: HashMap<&str, usize> = HashMap::new();
    let mut kinds: HashMap<&str, FieldKind> = HashMap::new();

    for sample in samples {
        for (field, value) in sample {
            let count = presence.entry(field.as_str()).or_insert_with(|| {
                order.push(field.as_str());
                0
            });
            *count += 1;
            if !value.is_null() && !kinds.contains_key(field.as_str()) {
                kinds.insert(field.as_str(), infer_kind(value));
            }
        }
    }

    let mut parser = Parser::new();
    for field in order {
        let kind = kinds.get(field).copied().unwrap_or(FieldKind::Text);
        let seen = presence.get(field).copied().unwrap_or(0);
        if seen * REQUIRED_PRESENCE_DEN >= samples.len() * REQUIRED_PRESENCE_NUM {
            parser = parser.require(field, kind);
        }
        parser = parser.transform(field, Transform::Coerce(kind));
    }
    parser
}

/// Kind of a raw value, in priority order number, boolean, date, list, map, text.
pub fn infer_kind(value: &serde_json::Value) -> FieldKind {
    match value {
        serde_json::Value::Number(_) => FieldKind::Number,
        serde_json::Value::Bool(_) => FieldKind::Boolean,
        serde_json::Value::String(s) if parse_date(s).is_some() => FieldKind::Date,
        serde_json::Value::Array(_) => FieldKind::List,
        serde_json::Value::Object(_) => FieldKind::Map,
        _ => FieldKind::Text,
    }
}

/// Lenient coercion of `value` into `kind`.
pub fn coerce(value: &FieldValue, kind: FieldKind) -> FieldValue {
    match kind {
        FieldKind::Number => FieldValue::Number(to_number(value)),
        FieldKind::Boolean => FieldValue::Bool(to_bool(value)),
        FieldKind::Date => FieldValue::Date(to_date(value).unwrap_or_else(Utc::now)),
        FieldKind::List => match value {
            FieldValue::List(_) => value.clone(),
            _ => FieldValue::List(Vec::new()),
        },
        FieldKind::Map => match value {
            FieldValue::Map(_) => value.clone(),
            _ => FieldValue::Map(BTreeMap::new()),
        },
        FieldKind::Text => match value {
            FieldValue::Text(_) => value.clone(),
            other => FieldValue::Text(other.render()),
        },
    }
}

/// Default inserted for a missing required field.
pub fn default_value(field: &str, kind: FieldKind) -> FieldValue {
    match kind {
        FieldKind::Number => FieldValue::Number(0.0),
        FieldKind::Boolean => FieldValue::Bool(false),
        FieldKind::Date => FieldValue::Date(Utc::now()),
        FieldKind::List => FieldValue::List(Vec::new()),
        FieldKind::Map => FieldValue::Map(BTreeMap::new()),
        FieldKind::Text => FieldValue::Text(text_default(field).to_string()),
    }
}

/// Identifiers default to "0", names and titles to "Unknown", anything else to "".
fn text_default(field: &str) -> &'static str {
    let lower = field.to_ascii_lowercase();
    if lower == "id" || lower.ends_with("_id") || field.ends_with("Id") {
        "0"
    } else if lower == "name"
        || lower == "title"
        || lower.ends_with("_name")
        || field.ends_with("Name")
    {
        "Unknown"
    } else {
        ""
    }
}

fn to_number(value: &FieldValue) -> f64 {
    match value {
        FieldValue::Number(n) => *n,
        FieldValue::Bool(b) => f64::from(u8::from(*b)),
        FieldValue::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| *c != ',' && *c != '_')
                .collect();
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .unwrap_or(0.0)
        }
        FieldValue::Date(d) => d.timestamp_millis() as f64,
        FieldValue::Null | FieldValue::List(_) | FieldValue::Map(_) => 0.0,
    }
}

fn to_bool(value: &FieldValue) -> bool {
    match value {
        FieldValue::Bool(b) => *b,
        FieldValue::Number(n) => *n != 0.0,
        FieldValue::Text(s) => {
            let s = s.trim().to_ascii_lowercase();
            !matches!(s.as_str(), "" | "false" | "0" | "no" | "off")
        }
        FieldValue::Null => false,
        FieldValue::Date(_) | FieldValue::List(_) | FieldValue::Map(_) => true,
    }
}

fn to_date(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Date(d) => Some(*d),
        FieldValue::Text(s) => parse_date(s),
        FieldValue::Number(n) => DateTime::from_timestamp_millis(*n as i64),
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
];

/// Parse the date notations upstream sites commonly use. Bare numbers are
/// not treated as dates.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() || s.parse::<f64>().is_ok() {
        return None;
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}
