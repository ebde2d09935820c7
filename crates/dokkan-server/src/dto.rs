use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dokkan_core::freshness::SourceScore;
use dokkan_core::{DataTypeInfo, ParserSummary, Refreshed, TypeResult, UpdateReport};

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct DataQuery {
    /// Serve an expired entry when every source fails.
    pub stale: Option<bool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DataResponse {
    pub data_type: String,
    pub count: usize,
    pub from_cache: bool,
    pub stale: bool,
    pub changed: bool,
    pub source: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Normalized records rendered as plain JSON objects.
    pub data: Vec<serde_json::Value>,
}

impl DataResponse {
    pub fn new(data_type: &str, refreshed: Refreshed) -> Self {
        Self {
            data_type: data_type.to_string(),
            count: refreshed.data.len(),
            from_cache: refreshed.from_cache,
            stale: refreshed.stale,
            changed: refreshed.changed,
            source: refreshed.source,
            fetched_at: refreshed.fetched_at,
            data: refreshed.data.iter().map(|r| r.to_json()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct UpdateQuery {
    /// Comma-separated data types; all registered types when absent.
    pub types: Option<String>,
}

impl UpdateQuery {
    pub fn type_list(&self) -> Option<Vec<String>> {
        self.types.as_ref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TypeOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl From<TypeResult> for TypeOutcome {
    fn from(result: TypeResult) -> Self {
        match result {
            TypeResult::Refreshed {
                count,
                from_cache,
                source,
            } => Self {
                ok: true,
                count: Some(count),
                from_cache: Some(from_cache),
                source,
                error: None,
                kind: None,
            },
            TypeResult::Failed { error, kind } => Self {
                ok: false,
                count: None,
                from_cache: None,
                source: None,
                error: Some(error),
                kind: Some(kind),
            },
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UpdateResponse {
    pub success: bool,
    pub results: BTreeMap<String, TypeOutcome>,
}

impl From<UpdateReport> for UpdateResponse {
    fn from(report: UpdateReport) -> Self {
        Self {
            success: report.success,
            results: report
                .results
                .into_iter()
                .map(|(name, result)| (name, result.into()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rescore
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct RescoreQuery {
    /// Rescore only this data type.
    #[serde(rename = "type")]
    pub data_type: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceScoreResponse {
    pub source: String,
    pub score: f64,
    pub sampled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SourceScore> for SourceScoreResponse {
    fn from(score: SourceScore) -> Self {
        Self {
            source: score.source,
            score: score.score,
            sampled: score.sampled,
            error: score.error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RescoreResponse {
    pub results: BTreeMap<String, Vec<SourceScoreResponse>>,
    /// Priority lists after reordering.
    pub priorities: BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ParserResponse {
    pub required: Vec<String>,
    /// Coerced kind per field (`number`, `boolean`, `date`, `list`, `map`, `text`).
    pub kinds: BTreeMap<String, String>,
    /// Fields with a custom transformation.
    pub custom: Vec<String>,
}

impl From<ParserSummary> for ParserResponse {
    fn from(summary: ParserSummary) -> Self {
        Self {
            required: summary.required,
            kinds: summary
                .kinds
                .into_iter()
                .map(|(field, kind)| (field, kind.to_string()))
                .collect(),
            custom: summary.custom,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DataTypeResponse {
    pub name: String,
    pub ttl_ms: u64,
    pub priority: Vec<String>,
    pub configured: Vec<String>,
    pub parser: ParserResponse,
}

impl From<DataTypeInfo> for DataTypeResponse {
    fn from(info: DataTypeInfo) -> Self {
        Self {
            name: info.name,
            ttl_ms: info.ttl_ms,
            priority: info.priority,
            configured: info.configured,
            parser: info.parser.into(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TypeListResponse {
    pub types: Vec<DataTypeResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DiscoverRequest {
    pub name: String,
    pub ttl_ms: u64,
    /// Source ids in priority order.
    pub sources: Vec<String>,
    /// Records sampled to learn the parser (default 10).
    pub sample_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub data_types: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
