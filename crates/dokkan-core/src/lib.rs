pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod refresher;
pub mod throttle;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{AggregatorConfig, DataTypeDef, FreshnessWeights, RefreshConfig, SourceDef};
pub use coordinator::{Coordinator, DataTypeInfo};
pub use error::AppError;
pub use freshness::{FreshnessScorer, SampleSignals, SourceScore};
pub use models::{
    CacheEntry, FetchOutcome, FetchParams, FieldKind, FieldValue, NormalizedRecord, RawRecord,
    Refreshed, SourceId, TypeResult, UpdateReport, compute_hash, payload_hash,
};
pub use orchestrator::Orchestrator;
pub use parser::{Parser, ParserRegistry, ParserSummary, Transform};
pub use refresher::{RefreshEvent, RefreshReporter, Refresher, TracingRefreshReporter};
pub use traits::{CacheStore, NullCache, SourceAdapter};
