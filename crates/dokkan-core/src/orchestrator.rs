use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;

use crate::config::SourceDef;
use crate::error::AppError;
use crate::models::{FetchOutcome, FetchParams, RawRecord, SourceId, payload_hash};
use crate::parser::ParserRegistry;
use crate::throttle::RateLimiter;
use crate::traits::SourceAdapter;

/// Source order of one data type.
#[derive(Debug, Clone, Default)]
struct SourceLists {
    /// Every source configured for the type, in configuration order.
    configured: Vec<SourceId>,
    /// Current fallback order; rewritten by the freshness scorer.
    priority: Vec<SourceId>,
}

/// Walks a data type's sources in priority order and returns the first
/// non-empty result, parsed.
///
/// Sources are tried strictly one after another, never concurrently, and
/// every request goes through the per-source [`RateLimiter`]. The
/// orchestrator owns the priority lists and the rate-limit state.
pub struct Orchestrator<A: SourceAdapter> {
    adapter: A,
    parsers: Arc<ParserRegistry>,
    sources: HashMap<SourceId, SourceDef>,
    lists: RwLock<HashMap<String, SourceLists>>,
    limiter: RateLimiter,
}

impl<A: SourceAdapter> Orchestrator<A> {
    pub fn new(adapter: A, parsers: Arc<ParserRegistry>, sources: Vec<SourceDef>) -> Self {
        Self {
            adapter,
            parsers,
            sources: sources.into_iter().map(|s| (s.id.clone(), s)).collect(),
            lists: RwLock::new(HashMap::new()),
            limiter: RateLimiter::new(),
        }
    }

    fn read_lists(&self) -> RwLockReadGuard<'_, HashMap<String, SourceLists>> {
        self.lists.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned priority list lock");
            poisoned.into_inner()
        })
    }

    fn write_lists(&self) -> RwLockWriteGuard<'_, HashMap<String, SourceLists>> {
        self.lists.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned priority list lock");
            poisoned.into_inner()
        })
    }

    pub fn parsers(&self) -> &Arc<ParserRegistry> {
        &self.parsers
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn knows_source(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Minimum delay between requests to `source`; zero for unknown sources.
    pub fn rate_limit(&self, source: &str) -> Duration {
        self.sources
            .get(source)
            .map(SourceDef::rate_limit)
            .unwrap_or_default()
    }

    /// Define (or redefine) the sources of a data type. The priority list
    /// starts out in configuration order.
    pub fn register_type(&self, data_type: &str, sources: Vec<SourceId>) -> Result<(), AppError> {
        if let Some(unknown) = sources.iter().find(|s| !self.knows_source(s)) {
            return Err(AppError::ConfigError(format!(
                "Data type '{data_type}' references unknown source '{unknown}'"
            )));
        }
        self.write_lists().insert(
            data_type.to_string(),
            SourceLists {
                priority: sources.clone(),
                configured: sources,
            },
        );
        Ok(())
    }

    pub fn priority(&self, data_type: &str) -> Option<Vec<SourceId>> {
        self.read_lists().get(data_type).map(|l| l.priority.clone())
    }

    pub fn configured_sources(&self, data_type: &str) -> Option<Vec<SourceId>> {
        self.read_lists().get(data_type).map(|l| l.configured.clone())
    }

    /// Replace the priority list of a type. Every entry must be one of the
    /// type's configured sources.
    pub fn set_priority(&self, data_type: &str, priority: Vec<SourceId>) -> Result<(), AppError> {
        let mut lists = self.write_lists();
        let entry = lists.get_mut(data_type).ok_or_else(|| {
            AppError::ConfigError(format!("No sources configured for '{data_type}'"))
        })?;
        if let Some(stray) = priority.iter().find(|s| !entry.configured.contains(s)) {
            return Err(AppError::ConfigError(format!(
                "Source '{stray}' is not configured for '{data_type}'"
            )));
        }
        tracing::info!(
            data_type = %data_type,
            old = ?entry.priority,
            new = ?priority,
            "Source priority updated"
        );
        entry.priority = priority;
        Ok(())
    }

    /// One rate-limited request to one source, unparsed.
    pub async fn fetch_raw(
        &self,
        source: &str,
        data_type: &str,
        params: &FetchParams,
    ) -> Result<Vec<RawRecord>, AppError> {
        let interval = self.rate_limit(source);
        self.limiter
            .run(source, interval, || {
                self.adapter.fetch(source, data_type, params)
            })
            .await
    }

    /// Fetch a sample of at most `limit` raw records from one source.
    pub async fn sample(
        &self,
        source: &str,
        data_type: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, AppError> {
        let mut records = self
            .fetch_raw(source, data_type, &FetchParams::sample(limit))
            .await?;
        records.truncate(limit);
        Ok(records)
    }

    /// Walk `sources` in order and return the first non-empty raw sample.
    pub async fn first_sample(
        &self,
        data_type: &str,
        sources: &[SourceId],
        limit: usize,
    ) -> Result<(SourceId, Vec<RawRecord>), AppError> {
        let mut last_error = None;
        for source in sources {
            match self.sample(source, data_type, limit).await {
                Ok(records) if records.is_empty() => {
                    tracing::warn!(data_type = %data_type, source = %source, "Sample was empty");
                }
                Ok(records) => return Ok((source.clone(), records)),
                Err(e) => {
                    tracing::warn!(data_type = %data_type, source = %source, error = %e, "Sample failed");
                    last_error = Some(Box::new(e));
                }
            }
        }
        Err(AppError::SourcesExhausted {
            data_type: data_type.to_string(),
            last_error,
        })
    }

    /// Best available normalized data for `data_type`.
    pub async fn fetch_best(&self, data_type: &str) -> Result<FetchOutcome, AppError> {
        self.fetch_best_with(data_type, &FetchParams::default())
            .await
    }

    /// Try each source of `data_type` in priority order. The first source that
    /// returns a non-empty result wins; later sources are not contacted.
    /// Errors and empty results fall through to the next source.
    pub async fn fetch_best_with(
        &self,
        data_type: &str,
        params: &FetchParams,
    ) -> Result<FetchOutcome, AppError> {
        let sources = self
            .priority(data_type)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| {
                AppError::ConfigError(format!("No source priority list for '{data_type}'"))
            })?;

        let mut last_error = None;
        for source in &sources {
            match self.fetch_raw(source, data_type, params).await {
                Ok(raw) if raw.is_empty() => {
                    tracing::warn!(
                        data_type = %data_type,
                        source = %source,
                        "Source returned no records, trying next"
                    );
                }
                Ok(raw) => {
                    let records = self.parsers.parse(data_type, &raw, source);
                    tracing::info!(
                        data_type = %data_type,
                        source = %source,
                        count = records.len(),
                        "Fetched records"
                    );
                    return Ok(FetchOutcome {
                        data_type: data_type.to_string(),
                        records,
                        source: source.clone(),
                        fetched_at: Utc::now(),
                        raw_hash: payload_hash(&raw),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        data_type = %data_type,
                        source = %source,
                        error = %e,
                        "Source failed, trying next"
                    );
                    last_error = Some(Box::new(e));
                }
            }
        }

        tracing::error!(data_type = %data_type, tried = sources.len(), "All sources exhausted");
        Err(AppError::SourcesExhausted {
            data_type: data_type.to_string(),
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldKind, FieldValue};
    use crate::parser::Parser;
    use crate::testutil::{MockSources, record};
    use std::time::Instant;

    fn orchestrator(mock: MockSources, sources: &[(&str, u64)]) -> Orchestrator<MockSources> {
        let defs = sources
            .iter()
            .map(|(id, ms)| SourceDef::new(*id, Duration::from_millis(*ms)))
            .collect();
        let registry = Arc::new(ParserRegistry::new());
        registry.register_parser(
            "cards",
            Parser::new()
                .require("name", FieldKind::Text)
                .require("hp", FieldKind::Number),
        );
        let orch = Orchestrator::new(mock, registry, defs);
        let ids = sources.iter().map(|(id, _)| id.to_string()).collect();
        orch.register_type("cards", ids).unwrap();
        orch
    }

    #[tokio::test]
    async fn first_success_wins_and_later_sources_are_not_called() {
        let mock = MockSources::new()
            .respond("fandom", Ok(vec![record(serde_json::json!({"name": "A"}))]))
            .respond("dokkanInfo", Ok(vec![record(serde_json::json!({"name": "B"}))]));
        let orch = orchestrator(mock.clone(), &[("fandom", 0), ("dokkanInfo", 0)]);

        let outcome = orch.fetch_best("cards").await.unwrap();

        assert_eq!(outcome.source, "fandom");
        assert_eq!(outcome.records[0].get("name"), Some(&FieldValue::Text("A".into())));
        assert_eq!(mock.calls("fandom"), 1);
        assert_eq!(mock.calls("dokkanInfo"), 0);
    }

    #[tokio::test]
    async fn falls_back_when_first_source_throws() {
        let mock = MockSources::new()
            .respond("fandom", Err(AppError::HttpError("HTTP 500".into())))
            .respond("dokkanInfo", Ok(vec![record(serde_json::json!({"name": "X"}))]));
        let orch = orchestrator(mock.clone(), &[("fandom", 0), ("dokkanInfo", 0)]);

        let outcome = orch.fetch_best("cards").await.unwrap();

        assert_eq!(outcome.source, "dokkanInfo");
        assert_eq!(outcome.records.len(), 1);
        let card = &outcome.records[0];
        assert_eq!(card.get("name"), Some(&FieldValue::Text("X".into())));
        assert_eq!(card.get("hp"), Some(&FieldValue::Number(0.0)));
        assert_eq!(mock.calls("fandom"), 1);
        assert_eq!(mock.calls("dokkanInfo"), 1);
    }

    #[tokio::test]
    async fn all_empty_sources_exhaust() {
        let mock = MockSources::new()
            .respond("fandom", Ok(vec![]))
            .respond("dokkanInfo", Ok(vec![]));
        let orch = orchestrator(mock, &[("fandom", 0), ("dokkanInfo", 0)]);

        let err = orch.fetch_best("cards").await.unwrap_err();

        match err {
            AppError::SourcesExhausted {
                data_type,
                last_error,
            } => {
                assert_eq!(data_type, "cards");
                assert!(last_error.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn exhaustion_carries_last_error() {
        let mock = MockSources::new()
            .respond("fandom", Err(AppError::Timeout(30)))
            .respond("dokkanInfo", Err(AppError::NetworkError("reset".into())));
        let orch = orchestrator(mock, &[("fandom", 0), ("dokkanInfo", 0)]);

        let err = orch.fetch_best("cards").await.unwrap_err();

        match err {
            AppError::SourcesExhausted {
                last_error: Some(last),
                ..
            } => assert!(matches!(*last, AppError::NetworkError(_))),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_type_is_a_configuration_error() {
        let orch = orchestrator(MockSources::new(), &[("fandom", 0)]);
        let err = orch.fetch_best("banners").await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn consecutive_calls_respect_source_rate_limit() {
        let mock =
            MockSources::new().default_records(vec![record(serde_json::json!({"name": "A"}))]);
        let orch = orchestrator(mock.clone(), &[("fandom", 120)]);

        let start = Instant::now();
        orch.fetch_best("cards").await.unwrap();
        orch.fetch_best("cards").await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(120));
        assert_eq!(mock.calls("fandom"), 2);
    }

    #[tokio::test]
    async fn failed_attempts_still_count_for_rate_limiting() {
        let mock = MockSources::new()
            .respond("fandom", Err(AppError::HttpError("HTTP 503".into())))
            .respond("fandom", Ok(vec![record(serde_json::json!({"name": "A"}))]));
        let orch = orchestrator(mock, &[("fandom", 100)]);

        let start = Instant::now();
        assert!(orch.fetch_best("cards").await.is_err());
        orch.fetch_best("cards").await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn set_priority_rejects_unconfigured_sources() {
        let orch = orchestrator(MockSources::new(), &[("fandom", 0), ("dokkanInfo", 0)]);

        orch.set_priority("cards", vec!["dokkanInfo".into(), "fandom".into()])
            .unwrap();
        assert_eq!(
            orch.priority("cards").unwrap(),
            vec!["dokkanInfo".to_string(), "fandom".to_string()]
        );
        assert_eq!(
            orch.configured_sources("cards").unwrap(),
            vec!["fandom".to_string(), "dokkanInfo".to_string()]
        );

        let err = orch
            .set_priority("cards", vec!["elsewhere".into()])
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn register_type_rejects_unknown_sources() {
        let orch = orchestrator(MockSources::new(), &[("fandom", 0)]);
        let err = orch
            .register_type("events", vec!["nowhere".into()])
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn sample_truncates_to_limit() {
        let records = (0..10)
            .map(|i| record(serde_json::json!({"n": i})))
            .collect();
        let mock = MockSources::new().respond("fandom", Ok(records));
        let orch = orchestrator(mock.clone(), &[("fandom", 0)]);

        let sample = orch.sample("fandom", "cards", 3).await.unwrap();

        assert_eq!(sample.len(), 3);
        assert_eq!(mock.last_params("fandom").unwrap().limit, Some(3));
    }
}
