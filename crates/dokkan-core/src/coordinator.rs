use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{AggregatorConfig, DataTypeDef, validate_data_type};
use crate::error::AppError;
use crate::freshness::{FreshnessScorer, SourceScore};
use crate::models::{CacheEntry, Refreshed, SourceId, TypeResult, UpdateReport};
use crate::orchestrator::Orchestrator;
use crate::parser::{ParserRegistry, ParserSummary};
use crate::traits::{CacheStore, SourceAdapter};

/// Introspection view of one registered data type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataTypeInfo {
    pub name: String,
    pub ttl_ms: u64,
    /// Current fallback order.
    pub priority: Vec<SourceId>,
    pub configured: Vec<SourceId>,
    pub parser: ParserSummary,
}

/// Cache-aware entry point of the aggregator.
///
/// Serves fresh cache entries directly and otherwise refreshes through the
/// [`Orchestrator`], persisting the result. Concurrent refreshes of one data
/// type are collapsed: the first caller fetches, later callers wait for it
/// and are then served from the cache.
///
/// Generic over the source adapter and the cache store, so tests can run the
/// whole pipeline without network or disk.
pub struct Coordinator<A, S>
where
    A: SourceAdapter,
    S: CacheStore,
{
    orchestrator: Orchestrator<A>,
    store: S,
    scorer: FreshnessScorer,
    types: RwLock<HashMap<String, DataTypeDef>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<A, S> Coordinator<A, S>
where
    A: SourceAdapter,
    S: CacheStore,
{
    /// Build a coordinator from a validated config with the built-in parsers.
    pub fn from_config(config: &AggregatorConfig, adapter: A, store: S) -> Result<Self, AppError> {
        Self::with_parsers(config, adapter, store, Arc::new(ParserRegistry::with_builtin()))
    }

    pub fn with_parsers(
        config: &AggregatorConfig,
        adapter: A,
        store: S,
        parsers: Arc<ParserRegistry>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let orchestrator = Orchestrator::new(adapter, parsers, config.sources.clone());
        let mut types = HashMap::new();
        for def in &config.data_types {
            orchestrator.register_type(&def.name, def.sources.clone())?;
            types.insert(def.name.clone(), def.clone());
        }
        tracing::info!(
            sources = config.sources.len(),
            data_types = types.len(),
            "Coordinator ready"
        );
        Ok(Self {
            orchestrator,
            store,
            scorer: FreshnessScorer::new(config.freshness.clone()),
            types: RwLock::new(types),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator<A> {
        &self.orchestrator
    }

    pub fn parsers(&self) -> &Arc<ParserRegistry> {
        self.orchestrator.parsers()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn definition(&self, data_type: &str) -> Result<DataTypeDef, AppError> {
        let types = self.types.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned data type lock");
            poisoned.into_inner()
        });
        types
            .get(data_type)
            .cloned()
            .ok_or_else(|| AppError::ConfigError(format!("Unknown data type '{data_type}'")))
    }

    /// Registered data type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let types = self.types.read().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every registered type with its TTL, priority and parser.
    pub fn data_types(&self) -> Vec<DataTypeInfo> {
        let mut defs: Vec<DataTypeDef> = {
            let types = self.types.read().unwrap_or_else(|p| p.into_inner());
            types.values().cloned().collect()
        };
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs.into_iter()
            .map(|def| DataTypeInfo {
                priority: self.orchestrator.priority(&def.name).unwrap_or_default(),
                configured: self
                    .orchestrator
                    .configured_sources(&def.name)
                    .unwrap_or_default(),
                parser: self.parsers().get_parser(&def.name).summary(),
                ttl_ms: def.ttl_ms,
                name: def.name,
            })
            .collect()
    }

    fn flight_lock(&self, data_type: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned in-flight lock");
            poisoned.into_inner()
        });
        in_flight
            .entry(data_type.to_string())
            .or_default()
            .clone()
    }

    /// The stored entry of a type. An entry that no longer deserializes is
    /// treated as absent.
    async fn read_entry(&self, def: &DataTypeDef) -> Result<Option<CacheEntry>, AppError> {
        let Some(value) = self.store.get(def.cache_key()).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<CacheEntry>(value) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(
                    data_type = %def.name,
                    error = %e,
                    "Discarding unreadable cache entry"
                );
                Ok(None)
            }
        }
    }

    fn fresh_hit(def: &DataTypeDef, entry: &Option<CacheEntry>) -> Option<Refreshed> {
        let entry = entry.as_ref()?;
        if !entry.is_fresh(def.ttl(), Utc::now()) {
            return None;
        }
        tracing::debug!(data_type = %def.name, source = %entry.source, "Cache hit");
        Some(Refreshed {
            data: entry.data.clone(),
            from_cache: true,
            source: Some(entry.source.clone()),
            fetched_at: Some(entry.timestamp),
            changed: false,
            stale: false,
        })
    }

    /// Serve `data_type` from the cache while fresh, otherwise fetch the best
    /// available data and cache it.
    ///
    /// A cached entry is returned as-is, without re-parsing. Nothing is
    /// written when every source fails.
    pub async fn get_or_refresh(&self, data_type: &str) -> Result<Refreshed, AppError> {
        let def = self.definition(data_type)?;

        let cached = self.read_entry(&def).await?;
        if let Some(hit) = Self::fresh_hit(&def, &cached) {
            return Ok(hit);
        }

        let flight = self.flight_lock(data_type);
        let _guard = flight.lock().await;

        // Another caller may have refreshed while this one waited.
        let cached = self.read_entry(&def).await?;
        if let Some(hit) = Self::fresh_hit(&def, &cached) {
            return Ok(hit);
        }

        let outcome = self.orchestrator.fetch_best(data_type).await?;
        let entry = CacheEntry::from_outcome(outcome);
        let changed = cached
            .as_ref()
            .is_none_or(|previous| previous.data_hash != entry.data_hash);

        self.store
            .put(def.cache_key(), &serde_json::to_value(&entry)?)
            .await?;

        if changed {
            tracing::info!(
                data_type = %data_type,
                source = %entry.source,
                count = entry.data.len(),
                hash = %&entry.data_hash[..8],
                "Data changed, cache updated"
            );
        } else {
            tracing::info!(
                data_type = %data_type,
                source = %entry.source,
                count = entry.data.len(),
                "Data unchanged, cache timestamp renewed"
            );
        }

        Ok(Refreshed {
            data: entry.data,
            from_cache: false,
            source: Some(entry.source),
            fetched_at: Some(entry.timestamp),
            changed,
            stale: false,
        })
    }

    /// Like [`get_or_refresh`](Self::get_or_refresh), but when every source
    /// fails an expired cache entry is served with `stale` set instead.
    pub async fn get_or_stale(&self, data_type: &str) -> Result<Refreshed, AppError> {
        match self.get_or_refresh(data_type).await {
            Err(e @ AppError::SourcesExhausted { .. }) => {
                let def = self.definition(data_type)?;
                match self.read_entry(&def).await? {
                    Some(entry) => {
                        tracing::warn!(
                            data_type = %data_type,
                            cached_at = %entry.timestamp,
                            error = %e,
                            "Sources exhausted, serving stale cache entry"
                        );
                        Ok(Refreshed {
                            data: entry.data,
                            from_cache: true,
                            source: Some(entry.source),
                            fetched_at: Some(entry.timestamp),
                            changed: false,
                            stale: true,
                        })
                    }
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    /// Refresh every registered type (or just `types`), one after another.
    pub async fn update_all(&self, types: Option<&[String]>) -> UpdateReport {
        self.update_all_until(types, &CancellationToken::new())
            .await
    }

    /// [`update_all`](Self::update_all) that stops starting new types once
    /// `cancel` fires. Types not reached are reported as cancelled; entries
    /// already written stay valid.
    pub async fn update_all_until(
        &self,
        types: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> UpdateReport {
        let names = match types {
            Some(types) => types.to_vec(),
            None => self.type_names(),
        };

        let mut report = UpdateReport {
            success: true,
            results: BTreeMap::new(),
        };
        for name in names {
            let outcome = if cancel.is_cancelled() {
                Err(AppError::Cancelled)
            } else {
                self.get_or_refresh(&name).await
            };
            let result = match outcome {
                Ok(refreshed) => TypeResult::Refreshed {
                    count: refreshed.data.len(),
                    from_cache: refreshed.from_cache,
                    source: refreshed.source,
                },
                Err(e) => {
                    if !matches!(e, AppError::Cancelled) {
                        tracing::error!(data_type = %name, error = %e, "Update failed");
                    }
                    report.success = false;
                    TypeResult::Failed {
                        error: e.to_string(),
                        kind: e.kind().to_string(),
                    }
                }
            };
            report.results.insert(name, result);
        }

        let failed = report.results.values().filter(|r| !r.is_ok()).count();
        tracing::info!(
            types = report.results.len(),
            failed,
            success = report.success,
            "Update pass finished"
        );
        report
    }

    /// Wipe every cached entry.
    pub async fn clear_cache(&self) -> Result<(), AppError> {
        self.store.clear_all().await?;
        tracing::info!("Cache cleared");
        Ok(())
    }

    /// Re-sample and reorder the sources of one type, or of all types.
    pub async fn rescore_and_reorder(
        &self,
        data_type: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<SourceScore>>, AppError> {
        self.rescore_until(data_type, &CancellationToken::new())
            .await
    }

    pub async fn rescore_until(
        &self,
        data_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Vec<SourceScore>>, AppError> {
        let names = match data_type {
            Some(name) => vec![self.definition(name)?.name],
            None => self.type_names(),
        };

        let mut results = BTreeMap::new();
        for name in names {
            let scores = self
                .scorer
                .rescore(&self.orchestrator, &name, cancel)
                .await?;
            results.insert(name, scores);
        }
        Ok(results)
    }

    /// Register a data type at runtime and learn its parser from a sample.
    ///
    /// The sample comes from the first of `def.sources` that returns records.
    /// Nothing is registered when sampling fails. An existing type of the
    /// same name is replaced, parser included.
    pub async fn discover_type(
        &self,
        def: DataTypeDef,
        sample_size: usize,
    ) -> Result<ParserSummary, AppError> {
        let known: HashSet<&str> = self.orchestrator.source_ids().collect();
        validate_data_type(&def, &known)?;
        if sample_size == 0 {
            return Err(AppError::ConfigError(
                "Sample size must be at least 1".into(),
            ));
        }

        let (source, samples) = self
            .orchestrator
            .first_sample(&def.name, &def.sources, sample_size)
            .await?;

        let parser = self.parsers().learn_parser(&def.name, &samples);
        self.orchestrator
            .register_type(&def.name, def.sources.clone())?;
        tracing::info!(
            data_type = %def.name,
            source = %source,
            samples = samples.len(),
            "Data type discovered"
        );
        {
            let mut types = self.types.write().unwrap_or_else(|poisoned| {
                tracing::warn!("Recovered from poisoned data type lock");
                poisoned.into_inner()
            });
            types.insert(def.name.clone(), def);
        }
        Ok(parser.summary())
    }
}
