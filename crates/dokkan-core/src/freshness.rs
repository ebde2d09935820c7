//! Freshness scoring and priority reordering.
//!
//! Every configured source of a data type is sampled and scored. Higher
//! scores mean fresher data:
//!
//! ```text
//! score = avg(version)     * version_weight
//!       + recency_weight   * scale / (scale + lag)
//!       + avg(field count) * completeness_weight
//! ```
//!
//! `lag` is how far the sample's average update time trails the newest
//! source sampled in the same pass, so the recency term lies in
//! `[0, recency_weight]` and a sample without timestamps scores zero on it.
//! With `recency_weight` below `version_weight`, one version step outweighs
//! any recency gap, and a gap of hours outweighs a few extra fields.
//!
//! Averages are taken over the records carrying the signal; a signal absent
//! from every record contributes zero. A source whose sample fails scores
//! [`FAILED_SCORE`] and is dropped from the reordered list. If every source
//! fails, the existing priority list is kept.

use std::cmp::Ordering;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::FreshnessWeights;
use crate::error::AppError;
use crate::models::{RawRecord, SourceId};
use crate::orchestrator::Orchestrator;
use crate::parser::parse_date;
use crate::traits::SourceAdapter;

/// Score recorded for a source whose sample could not be fetched.
pub const FAILED_SCORE: f64 = -1.0;

/// Epoch numbers above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Score of one source in one rescoring pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceScore {
    pub source: SourceId,
    pub score: f64,
    /// Sample size actually scored.
    pub sampled: usize,
    /// Why the source was excluded, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceScore {
    pub fn is_excluded(&self) -> bool {
        self.error.is_some()
    }
}

/// Freshness signals of one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SampleSignals {
    /// Average update time in epoch seconds, if any record carries one.
    pub updated_at: Option<f64>,
    pub version: f64,
    pub completeness: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FreshnessScorer {
    weights: FreshnessWeights,
}

impl FreshnessScorer {
    pub fn new(weights: FreshnessWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &FreshnessWeights {
        &self.weights
    }

    /// Extract the signals of a sample without scoring it.
    pub fn signals(&self, records: &[RawRecord]) -> SampleSignals {
        let w = &self.weights;
        let timestamps: Vec<f64> = records.iter().filter_map(|r| updated_at_secs(r, w)).collect();
        SampleSignals {
            updated_at: (!timestamps.is_empty()).then(|| average(timestamps.into_iter())),
            version: average(records.iter().filter_map(|r| version(r, w))),
            completeness: average(records.iter().map(|r| field_count(r) as f64)),
        }
    }

    /// Score one sample on its own; its timestamps count as the newest seen.
    /// An empty sample scores zero.
    pub fn score(&self, records: &[RawRecord]) -> f64 {
        let signals = self.signals(records);
        self.score_signals(&signals, signals.updated_at)
    }

    /// Score the samples of one pass against each other. Recency is measured
    /// from the newest average update time among them.
    pub fn score_pass(&self, samples: &[&[RawRecord]]) -> Vec<f64> {
        let signals: Vec<SampleSignals> = samples.iter().map(|s| self.signals(s)).collect();
        let newest = signals
            .iter()
            .filter_map(|s| s.updated_at)
            .reduce(f64::max);
        signals
            .iter()
            .map(|s| self.score_signals(s, newest))
            .collect()
    }

    fn score_signals(&self, signals: &SampleSignals, newest: Option<f64>) -> f64 {
        let w = &self.weights;
        signals.version * w.version_weight
            + self.recency(signals.updated_at, newest)
            + signals.completeness * w.completeness_weight
    }

    fn recency(&self, updated_at: Option<f64>, newest: Option<f64>) -> f64 {
        let (Some(updated_at), Some(newest)) = (updated_at, newest) else {
            return 0.0;
        };
        let scale = self.weights.timestamp_scale_secs;
        let lag = (newest - updated_at).max(0.0);
        self.weights.recency_weight * scale / (scale + lag)
    }

    /// Sample every configured source of `data_type`, score it, and reorder
    /// the type's priority list by descending score.
    ///
    /// Ties keep their current relative order. Sources excluded by an earlier
    /// pass are sampled again and re-enter the list if they recover.
    /// Cancellation is checked before each source; a cancelled pass leaves
    /// the priority list untouched.
    pub async fn rescore<A: SourceAdapter>(
        &self,
        orchestrator: &Orchestrator<A>,
        data_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceScore>, AppError> {
        let configured = orchestrator.configured_sources(data_type).ok_or_else(|| {
            AppError::ConfigError(format!("No sources configured for '{data_type}'"))
        })?;
        let current = orchestrator.priority(data_type).unwrap_or_default();

        // Current order first, so the stable sort breaks ties in its favour.
        let mut candidates: Vec<SourceId> = current
            .iter()
            .filter(|s| configured.contains(s))
            .cloned()
            .collect();
        for source in &configured {
            if !candidates.contains(source) {
                candidates.push(source.clone());
            }
        }

        let mut samples = Vec::with_capacity(candidates.len());
        for source in candidates {
            if cancel.is_cancelled() {
                tracing::info!(data_type = %data_type, "Rescoring cancelled");
                return Err(AppError::Cancelled);
            }
            let limit = self.weights.sample_size;
            let sample = orchestrator.sample(&source, data_type, limit).await;
            if let Err(e) = &sample {
                tracing::warn!(
                    data_type = %data_type,
                    source = %source,
                    error = %e,
                    "Freshness sample failed, excluding source"
                );
            }
            samples.push((source, sample));
        }

        let fetched: Vec<&[RawRecord]> = samples
            .iter()
            .filter_map(|(_, sample)| sample.as_deref().ok())
            .collect();
        let mut pass_scores = self.score_pass(&fetched).into_iter();

        let mut scores = Vec::with_capacity(samples.len());
        for (source, sample) in samples {
            match sample {
                Ok(records) => {
                    let score = pass_scores.next().unwrap_or(FAILED_SCORE);
                    tracing::debug!(
                        data_type = %data_type,
                        source = %source,
                        sampled = records.len(),
                        score,
                        "Scored source"
                    );
                    scores.push(SourceScore {
                        source,
                        score,
                        sampled: records.len(),
                        error: None,
                    });
                }
                Err(e) => scores.push(SourceScore {
                    source,
                    score: FAILED_SCORE,
                    sampled: 0,
                    error: Some(e.to_string()),
                }),
            }
        }

        let mut ranked: Vec<&SourceScore> = scores.iter().filter(|s| !s.is_excluded()).collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        if ranked.is_empty() {
            tracing::warn!(
                data_type = %data_type,
                "Every source failed freshness sampling, keeping current priority"
            );
        } else {
            let priority = ranked.iter().map(|s| s.source.clone()).collect();
            orchestrator.set_priority(data_type, priority)?;
        }

        scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(scores)
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn field_count(record: &RawRecord) -> usize {
    record.values().filter(|v| !v.is_null()).count()
}

/// First recognised update timestamp of a record, in epoch seconds.
fn updated_at_secs(record: &RawRecord, weights: &FreshnessWeights) -> Option<f64> {
    weights
        .updated_at_fields
        .iter()
        .filter_map(|field| record.get(field))
        .find_map(timestamp_secs)
}

fn timestamp_secs(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(epoch_secs),
        serde_json::Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(n) if n.is_finite() => Some(epoch_secs(n)),
                _ => parse_date(s).map(|d| d.timestamp_millis() as f64 / 1000.0),
            }
        }
        _ => None,
    }
}

fn epoch_secs(n: f64) -> f64 {
    if n.abs() > EPOCH_MILLIS_THRESHOLD {
        n / 1000.0
    } else {
        n
    }
}

/// First recognised version number of a record. Accepts `3`, `"3.1"` and `"v3"`.
fn version(record: &RawRecord, weights: &FreshnessWeights) -> Option<f64> {
    weights
        .version_fields
        .iter()
        .filter_map(|field| record.get(field))
        .find_map(|value| match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => {
                let s = s.trim();
                s.strip_prefix(['v', 'V'])
                    .unwrap_or(s)
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
            }
            _ => None,
        })
}
