//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. State lives
//! behind `Arc<Mutex<_>>` so clones handed to the code under test share it
//! with the test's assertions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::models::{FetchParams, RawRecord};
use crate::traits::{CacheStore, SourceAdapter};

/// Build a raw record from a JSON object literal.
pub fn record(value: serde_json::Value) -> RawRecord {
    value.as_object().cloned().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// MockSources
// ---------------------------------------------------------------------------

/// One recorded adapter call.
#[derive(Debug, Clone)]
pub struct SourceCall {
    pub source: String,
    pub data_type: String,
    pub params: FetchParams,
    pub started: Instant,
}

#[derive(Default)]
struct SourcesState {
    /// Scripted responses, consumed in order per source.
    scripted: HashMap<String, VecDeque<Result<Vec<RawRecord>, AppError>>>,
    /// Persistent responses per (source, data type).
    by_type: HashMap<(String, String), Vec<RawRecord>>,
    /// Persistent responses per source.
    by_source: HashMap<String, Vec<RawRecord>>,
    /// Sources that always fail with the given message.
    failing: HashMap<String, String>,
    fallback: Option<Vec<RawRecord>>,
    calls: Vec<SourceCall>,
    delay: Duration,
}

/// Scriptable [`SourceAdapter`].
///
/// Lookup order per call: scripted queue, always-fail, per-type records,
/// per-source records, fallback records, then an empty result.
#[derive(Clone, Default)]
pub struct MockSources {
    state: Arc<Mutex<SourcesState>>,
}

impl MockSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for `source`.
    pub fn respond(self, source: &str, response: Result<Vec<RawRecord>, AppError>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(source.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn records_for(self, source: &str, data_type: &str, records: Vec<RawRecord>) -> Self {
        self.state
            .lock()
            .unwrap()
            .by_type
            .insert((source.to_string(), data_type.to_string()), records);
        self
    }

    pub fn source_records(self, source: &str, records: Vec<RawRecord>) -> Self {
        self.state
            .lock()
            .unwrap()
            .by_source
            .insert(source.to_string(), records);
        self
    }

    pub fn always_fail(self, source: &str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(source.to_string(), message.to_string());
        self
    }

    /// Records returned by any source with nothing more specific configured.
    pub fn default_records(self, records: Vec<RawRecord>) -> Self {
        self.state.lock().unwrap().fallback = Some(records);
        self
    }

    /// Simulated request latency.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().delay = delay;
        self
    }

    pub fn calls(&self, source: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.source == source)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn calls_for_type(&self, data_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.data_type == data_type)
            .count()
    }

    pub fn call_times(&self, source: &str) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.source == source)
            .map(|c| c.started)
            .collect()
    }

    pub fn last_params(&self, source: &str) -> Option<FetchParams> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .rev()
            .find(|c| c.source == source)
            .map(|c| c.params.clone())
    }

    fn respond_to(&self, source: &str, data_type: &str) -> Result<Vec<RawRecord>, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(response) = state
            .scripted
            .get_mut(source)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        if let Some(message) = state.failing.get(source) {
            return Err(AppError::SourceError {
                source_id: source.to_string(),
                message: message.clone(),
            });
        }
        if let Some(records) = state
            .by_type
            .get(&(source.to_string(), data_type.to_string()))
        {
            return Ok(records.clone());
        }
        if let Some(records) = state.by_source.get(source) {
            return Ok(records.clone());
        }
        Ok(state.fallback.clone().unwrap_or_default())
    }
}

impl SourceAdapter for MockSources {
    async fn fetch(
        &self,
        source: &str,
        data_type: &str,
        params: &FetchParams,
    ) -> Result<Vec<RawRecord>, AppError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(SourceCall {
                source: source.to_string(),
                data_type: data_type.to_string(),
                params: params.clone(),
                started: Instant::now(),
            });
            state.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.respond_to(source, data_type)
    }
}

// ---------------------------------------------------------------------------
// MockCache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, serde_json::Value>,
    failing_puts: HashSet<String>,
    failing_gets: HashSet<String>,
    fail_clear: bool,
    puts: usize,
    gets: usize,
}

/// In-memory [`CacheStore`] with injectable failures.
#[derive(Clone, Default)]
pub struct MockCache {
    state: Arc<Mutex<CacheState>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `put` to `key` fails with a cache error.
    pub fn fail_puts_for(self, key: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_puts
            .insert(key.to_string());
        self
    }

    /// Every `get` of `key` fails with a cache error.
    pub fn fail_gets_for(self, key: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_gets
            .insert(key.to_string());
        self
    }

    pub fn fail_clear(self) -> Self {
        self.state.lock().unwrap().fail_clear = true;
        self
    }

    /// Store a value directly, bypassing failure injection and counters.
    pub fn seed(&self, key: &str, value: serde_json::Value) {
        self.state
            .lock()
            .unwrap()
            .entries
            .insert(key.to_string(), value);
    }

    pub fn entry(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn puts(&self) -> usize {
        self.state.lock().unwrap().puts
    }

    pub fn gets(&self) -> usize {
        self.state.lock().unwrap().gets
    }
}

impl CacheStore for MockCache {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.puts += 1;
        if state.failing_puts.contains(key) {
            return Err(AppError::CacheError(format!("disk full writing '{key}'")));
        }
        state.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.gets += 1;
        if state.failing_gets.contains(key) {
            return Err(AppError::CacheError(format!("cannot read '{key}'")));
        }
        Ok(state.entries.get(key).cloned())
    }

    async fn clear_all(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_clear {
            return Err(AppError::CacheError("permission denied".into()));
        }
        state.entries.clear();
        Ok(())
    }
}
