//! Per-source request throttling for polite fetching.
//!
//! Every upstream source has a minimum delay between consecutive requests.
//! [`RateLimiter::run`] waits out the remainder of that delay, runs the
//! request, and stamps the source's last-request time once the request
//! finishes, whatever its outcome.
//!
//! Requests to one source are serialised; requests to different sources
//! never wait on each other. Waiting is a `tokio` sleep, so it suspends only
//! the calling task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Last-request time of one source. The async lock is held for the whole
/// wait-request-stamp sequence.
type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

#[derive(Debug, Default)]
pub struct RateLimiter {
    slots: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, source: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter lock");
            poisoned.into_inner()
        });
        slots
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Time still to wait before `source` may be called again.
    pub fn required_wait(last: Option<Instant>, min_interval: Duration) -> Duration {
        match last {
            Some(last) => min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Run `request` against `source` once `min_interval` has elapsed since
    /// the previous request to it finished.
    pub async fn run<F, Fut, T>(&self, source: &str, min_interval: Duration, request: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.slot(source);
        let mut last = slot.lock().await;

        let wait = Self::required_wait(*last, min_interval);
        if !wait.is_zero() {
            tracing::debug!(
                source = %source,
                wait_ms = %wait.as_millis(),
                "Throttling request"
            );
            tokio::time::sleep(wait).await;
        }

        let output = request().await;
        *last = Some(Instant::now());
        output
    }

    /// When the last request to `source` finished, if there was one.
    pub async fn last_request(&self, source: &str) -> Option<Instant> {
        let slot = self.slot(source);
        let last = slot.lock().await;
        *last
    }
}
