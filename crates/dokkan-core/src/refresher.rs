use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RefreshConfig;
use crate::coordinator::Coordinator;
use crate::error::AppError;
use crate::models::UpdateReport;
use crate::traits::{CacheStore, SourceAdapter};

/// Events emitted by the refresher for monitoring/logging.
#[derive(Debug, Clone)]
pub enum RefreshEvent<'a> {
    Started {
        refresher_id: &'a str,
    },
    UpdateFinished {
        report: &'a UpdateReport,
    },
    RescoreFinished {
        types: usize,
    },
    RescoreFailed {
        error: &'a str,
    },
    Stopped {
        refresher_id: &'a str,
    },
}

/// Receives refresher events (decoupled logging).
pub trait RefreshReporter: Send + Sync {
    fn report(&self, event: RefreshEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRefreshReporter;

impl RefreshReporter for TracingRefreshReporter {
    fn report(&self, event: RefreshEvent<'_>) {
        match event {
            RefreshEvent::Started { refresher_id } => {
                tracing::info!(%refresher_id, "Refresher started");
            }
            RefreshEvent::UpdateFinished { report } => {
                let failed: Vec<&str> = report
                    .results
                    .iter()
                    .filter(|(_, r)| !r.is_ok())
                    .map(|(name, _)| name.as_str())
                    .collect();
                if failed.is_empty() {
                    tracing::info!(types = report.results.len(), "Scheduled update finished");
                } else {
                    tracing::warn!(
                        types = report.results.len(),
                        ?failed,
                        "Scheduled update finished with failures"
                    );
                }
            }
            RefreshEvent::RescoreFinished { types } => {
                tracing::info!(%types, "Scheduled rescore finished");
            }
            RefreshEvent::RescoreFailed { error } => {
                tracing::warn!(%error, "Scheduled rescore failed");
            }
            RefreshEvent::Stopped { refresher_id } => {
                tracing::info!(%refresher_id, "Refresher stopped");
            }
        }
    }
}

/// Background task keeping every data type warm.
///
/// Runs [`Coordinator::update_all_until`] every `update_interval` (first pass
/// immediately) and [`Coordinator::rescore_until`] every `rescore_interval`
/// (first pass after one interval). A zero interval disables that task.
pub struct Refresher<A, S>
where
    A: SourceAdapter,
    S: CacheStore,
{
    coordinator: Arc<Coordinator<A, S>>,
    update_every: Duration,
    rescore_every: Duration,
    id: String,
}

impl<A, S> Refresher<A, S>
where
    A: SourceAdapter,
    S: CacheStore,
{
    pub fn new(coordinator: Arc<Coordinator<A, S>>, config: &RefreshConfig) -> Self {
        Self {
            coordinator,
            update_every: config.update_interval(),
            rescore_every: config.rescore_interval(),
            id: format!("refresher-{}", Uuid::new_v4()),
        }
    }

    /// Override the configured intervals.
    pub fn with_intervals(mut self, update_every: Duration, rescore_every: Duration) -> Self {
        self.update_every = update_every;
        self.rescore_every = rescore_every;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until `cancel_token` fires. A pass in progress stops at its next
    /// per-type checkpoint.
    pub async fn run<R: RefreshReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError> {
        reporter.report(RefreshEvent::Started {
            refresher_id: &self.id,
        });

        let update_every = Some(self.update_every).filter(|d| !d.is_zero());
        let rescore_every = Some(self.rescore_every).filter(|d| !d.is_zero());
        let start = Instant::now();
        let mut next_update = update_every.map(|_| start);
        let mut next_rescore = rescore_every.map(|every| start + every);

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            let now = Instant::now();
            if let (Some(due), Some(every)) = (next_update, update_every)
                && now >= due
            {
                let report = self
                    .coordinator
                    .update_all_until(None, &cancel_token)
                    .await;
                reporter.report(RefreshEvent::UpdateFinished { report: &report });
                next_update = Some(Instant::now() + every);
            }

            if cancel_token.is_cancelled() {
                break;
            }

            if let (Some(due), Some(every)) = (next_rescore, rescore_every)
                && now >= due
            {
                match self.coordinator.rescore_until(None, &cancel_token).await {
                    Ok(scores) => {
                        reporter.report(RefreshEvent::RescoreFinished {
                            types: scores.len(),
                        });
                    }
                    Err(AppError::Cancelled) => break,
                    Err(e) => {
                        let error = e.to_string();
                        reporter.report(RefreshEvent::RescoreFailed { error: &error });
                    }
                }
                next_rescore = Some(Instant::now() + every);
            }

            let wake = match (next_update, next_rescore) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake {
                Some(wake) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(wake) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                None => {
                    cancel_token.cancelled().await;
                    break;
                }
            }
        }

        reporter.report(RefreshEvent::Stopped {
            refresher_id: &self.id,
        });
        Ok(())
    }
}
