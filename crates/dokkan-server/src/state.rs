use std::sync::Arc;

use chrono::{DateTime, Utc};
use dokkan_client::HttpSources;
use dokkan_core::Coordinator;
use dokkan_store::FileCacheStore;

pub type AppCoordinator = Coordinator<HttpSources, FileCacheStore>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub coordinator: Arc<AppCoordinator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<AppCoordinator>) -> Self {
        Self {
            coordinator,
            started_at: Utc::now(),
        }
    }
}
