use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::json;
use tempfile::TempDir;

use dokkan_client::HttpSources;
use dokkan_core::{
    AggregatorConfig, Coordinator, DataTypeDef, FreshnessWeights, RefreshConfig, SourceDef,
};
use dokkan_server::routes;
use dokkan_server::state::AppState;
use dokkan_store::{FileCacheStore, StoreConfig};

/// Upstream request counter shared by the fake sources.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub hits: Hits,
    // Keeps the cache directory alive for the duration of the test.
    pub cache_dir: TempDir,
}

/// Records served by a fake source: `version` distinguishes the two healthy upstreams.
fn records(data_type: &str, version: u32) -> serde_json::Value {
    let items: Vec<_> = (1..=3)
        .map(|i| {
            json!({
                "id": format!("{data_type}-{i}"),
                "name": format!("{data_type} #{i}"),
                "version": version,
                "updated_at": "2024-05-01T00:00:00Z",
            })
        })
        .collect();
    json!({ "data": items })
}

fn upstream(hits: Hits) -> Router {
    Router::new()
        .route(
            "/primary/{data_type}",
            get(|State(hits): State<Hits>, Path(data_type): Path<String>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                axum::Json(records(&data_type, 1))
            }),
        )
        .route(
            "/backup/{data_type}",
            get(|State(hits): State<Hits>, Path(data_type): Path<String>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                axum::Json(records(&data_type, 3))
            }),
        )
        .route(
            "/down/{data_type}",
            get(|State(hits): State<Hits>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }),
        )
        .with_state(hits)
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

fn config(base: &str) -> AggregatorConfig {
    let hour = Duration::from_secs(60 * 60);
    AggregatorConfig {
        sources: vec![
            SourceDef::new("down", Duration::ZERO).with_endpoint(format!("{base}/down/{{data_type}}")),
            SourceDef::new("primary", Duration::ZERO)
                .with_endpoint(format!("{base}/primary/{{data_type}}"))
                .with_records_pointer("/data"),
            SourceDef::new("backup", Duration::ZERO)
                .with_endpoint(format!("{base}/backup/{{data_type}}"))
                .with_records_pointer("/data"),
        ],
        data_types: vec![
            DataTypeDef::new("medals", hour, &["down", "primary", "backup"]),
            DataTypeDef::new("banners", hour, &["primary"]),
            DataTypeDef::new("outages", hour, &["down"]),
        ],
        freshness: FreshnessWeights::default(),
        refresh: RefreshConfig::default(),
    }
}

/// Spin up fake upstream sources and return a router wired to them.
pub async fn setup_test_app() -> TestApp {
    let hits = Hits::default();
    let base = serve(upstream(hits.clone())).await;
    let config = config(&base);

    let cache_dir = TempDir::new().unwrap();
    let sources = HttpSources::new(&config.sources, Duration::from_secs(5)).unwrap();
    let store = FileCacheStore::open(&StoreConfig::new(cache_dir.path()))
        .await
        .unwrap();
    let coordinator = Arc::new(Coordinator::from_config(&config, sources, store).unwrap());

    let state = Arc::new(AppState::new(coordinator));
    TestApp {
        router: routes::router(Arc::clone(&state)),
        state,
        hits,
        cache_dir,
    }
}
