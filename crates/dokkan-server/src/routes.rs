use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use chrono::Utc;
use utoipa::OpenApi;

use dokkan_core::{AppError, DataTypeDef};

use crate::dto::{
    DataQuery, DataResponse, DataTypeResponse, DiscoverRequest, ErrorResponse, HealthResponse,
    ParserResponse, RescoreQuery, RescoreResponse, SourceScoreResponse, TypeListResponse, UpdateQuery,
    UpdateResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const DEFAULT_DISCOVERY_SAMPLE: usize = 10;

/// Build the full router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/types", get(list_types))
        .route("/v1/types", post(discover_type))
        .route("/v1/data/{data_type}", get(get_data))
        .route("/v1/update", post(update_all))
        .route("/v1/rescore", post(rescore))
        .route("/v1/cache", delete(clear_cache));

    let public = Router::new()
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/data/{data_type}",
    params(
        ("data_type" = String, Path, description = "Data type name, e.g. cards"),
        DataQuery,
    ),
    responses(
        (status = 200, description = "Normalized records", body = DataResponse),
        (status = 404, description = "Unknown data type", body = ErrorResponse),
        (status = 502, description = "Every source failed", body = ErrorResponse),
    ),
    tag = "data"
)]
pub async fn get_data(
    State(state): State<Arc<AppState>>,
    Path(data_type): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let refreshed = if query.stale.unwrap_or(false) {
        state.coordinator.get_or_stale(&data_type).await?
    } else {
        state.coordinator.get_or_refresh(&data_type).await?
    };
    Ok(axum::Json(DataResponse::new(&data_type, refreshed)))
}

#[utoipa::path(
    post,
    path = "/v1/update",
    params(UpdateQuery),
    responses(
        (status = 200, description = "Per-type refresh results", body = UpdateResponse),
    ),
    tag = "data"
)]
pub async fn update_all(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UpdateQuery>,
) -> impl IntoResponse {
    let types = query.type_list();
    let report = state.coordinator.update_all(types.as_deref()).await;
    axum::Json(UpdateResponse::from(report))
}

#[utoipa::path(
    delete,
    path = "/v1/cache",
    responses(
        (status = 204, description = "Cache cleared"),
        (status = 500, description = "Cache store failure", body = ErrorResponse),
    ),
    tag = "data"
)]
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.coordinator.clear_cache().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/rescore",
    params(RescoreQuery),
    responses(
        (status = 200, description = "Freshness scores and new priorities", body = RescoreResponse),
        (status = 404, description = "Unknown data type", body = ErrorResponse),
    ),
    tag = "sources"
)]
pub async fn rescore(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RescoreQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let scores = state
        .coordinator
        .rescore_and_reorder(query.data_type.as_deref())
        .await?;

    let orchestrator = state.coordinator.orchestrator();
    let priorities: BTreeMap<String, Vec<String>> = scores
        .keys()
        .map(|name| (name.clone(), orchestrator.priority(name).unwrap_or_default()))
        .collect();
    let results = scores
        .into_iter()
        .map(|(name, scores)| {
            let scores: Vec<_> = scores.into_iter().map(SourceScoreResponse::from).collect();
            (name, scores)
        })
        .collect();

    Ok(axum::Json(RescoreResponse {
        results,
        priorities,
    }))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/types",
    responses(
        (status = 200, description = "Registered data types", body = TypeListResponse),
    ),
    tag = "types"
)]
pub async fn list_types(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let types: Vec<DataTypeResponse> = state
        .coordinator
        .data_types()
        .into_iter()
        .map(Into::into)
        .collect();
    let total = types.len();
    axum::Json(TypeListResponse { types, total })
}

#[utoipa::path(
    post,
    path = "/v1/types",
    request_body = DiscoverRequest,
    responses(
        (status = 201, description = "Type registered with a learned parser", body = ParserResponse),
        (status = 400, description = "Invalid definition", body = ErrorResponse),
        (status = 502, description = "No source returned a sample", body = ErrorResponse),
    ),
    tag = "types"
)]
pub async fn discover_type(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<DiscoverRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let def = DataTypeDef {
        name: body.name,
        ttl_ms: body.ttl_ms,
        sources: body.sources,
    };
    let sample_size = body.sample_size.unwrap_or(DEFAULT_DISCOVERY_SAMPLE);

    match state.coordinator.discover_type(def, sample_size).await {
        Ok(summary) => Ok((StatusCode::CREATED, axum::Json(ParserResponse::from(summary)))
            .into_response()),
        // A bad definition is the caller's fault, not a missing resource.
        Err(AppError::ConfigError(message)) => {
            let body = ErrorResponse {
                error: "invalid_definition".to_string(),
                message,
            };
            Ok((StatusCode::BAD_REQUEST, axum::Json(body)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    axum::Json(HealthResponse {
        status: "healthy",
        data_types: state.coordinator.type_names().len(),
        uptime_secs: uptime.as_secs() as i64,
    })
}

pub async fn openapi_json() -> impl IntoResponse {
    axum::Json(ApiDoc::openapi())
}
