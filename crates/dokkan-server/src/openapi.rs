use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "dokkan API",
        version = "0.1.0",
        description = "Multi-source game data aggregation with caching and source fallback."
    ),
    paths(
        crate::routes::get_data,
        crate::routes::update_all,
        crate::routes::clear_cache,
        crate::routes::rescore,
        crate::routes::list_types,
        crate::routes::discover_type,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::DataResponse,
        crate::dto::UpdateResponse,
        crate::dto::TypeOutcome,
        crate::dto::RescoreResponse,
        crate::dto::SourceScoreResponse,
        crate::dto::TypeListResponse,
        crate::dto::DataTypeResponse,
        crate::dto::ParserResponse,
        crate::dto::DiscoverRequest,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "data", description = "Cached, normalized records"),
        (name = "sources", description = "Source priority maintenance"),
        (name = "types", description = "Data type registry"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
