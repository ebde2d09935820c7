use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::integration::common::setup_test_app;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["data_types"], 3);
}

#[tokio::test]
async fn get_data_falls_back_past_failing_source() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/data/medals").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data_type"], "medals");
    assert_eq!(json["source"], "primary");
    assert_eq!(json["count"], 3);
    assert_eq!(json["from_cache"], false);
    assert_eq!(json["changed"], true);
    assert_eq!(json["data"][0]["id"], "medals-1");
    // One failed request to "down", one successful one to "primary".
    assert_eq!(app.hits.count(), 2);
}

#[tokio::test]
async fn second_read_is_served_from_cache() {
    let app = setup_test_app().await;

    let first = app
        .router
        .clone()
        .oneshot(Request::get("/v1/data/banners").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .router
        .oneshot(Request::get("/v1/data/banners").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    let json = body_json(second).await;
    assert_eq!(json["from_cache"], true);
    assert_eq!(json["changed"], false);
    assert_eq!(json["count"], 3);
    assert_eq!(app.hits.count(), 1);
    assert!(app.cache_dir.path().join("banners.json").exists());
}

#[tokio::test]
async fn unknown_type_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/data/nothing").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "config_error");
}

#[tokio::test]
async fn exhausted_sources_return_502() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/data/outages?stale=true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert_eq!(json["error"], "sources_exhausted");
    assert!(!app.cache_dir.path().join("outages.json").exists());
}

#[tokio::test]
async fn update_reports_each_type() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::post("/v1/update").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["results"]["medals"]["ok"], true);
    assert_eq!(json["results"]["medals"]["count"], 3);
    assert_eq!(json["results"]["banners"]["ok"], true);
    assert_eq!(json["results"]["outages"]["ok"], false);
    assert_eq!(json["results"]["outages"]["kind"], "sources_exhausted");
}

#[tokio::test]
async fn update_limited_to_requested_types() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::post("/v1/update?types=banners,medals")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    let results = json["results"].as_object().unwrap();
    assert_eq!(results.len(), 2);
    assert!(!results.contains_key("outages"));
}

#[tokio::test]
async fn clear_cache_forces_refetch() {
    let app = setup_test_app().await;

    app.router
        .clone()
        .oneshot(Request::get("/v1/data/banners").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(Request::delete("/v1/cache").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!app.cache_dir.path().join("banners.json").exists());

    let response = app
        .router
        .oneshot(Request::get("/v1/data/banners").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["from_cache"], false);
    assert_eq!(app.hits.count(), 2);
}

#[tokio::test]
async fn rescore_promotes_newest_source() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::post("/v1/rescore?type=medals")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["priorities"]["medals"],
        serde_json::json!(["backup", "primary"])
    );
    let scores = json["results"]["medals"].as_array().unwrap();
    assert_eq!(scores[0]["source"], "backup");
    assert_eq!(
        app.state.coordinator.orchestrator().priority("medals").unwrap(),
        vec!["backup".to_string(), "primary".to_string()]
    );
}

#[tokio::test]
async fn rescore_unknown_type_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::post("/v1/rescore?type=nothing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_types_includes_parser_summary() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/types").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 3);
    let names: Vec<_> = json["types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["banners", "medals", "outages"]);
    assert_eq!(
        json["types"][1]["priority"],
        serde_json::json!(["down", "primary", "backup"])
    );
}

#[tokio::test]
async fn discover_type_learns_parser() {
    let app = setup_test_app().await;

    let body = serde_json::json!({
        "name": "stickers",
        "ttl_ms": 60000,
        "sources": ["down", "backup"],
        "sample_size": 2
    });
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/v1/types")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["kinds"]["version"], "number");
    assert_eq!(json["kinds"]["updated_at"], "date");
    assert!(
        json["required"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("name"))
    );

    let response = app
        .router
        .oneshot(Request::get("/v1/data/stickers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["source"], "backup");
}

#[tokio::test]
async fn discover_rejects_unknown_source() {
    let app = setup_test_app().await;

    let body = serde_json::json!({
        "name": "stickers",
        "ttl_ms": 60000,
        "sources": ["nowhere"]
    });
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/v1/types")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_definition");

    let response = app
        .router
        .oneshot(Request::get("/v1/data/stickers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/v1/data/{data_type}"].is_object());
    assert!(json["paths"]["/v1/rescore"].is_object());
}
