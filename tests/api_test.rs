//! HTTP surface: routing, bearer auth and error bodies.

mod fixtures;
mod helpers;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use fixtures::*;
use helpers::*;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use virtual_fitting::auth::issue_token;
use virtual_fitting::routes;

const SECRET: &str = "test-secret";

fn router(h: &Harness) -> Router {
    let prometheus = PrometheusBuilder::new().build_recorder().handle();
    routes::router(h.app_state(SECRET), Arc::new(prometheus))
}

fn bearer(user: Uuid) -> String {
    format!("Bearer {}", issue_token(user, SECRET, 3600).unwrap())
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    auth: Option<String>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let request = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let h = Harness::new().await;
    let app = router(&h);

    let (status, body) = call(&app, Method::GET, "/api/v1/fittings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = call(
        &app,
        Method::GET,
        "/api/v1/fittings",
        Some("Bearer not-a-jwt".into()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_then_poll_until_completed() {
    let h = Harness::new().await;
    let app = router(&h);
    let auth = bearer(h.owner);

    let (status, accepted) = call(
        &app,
        Method::POST,
        "/api/v1/fittings",
        Some(auth.clone()),
        Some(json!({ "items": [
            { "itemId": TOP.item_id, "category": "top" },
            { "itemId": BOTTOM.item_id, "category": "bottom" }
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["status"], "processing");
    assert_eq!(accepted["currentStep"], "top");

    let job_id: Uuid = accepted["jobId"].as_str().unwrap().parse().unwrap();
    h.wait_for_terminal(job_id).await;

    let uri = format!("/api/v1/fittings/{}", job_id);
    let (status, body) = call(&app, Method::GET, &uri, Some(auth.clone()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["id"], job_id.to_string());
    assert_eq!(body["caption"], CAPTION);
    assert!(body["resultReference"]
        .as_str()
        .unwrap()
        .starts_with(RESULT_BASE_URL));
    assert!(body["processingTimeSeconds"].as_f64().unwrap() >= 0.0);

    let (status, history) = call(
        &app,
        Method::GET,
        "/api/v1/fittings?page=1&limit=10",
        Some(auth.clone()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["pagination"]["totalItems"], 1);
    assert_eq!(history["fittings"][0]["jobId"], job_id.to_string());
    assert_eq!(history["fittings"][0]["items"][1]["name"], BOTTOM.name());

    let (status, deleted) = call(&app, Method::DELETE, &uri, Some(auth.clone()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(deleted["deletedAt"].is_string());

    let (status, body) = call(&app, Method::GET, &uri, Some(auth), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "FITTING_JOB_NOT_FOUND");
}

#[tokio::test]
async fn test_precondition_errors_carry_codes() {
    let h = Harness::new().await;
    let app = router(&h);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/fittings",
        Some(bearer(h.owner)),
        Some(json!({ "items": [
            { "itemId": 1, "category": "top" },
            { "itemId": 4, "category": "top" }
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "DUPLICATE_CATEGORY");
    assert!(body["error"].is_string());

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/fittings",
        Some(bearer(Uuid::new_v4())),
        Some(json!({ "items": [{ "itemId": 1, "category": "top" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PHOTO_REQUIRED");

    let (status, _) = call(
        &app,
        Method::GET,
        "/api/v1/fittings?limit=500",
        Some(bearer(h.owner)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_other_owner_gets_forbidden() {
    let h = Harness::new().await;
    let app = router(&h);

    let accepted = h.submit(&[OUTER]).await.unwrap();
    h.wait_for_terminal(accepted.job_id).await;

    let uri = format!("/api/v1/fittings/{}", accepted.job_id);
    let (status, body) = call(&app, Method::GET, &uri, Some(bearer(Uuid::new_v4())), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = call(&app, Method::DELETE, &uri, Some(bearer(Uuid::new_v4())), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_caption_batch_endpoint() {
    let h = Harness::new().await;
    let app = router(&h);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/captions",
        Some(bearer(h.owner)),
        Some(json!({ "references": [TOP.image_key, BROKEN.image_key] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["caption"], CAPTION);
    assert!(body[1]["caption"].is_null());

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/captions",
        Some(bearer(h.owner)),
        Some(json!({ "references": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_malformed_input_uses_error_body() {
    let h = Harness::new().await;
    let app = router(&h);
    let auth = bearer(h.owner);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/fittings")
        .header(header::AUTHORIZATION, auth.clone())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"items\": ["))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["error"].is_string());

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/fittings",
        Some(auth.clone()),
        Some(json!({ "items": [{ "itemId": "one", "category": "top" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    for uri in ["/api/v1/fittings/not-a-uuid", "/api/v1/fittings?page=abc"] {
        let (status, body) = call(&app, Method::GET, uri, Some(auth.clone()), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["code"], "VALIDATION_ERROR", "{}", uri);
    }

    let (status, body) = call(
        &app,
        Method::DELETE,
        "/api/v1/fittings/not-a-uuid",
        Some(auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
