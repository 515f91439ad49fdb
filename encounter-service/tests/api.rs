use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use encounter_service::{router, AppState, EncounterStore};

fn app() -> Router {
    router(
        AppState {
            store: Arc::new(EncounterStore::in_memory()),
        },
        1024 * 1024,
    )
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header("X-User-Id", user);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn start(app: &Router, user: &str, state: Value) -> Value {
    let (status, body) = send(app, "POST", "/api/v1/encounters", Some(user), Some(json!({ "state": state }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn health_reports_service() {
    let (status, body) = send(&app(), "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], json!(true));
    assert_eq!(body["service"], json!("encounter-service"));
}

#[tokio::test]
async fn start_requires_identity() {
    let (status, body) = send(&app(), "POST", "/api/v1/encounters", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!("User identity required (X-User-Id header)"));
}

#[tokio::test]
async fn identity_falls_back_to_query_parameter() {
    let app = app();
    let (status, body) = send(&app, "POST", "/api/v1/encounters?user_id=user-q", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user_id"], json!("user-q"));
    assert_eq!(body["status"], json!("active"));
}

#[tokio::test]
async fn encoded_query_identity_matches_header_identity() {
    let app = app();
    let (status, body) = send(&app, "POST", "/api/v1/encounters?user_id=dr%20smith", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user_id"], json!("dr smith"));

    let (status, body) = send(&app, "GET", "/api/v1/encounters?status=active", Some("dr smith"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Form encoding of the same identity
    let (_, body) = send(&app, "GET", "/api/v1/encounters?user_id=dr+smith", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn pause_active_encounter_sets_status_and_timestamp() {
    let app = app();
    let encounter = start(&app, "user-1", json!({})).await;
    let id = encounter["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/encounters/{}/pause", id),
        Some("user-1"),
        Some(json!({ "state": { "step": "intake", "recordingTime": 42 } })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("paused"));
    assert!(!body["paused_at"].is_null());
    assert!(!body["last_activity_at"].is_null());
    assert_eq!(body["state"]["step"], json!("intake"));
    assert_eq!(body["state"]["recordingTime"], json!(42.0));
}

#[tokio::test]
async fn pause_twice_or_after_completion_is_rejected() {
    let app = app();
    let encounter = start(&app, "user-1", json!({})).await;
    let id = encounter["id"].as_str().unwrap();
    let pause_uri = format!("/api/v1/encounters/{}/pause", id);

    let (status, _) = send(&app, "POST", &pause_uri, Some("user-1"), Some(json!({ "state": { "step": "first" } }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", &pause_uri, Some("user-1"), Some(json!({ "state": { "step": "second" } }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"], json!("Only active encounters can be paused"));

    let (status, _) = send(&app, "POST", &format!("/api/v1/encounters/{}/complete", id), Some("user-1"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "POST", &pause_uri, Some("user-1"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn resume_paused_encounter_sets_status_and_resumed_at() {
    let app = app();
    let encounter = start(&app, "user-1", json!({ "transcript": "so far" })).await;
    let id = encounter["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/encounters/{}/pause", id),
        Some("user-1"),
        Some(json!({ "state": { "transcript": "snapshot" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", &format!("/api/v1/encounters/{}/resume", id), Some("user-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("active"));
    assert!(!body["resumed_at"].is_null());
    assert_eq!(body["state"]["transcript"], json!("snapshot"));
}

#[tokio::test]
async fn resume_active_encounter_conflicts() {
    let app = app();
    let encounter = start(&app, "user-1", json!({})).await;
    let id = encounter["id"].as_str().unwrap();

    let (status, body) = send(&app, "POST", &format!("/api/v1/encounters/{}/resume", id), Some("user-1"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"], json!("Only paused encounters can be resumed"));
}

#[tokio::test]
async fn other_owner_is_forbidden_and_unknown_is_not_found() {
    let app = app();
    let encounter = start(&app, "user-1", json!({})).await;
    let id = encounter["id"].as_str().unwrap();

    let (status, body) = send(&app, "GET", &format!("/api/v1/encounters/{}", id), Some("user-2"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], json!("Encounter does not belong to this user"));

    let (status, body) = send(&app, "POST", "/api/v1/encounters/nope/pause", Some("user-1"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], json!("Encounter not found"));
}

#[tokio::test]
async fn second_active_encounter_conflicts() {
    let app = app();
    start(&app, "user-1", json!({})).await;

    let (status, body) = send(&app, "POST", "/api/v1/encounters", Some("user-1"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"], json!("Owner already has an active encounter"));
}

#[tokio::test]
async fn list_filters_by_status_and_active_endpoint() {
    let app = app();

    let (status, _) = send(&app, "GET", "/api/v1/encounters/active", Some("user-1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let first = start(&app, "user-1", json!({})).await;
    let first_id = first["id"].as_str().unwrap();
    send(&app, "POST", &format!("/api/v1/encounters/{}/pause", first_id), Some("user-1"), Some(json!({}))).await;
    let second = start(&app, "user-1", json!({})).await;

    let (status, body) = send(&app, "GET", "/api/v1/encounters?status=paused", Some("user-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let paused = body.as_array().unwrap();
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0]["id"], first["id"]);

    let (_, body) = send(&app, "GET", "/api/v1/encounters?status=paused&status=active", Some("user-1"), None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "GET", "/api/v1/encounters/active", Some("user-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], second["id"]);

    let (status, _) = send(&app, "GET", "/api/v1/encounters?status=bogus", Some("user-1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn messages_append_only_while_active() {
    let app = app();
    let encounter = start(&app, "user-1", json!({})).await;
    let id = encounter["id"].as_str().unwrap();
    let uri = format!("/api/v1/encounters/{}/messages", id);

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some("user-1"),
        Some(json!({ "content": "Any allergies?", "role": "assistant", "flow_step": "history" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["messages"][0]["content"], json!("Any allergies?"));
    assert_eq!(body["state"]["step"], json!("history"));

    send(&app, "POST", &format!("/api/v1/encounters/{}/pause", id), Some("user-1"), Some(json!({}))).await;
    let (status, body) = send(&app, "POST", &uri, Some("user-1"), Some(json!({ "content": "late" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"], json!("Cannot add messages unless encounter is active"));
}

#[tokio::test]
async fn invalid_state_is_unprocessable() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/encounters",
        Some("user-1"),
        Some(json!({ "state": { "audioChunks": ["%%%"] } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("audio chunk 0"));
}
