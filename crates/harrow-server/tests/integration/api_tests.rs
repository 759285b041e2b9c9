use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use harrow_core::checkpoint::{Checkpoint, CheckpointKey, CheckpointStatus, CrawlMode, ItemType};
use harrow_core::traits::PrimaryStore;

use crate::integration::common::{TEST_API_KEY, TestApp, setup_test_app};

fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    send(&app.router, authed("GET", uri).body(Body::empty()).unwrap()).await
}

async fn post(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    send(&app.router, authed("POST", uri).body(Body::empty()).unwrap()).await
}

async fn delete(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    send(&app.router, authed("DELETE", uri).body(Body::empty()).unwrap()).await
}

async fn send_json(
    app: &TestApp,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = authed(method, uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(&app.router, request).await
}

async fn seed_checkpoint(app: &TestApp, scope: &str) -> Checkpoint {
    let key = CheckpointKey::new("demo", CrawlMode::Search).with_scope(scope);
    let checkpoint = Checkpoint::new(&key);
    app.db
        .checkpoint_repo()
        .upsert_checkpoint(&checkpoint)
        .await
        .unwrap();
    checkpoint
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn openapi_document_is_public() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/v1/checkpoints"].is_object());
    assert!(json["paths"]["/v1/accounts/{id}/activate"].is_object());
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/v1/checkpoints").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let (status, _) = send(
        &app.router,
        Request::get("/v1/accounts")
            .header("authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_and_get_checkpoint() {
    let app = setup_test_app().await;
    let checkpoint = seed_checkpoint(&app, "rust").await;
    app.db
        .checkpoint_repo()
        .add_processed(checkpoint.task_id, "n1", ItemType::Note)
        .await
        .unwrap();

    let (status, json) = get(&app, "/v1/checkpoints?platform=demo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["checkpoints"][0]["scope_key"], "rust");
    assert!(json["checkpoints"][0].get("processed_items").is_none());

    let (status, json) = get(&app, &format!("/v1/checkpoints/{}", checkpoint.task_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "running");
    assert_eq!(json["crawl_mode"], "search");
    assert_eq!(json["processed_items"], 1);
}

#[tokio::test]
async fn list_checkpoints_filters_by_status() {
    let app = setup_test_app().await;
    seed_checkpoint(&app, "rust").await;

    let (status, json) = get(&app, "/v1/checkpoints?status=completed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 0);

    let (status, json) = get(&app, "/v1/checkpoints?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn unknown_checkpoint_returns_404() {
    let app = setup_test_app().await;
    let id = Uuid::new_v4();

    let (status, json) = get(&app, &format!("/v1/checkpoints/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");

    let (status, _) = delete(&app, &format!("/v1/checkpoints/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(&app, &format!("/v1/checkpoints/{id}/pause")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pause_running_checkpoint_then_conflict() {
    let app = setup_test_app().await;
    let checkpoint = seed_checkpoint(&app, "rust").await;
    let uri = format!("/v1/checkpoints/{}/pause", checkpoint.task_id);

    let (status, json) = post(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "paused");

    let stored = app
        .db
        .checkpoint_repo()
        .get_checkpoint(checkpoint.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CheckpointStatus::Paused);

    let (status, json) = post(&app, &uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn delete_checkpoint_removes_ledger() {
    let app = setup_test_app().await;
    let checkpoint = seed_checkpoint(&app, "rust").await;
    let repo = app.db.checkpoint_repo();
    repo.add_processed(checkpoint.task_id, "n1", ItemType::Note)
        .await
        .unwrap();

    let (status, _) = delete(&app, &format!("/v1/checkpoints/{}", checkpoint.task_id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(
        repo.get_checkpoint(checkpoint.task_id)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(repo.ledger_count(checkpoint.task_id).await.unwrap(), 0);
}

#[tokio::test]
async fn cleanup_removes_only_stale_checkpoints() {
    let app = setup_test_app().await;
    let fresh = seed_checkpoint(&app, "fresh").await;
    let mut stale = seed_checkpoint(&app, "stale").await;
    stale.updated_at = chrono::Utc::now() - chrono::TimeDelta::days(30);
    app.db
        .checkpoint_repo()
        .upsert_checkpoint(&stale)
        .await
        .unwrap();

    let (status, json) = post(&app, "/v1/checkpoints/cleanup?days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["days"], 7);
    assert_eq!(json["removed"], 1);

    let (status, _) = get(&app, &format!("/v1/checkpoints/{}", fresh.task_id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&app, &format!("/v1/checkpoints/{}", stale.task_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_get_and_list_accounts() {
    let app = setup_test_app().await;

    let (status, created) = send_json(
        &app,
        "POST",
        "/v1/accounts",
        serde_json::json!({"platform": "demo", "credential": "sid=abc", "notes": "main"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "active");
    assert_eq!(created["notes"], "main");
    assert!(created.get("credential").is_none());

    let id = created["id"].as_str().unwrap();
    let (status, json) = get(&app, &format!("/v1/accounts/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["platform"], "demo");

    let (status, json) = get(&app, "/v1/accounts?platform=demo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["stats"]["total"], 1);
    assert_eq!(json["stats"]["by_status"]["active"], 1);

    let (status, json) = get(&app, "/v1/accounts").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("stats").is_none());
}

#[tokio::test]
async fn create_account_rejects_empty_credential() {
    let app = setup_test_app().await;

    let (status, json) = send_json(
        &app,
        "POST",
        "/v1/accounts",
        serde_json::json!({"platform": "demo", "credential": ""}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn disable_activate_update_and_delete_account() {
    let app = setup_test_app().await;
    let (_, created) = send_json(
        &app,
        "POST",
        "/v1/accounts",
        serde_json::json!({"platform": "demo", "credential": "sid=abc"}),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, json) = post(&app, &format!("/v1/accounts/{id}/disable")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "disabled");

    let (status, json) = post(&app, &format!("/v1/accounts/{id}/activate")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "active");

    let (status, json) = send_json(
        &app,
        "PUT",
        &format!("/v1/accounts/{id}"),
        serde_json::json!({"notes": "rotated"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["notes"], "rotated");

    let (status, _) = delete(&app, &format!("/v1/accounts/{id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = get(&app, &format!("/v1/accounts/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_account_returns_404() {
    let app = setup_test_app().await;
    let id = Uuid::new_v4();

    for uri in [
        format!("/v1/accounts/{id}/activate"),
        format!("/v1/accounts/{id}/disable"),
    ] {
        let (status, json) = post(&app, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }

    let (status, _) = send_json(
        &app,
        "PUT",
        &format!("/v1/accounts/{id}"),
        serde_json::json!({"notes": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = delete(&app, &format!("/v1/accounts/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
