mod helpers;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use helpers::builders::seed_blog;
use helpers::{AssignmentBuilder, TestEngine};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> (axum::Router, TestEngine) {
    let t = TestEngine::database().await;
    seed_blog(&t.engine).await;
    AssignmentBuilder::new("alice", "admin").create(&t.engine).await;
    let router = warden::web::router(Arc::new(t.reopen().await));
    (router, t)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn check_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/check")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_check_endpoint() {
    let (router, _t) = app().await;

    let response = router
        .clone()
        .oneshot(check_request(json!({ "user_id": "alice", "item": "editPost" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "allowed": true }));

    let response = router
        .oneshot(check_request(json!({
            "user_id": "bob",
            "item": "editPost",
            "params": { "ownerId": "bob" }
        })))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({ "allowed": false }));
}

#[tokio::test]
async fn test_items_endpoint_filters() {
    let (router, _t) = app().await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/items?type=operation")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let items = body_json(response).await;
    assert_eq!(items.as_array().unwrap().len(), 1);
    assert_eq!(items[0]["name"], "editPost");
    assert_eq!(items[0]["type"], 0);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/items?user_id=alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let items = body_json(response).await;
    assert_eq!(items[0]["name"], "admin");
    assert_eq!(items[0]["description"], "Administrator");

    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/items?type=group")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_assignments_endpoint() {
    let (router, _t) = app().await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/users/alice/assignments")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let assignments = body_json(response).await;
    assert_eq!(assignments[0]["user_id"], "alice");
    assert_eq!(assignments[0]["item_name"], "admin");

    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/users/nobody/assignments")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_healthz() {
    let (router, _t) = app().await;
    let response = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
