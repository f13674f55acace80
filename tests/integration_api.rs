//! REST surface tests over `tower::ServiceExt::oneshot`.
//!
//! The dispatcher loops run in the background, so mutating endpoints can
//! be followed through to their projected effects.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    middleware, Router,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower::util::ServiceExt;
use uuid::Uuid;

use task_ledger::api;
use task_ledger::api::middleware::{identity_middleware, USER_GUID_HEADER};
use task_ledger::events::payloads::{TaskAdded, TaskCreated};
use task_ledger::events::EventName;
use task_ledger::ledger::{LedgerStore, Role};

mod common;

use common::{harness, wait_until, TestHarness};

async fn setup() -> (TestHarness, Router, Vec<JoinHandle<()>>) {
    let h = harness().await;
    let handles = h.start();
    let app = api::create_router()
        .layer(middleware::from_fn_with_state(
            h.engine.clone(),
            identity_middleware,
        ))
        .with_state(h.engine.clone());
    (h, app, handles)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Seed a worker with one open task and wait for the debit to land.
async fn seed_assigned_task(h: &TestHarness, username: &str) -> (Uuid, Uuid) {
    let worker = h.publish_user(username, Role::Worker).await;
    let task = Uuid::new_v4();
    h.upstream
        .publish(
            EventName::TaskCreated,
            &TaskCreated {
                guid: task,
                title: "Review the quarterly report".to_string(),
                jira_id: "UBER-300".to_string(),
                description: None,
                assigned_to: worker,
            },
        )
        .await
        .unwrap();
    h.upstream
        .publish(
            EventName::TaskAdded,
            &TaskAdded {
                guid: task,
                assigned_to: worker,
            },
        )
        .await
        .unwrap();
    wait_until(|| async {
        h.store
            .get_user(worker)
            .await
            .unwrap()
            .is_some_and(|u| u.balance < 0)
    })
    .await;
    (worker, task)
}

#[tokio::test]
async fn test_missing_identity_header_is_rejected() {
    let (_h, app, handles) = setup().await;

    let req = Request::builder()
        .uri("/statistics/me")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "missing_header");

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_malformed_identity_header_is_rejected() {
    let (_h, app, handles) = setup().await;

    let req = Request::builder()
        .uri("/statistics/me")
        .header(USER_GUID_HEADER, "not-a-guid")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "invalid_header");

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_unknown_user_is_unauthorized() {
    let (_h, app, handles) = setup().await;

    let req = Request::builder()
        .uri("/statistics/me")
        .header(USER_GUID_HEADER, Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "unknown_user");

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_worker_reads_own_statistics() {
    let (h, app, handles) = setup().await;
    let (worker, task) = seed_assigned_task(&h, "ada").await;
    let price = h.store.get_task(task).await.unwrap().unwrap().price;

    let req = Request::builder()
        .uri("/statistics/me")
        .header(USER_GUID_HEADER, worker.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["balance"], json!(-price));
    assert_eq!(json["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(json["transactions"][0]["kind"], "debit");
    assert_eq!(json["transactions"][0]["amount"], json!(price));

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_totals_need_a_privileged_reader() {
    let (h, app, handles) = setup().await;
    let (worker, task) = seed_assigned_task(&h, "grace").await;
    let price = h.store.get_task(task).await.unwrap().unwrap().price;
    let accountant = h.publish_user("counter", Role::Accountant).await;
    h.drain().await;

    // 1. A worker may not read company totals
    let req = Request::builder()
        .uri("/statistics/total")
        .header(USER_GUID_HEADER, worker.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "permission_denied");

    // 2. An accountant may; one outstanding debit is the day's profit
    let req = Request::builder()
        .uri("/statistics/total")
        .header(USER_GUID_HEADER, accountant.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["earned"], json!(price));

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_create_task_is_accepted_and_projected() {
    let (h, app, handles) = setup().await;
    let worker = h.publish_user("linus", Role::Worker).await;
    let manager = h.publish_user("margaret", Role::Manager).await;
    h.drain().await;

    let req = Request::builder()
        .method("POST")
        .uri("/tasks")
        .header("content-type", "application/json")
        .header(USER_GUID_HEADER, manager.to_string())
        .body(Body::from(
            serde_json::to_string(&json!({
                "title": "Ship the release",
                "jira_id": "UBER-301"
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["title"], "Ship the release");
    assert_eq!(json["jira_id"], "UBER-301");
    assert_eq!(json["assigned_to"], json!(worker));

    // The 202 is a receipt; the projection lands via the dispatcher
    let guid: Uuid = serde_json::from_value(json["guid"].clone()).unwrap();
    wait_until(|| async { h.store.get_task(guid).await.unwrap().is_some() }).await;

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_create_task_without_workers_is_unprocessable() {
    let (h, app, handles) = setup().await;
    let manager = h.publish_user("margaret", Role::Manager).await;
    h.drain().await;

    let req = Request::builder()
        .method("POST")
        .uri("/tasks")
        .header("content-type", "application/json")
        .header(USER_GUID_HEADER, manager.to_string())
        .body(Body::from(
            serde_json::to_string(&json!({
                "title": "Nobody can take this",
                "jira_id": "UBER-302"
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "no_eligible_assignee");

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_complete_is_for_the_assignee_and_is_final() {
    let (h, app, handles) = setup().await;
    let (assignee, task) = seed_assigned_task(&h, "joan").await;
    let bystander = h.publish_user("pete", Role::Worker).await;
    h.drain().await;

    // 1. Another worker may not complete it
    let req = Request::builder()
        .method("POST")
        .uri(format!("/tasks/{task}/complete"))
        .header(USER_GUID_HEADER, bystander.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // 2. The assignee may
    let req = Request::builder()
        .method("POST")
        .uri(format!("/tasks/{task}/complete"))
        .header(USER_GUID_HEADER, assignee.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["guid"], json!(task));

    wait_until(|| async { h.store.get_task(task).await.unwrap().is_some_and(|t| t.is_done) })
        .await;

    // 3. Completion is terminal
    let req = Request::builder()
        .method("POST")
        .uri(format!("/tasks/{task}/complete"))
        .header(USER_GUID_HEADER, assignee.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "task_already_done");

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_completing_an_unknown_task_is_not_found() {
    let (h, app, handles) = setup().await;
    let worker = h.publish_user("ada", Role::Worker).await;
    h.drain().await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/tasks/{}/complete", Uuid::new_v4()))
        .header(USER_GUID_HEADER, worker.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "task_not_found");

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_shuffle_is_for_privileged_roles() {
    let (h, app, handles) = setup().await;
    let (worker, _task) = seed_assigned_task(&h, "elena").await;
    let manager = h.publish_user("boss", Role::Manager).await;
    h.drain().await;

    let req = Request::builder()
        .method("POST")
        .uri("/tasks/shuffle")
        .header(USER_GUID_HEADER, worker.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let req = Request::builder()
        .method("POST")
        .uri("/tasks/shuffle")
        .header(USER_GUID_HEADER, manager.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["reassigned"], json!(1));

    for handle in handles {
        handle.abort();
    }
}
