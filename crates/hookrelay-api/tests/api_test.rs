//! HTTP API tests.
//!
//! Drives the router in-process with `oneshot` against in-memory storage.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use hookrelay_api::{create_router, AppState};
use hookrelay_core::{Clock, Delivery, DeliveryStatus, SubscriptionId, TestClock};
use hookrelay_delivery::{storage::mock::MockWebhookStorage, DeliveryConfig, WebhookEngine};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

struct TestApp {
    storage: MockWebhookStorage,
    clock: TestClock,
    engine: Arc<WebhookEngine>,
    router: Router,
}

fn app() -> TestApp {
    let storage = MockWebhookStorage::new();
    let clock = TestClock::new();
    let config = DeliveryConfig { worker_count: 2, ..DeliveryConfig::default() };
    let engine = Arc::new(
        WebhookEngine::new(Arc::new(storage.clone()), config, Arc::new(clock.clone())).unwrap(),
    );
    let state = AppState::new(engine.clone(), Arc::new(clock.clone()));
    let router = create_router(state, Duration::from_secs(30));
    TestApp { storage, clock, engine, router }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, _, body) = send_raw(router, method, uri, body, None).await;
    (status, body)
}

async fn send_raw(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    request_id: Option<&str>,
) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = request_id {
        builder = builder.header("x-request-id", id);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, request_id, body)
}

async fn create(router: &Router, url: &str, event_types: &[&str]) -> (String, String) {
    let (status, body) = send(
        router,
        Method::POST,
        "/subscriptions",
        Some(json!({ "name": "Deals feed", "url": url, "event_types": event_types })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (body["id"].as_str().unwrap().to_string(), body["secret"].as_str().unwrap().to_string())
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap()
}

#[tokio::test]
async fn health_reports_storage_state() {
    let app = app();

    let (status, body) = send(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["status"], "up");
    assert_eq!(body["timestamp"], json!(app.clock.now()));

    app.storage.set_unhealthy(Some("connection refused".to_string())).await;
    let (status, body) = send(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["database"]["status"], "down");
}

#[tokio::test]
async fn every_response_carries_a_request_id() {
    let app = app();

    let (_, generated, _) = send_raw(&app.router, Method::GET, "/health", None, None).await;
    let generated = generated.expect("request id header");
    assert!(uuid::Uuid::parse_str(&generated).is_ok());

    let (status, echoed, _) =
        send_raw(&app.router, Method::GET, "/subscriptions/not-a-uuid", None, Some("req-42")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(echoed.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn create_returns_secret_once() {
    let app = app();
    let (id, secret) = create(&app.router, "https://crm.example.com/hooks", &["deal.won"]).await;
    assert_eq!(secret.len(), 40);

    let (status, body) = send(&app.router, Method::GET, &format!("/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Deals feed");
    assert_eq!(body["active"], true);
    assert_eq!(body["failure_count"], 0);
    assert!(body.get("secret").is_none());

    let (status, list) = send(&app.router, Method::GET, "/subscriptions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert!(list[0].get("secret").is_none());
}

#[tokio::test]
async fn create_rejects_invalid_input() {
    let app = app();

    let cases = [
        json!({ "name": "x", "url": "not a url", "event_types": ["deal.won"] }),
        json!({ "name": "x", "url": "ftp://crm.example.com", "event_types": ["deal.won"] }),
        json!({ "name": "x", "url": "https://crm.example.com", "event_types": [] }),
        json!({ "name": "x", "url": "https://crm.example.com", "event_types": ["deal.closed"] }),
        json!({ "name": "   ", "url": "https://crm.example.com", "event_types": ["deal.won"] }),
        json!({ "url": "https://crm.example.com" }),
    ];

    for case in cases {
        let (status, body) = send(&app.router, Method::POST, "/subscriptions", Some(case.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
        assert_eq!(error_code(&body), "validation", "{case}");
        assert!(body["error"]["message"].as_str().is_some());
    }

    assert!(app.engine.registry().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_subscription_is_not_found() {
    let app = app();
    let missing = SubscriptionId::new();

    for (method, uri) in [
        (Method::GET, format!("/subscriptions/{missing}")),
        (Method::DELETE, format!("/subscriptions/{missing}")),
        (Method::POST, format!("/subscriptions/{missing}/secret")),
        (Method::POST, format!("/subscriptions/{missing}/test")),
        (Method::GET, format!("/subscriptions/{missing}/deliveries")),
    ] {
        let (status, body) = send(&app.router, method.clone(), &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(error_code(&body), "not_found");
    }
}

#[tokio::test]
async fn update_reactivation_resets_failure_count() {
    let app = app();
    let (id, _) = create(&app.router, "https://crm.example.com/hooks", &["deal.won"]).await;
    let uri = format!("/subscriptions/{id}");

    let (status, body) =
        send(&app.router, Method::PATCH, &uri, Some(json!({ "active": false, "name": "Paused" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
    assert_eq!(body["name"], "Paused");

    let subscription_id = SubscriptionId(uuid::Uuid::parse_str(&id).unwrap());
    let mut stored = app.storage.subscription(subscription_id).await.unwrap();
    stored.failure_count = 10;
    app.storage.add_subscription(stored).await;

    let (status, body) = send(&app.router, Method::PATCH, &uri, Some(json!({ "active": true }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["failure_count"], 0);

    let (status, body) =
        send(&app.router, Method::PATCH, &uri, Some(json!({ "url": "http://" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "validation");
}

#[tokio::test]
async fn regenerate_secret_replaces_the_old_one() {
    let app = app();
    let (id, original) = create(&app.router, "https://crm.example.com/hooks", &["deal.won"]).await;

    let (status, body) =
        send(&app.router, Method::POST, &format!("/subscriptions/{id}/secret"), None).await;
    assert_eq!(status, StatusCode::OK);
    let rotated = body["secret"].as_str().unwrap();
    assert_ne!(rotated, original);

    let subscription_id = SubscriptionId(uuid::Uuid::parse_str(&id).unwrap());
    assert_eq!(app.storage.subscription(subscription_id).await.unwrap().secret, rotated);
}

#[tokio::test]
async fn delete_returns_no_content() {
    let app = app();
    let (id, _) = create(&app.router, "https://crm.example.com/hooks", &["deal.won"]).await;
    let uri = format!("/subscriptions/{id}");

    let (status, body) = send(&app.router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&app.router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn events_fan_out_to_matching_subscriptions() {
    let app = app();
    create(&app.router, "https://a.example.com/hooks", &["deal.won"]).await;
    create(&app.router, "https://b.example.com/hooks", &["deal.won", "deal.lost"]).await;
    create(&app.router, "https://c.example.com/hooks", &["contact.created"]).await;

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/events",
        Some(json!({ "event_type": "deal.won", "payload": { "deal_id": 7 } })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["deliveries_created"], 2);

    let deliveries = app.storage.deliveries().await;
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.event_type == "deal.won" && d.payload.0 == json!({ "deal_id": 7 })));

    let (status, body) =
        send(&app.router, Method::POST, "/events", Some(json!({ "event_type": "deal.lost" }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["deliveries_created"], 1);
}

#[tokio::test]
async fn unknown_event_type_is_rejected() {
    let app = app();
    create(&app.router, "https://a.example.com/hooks", &["deal.won"]).await;

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/events",
        Some(json!({ "event_type": "deal.closed", "payload": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "validation");
    assert!(app.storage.deliveries().await.is_empty());
}

#[tokio::test]
async fn test_webhook_creates_test_delivery() {
    let app = app();
    let (id, _) = create(&app.router, "https://a.example.com/hooks", &["deal.won"]).await;

    let (status, body) =
        send(&app.router, Method::POST, &format!("/subscriptions/{id}/test"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let delivery_id = body["delivery_id"].as_str().unwrap();
    let (status, detail) =
        send(&app.router, Method::GET, &format!("/deliveries/{delivery_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["event_type"], "test");
    assert_eq!(detail["status"], "pending");
    assert_eq!(detail["attempts_history"], json!([]));
}

#[tokio::test]
async fn delivery_listing_filters_by_status() {
    let app = app();
    let (id, _) = create(&app.router, "https://a.example.com/hooks", &["deal.won"]).await;
    let subscription_id = SubscriptionId(uuid::Uuid::parse_str(&id).unwrap());

    for status in [DeliveryStatus::Failed, DeliveryStatus::Failed, DeliveryStatus::Success] {
        let mut delivery = Delivery::new_pending(subscription_id, "deal.won", json!({}), app.clock.now());
        delivery.status = status;
        app.storage.add_delivery(delivery).await;
    }

    let base = format!("/subscriptions/{id}/deliveries");
    let (status, all) = send(&app.router, Method::GET, &base, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 3);

    let (_, failed) = send(&app.router, Method::GET, &format!("{base}?status=failed"), None).await;
    assert_eq!(failed.as_array().unwrap().len(), 2);

    let (_, page) = send(&app.router, Method::GET, &format!("{base}?limit=1&offset=1"), None).await;
    assert_eq!(page.as_array().unwrap().len(), 1);

    let (status, body) =
        send(&app.router, Method::GET, &format!("{base}?status=lost"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "validation");
}

#[tokio::test]
async fn retry_endpoints_reopen_failed_deliveries() {
    let app = app();
    let (id, _) = create(&app.router, "https://a.example.com/hooks", &["deal.won"]).await;
    let subscription_id = SubscriptionId(uuid::Uuid::parse_str(&id).unwrap());

    let mut failed = Vec::new();
    for _ in 0..2 {
        let mut delivery = Delivery::new_pending(subscription_id, "deal.won", json!({}), app.clock.now());
        delivery.status = DeliveryStatus::Failed;
        delivery.attempts = 5;
        failed.push(delivery.id);
        app.storage.add_delivery(delivery).await;
    }

    let (status, _) =
        send(&app.router, Method::POST, &format!("/deliveries/{}/retry", failed[0]), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(app.storage.delivery(failed[0]).await.unwrap().status, DeliveryStatus::Pending);

    let (status, body) =
        send(&app.router, Method::POST, &format!("/deliveries/{}/retry", failed[0]), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "validation");

    let (status, body) =
        send(&app.router, Method::POST, &format!("/subscriptions/{id}/retry-failed"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retried"], 1);

    let (status, body) = send(
        &app.router,
        Method::POST,
        &format!("/deliveries/{}/retry", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "not_found");
}

#[tokio::test]
async fn malformed_json_body_is_a_validation_error() {
    let app = app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/events")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error_code(&body), "validation");
}

#[tokio::test]
async fn running_engine_delivers_submitted_events() {
    let app = app();
    let receiver = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&receiver)
        .await;

    app.engine.start().await.unwrap();

    let (id, _) = create(&app.router, &format!("{}/hooks", receiver.uri()), &["contact.created"]).await;
    let (status, _) = send(
        &app.router,
        Method::POST,
        "/events",
        Some(json!({ "event_type": "contact.created", "payload": { "contact_id": 1 } })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let uri = format!("/subscriptions/{id}/deliveries?status=success");
    let delivered = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let (_, body) = send(&app.router, Method::GET, &uri, None).await;
            if let Some(first) = body.as_array().and_then(|list| list.first()) {
                return first.clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("delivery did not complete");

    assert_eq!(delivered["attempts"], 1);
    assert_eq!(delivered["last_response_code"], 200);

    let delivery_id = delivered["id"].as_str().unwrap();
    let (_, detail) = send(&app.router, Method::GET, &format!("/deliveries/{delivery_id}"), None).await;
    let attempts = detail["attempts_history"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["succeeded"], true);

    app.engine.shutdown().await.unwrap();
}
