//! End-to-end tests with mocked external dependencies.
//!
//! These run the full router in-process with the mock provider and
//! in-memory SQLite behind it.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use pce_core::orchestrator::{PIPELINE_QUEUE, WEBHOOK_QUEUE};
use pce_core::queue::JobQueue;
use pce_core::testing::{sign_tracking, MockProvider};

use common::{fixtures, TestFixture, BRAND};

// =============================================================================
// Basic API Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new();

    for path in ["/health", "/api/v1/health"] {
        let response = fixture.get_anonymous(path).await;
        assert_status!(response, StatusCode::OK);
        assert_eq!(response.body["status"], "ok");
        assert!(response.body["version"].is_string());
    }
}

#[tokio::test]
async fn test_config_endpoint_is_public() {
    let fixture = TestFixture::new();

    let response = fixture.get_anonymous("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["auth"]["method"], "gateway");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    fixture.get("/api/v1/pipelines").await;

    let response = fixture.get_anonymous("/metrics").await;
    assert_status!(response, StatusCode::OK);
    assert!(response.text.contains("pce_http_requests_total"));
    assert!(response.text.contains("pce_pipelines_by_status"));
    assert!(response.text.contains("pce_queue_jobs"));
}

#[tokio::test]
async fn test_brand_routes_require_identity() {
    let fixture = TestFixture::new();

    for path in [
        "/api/v1/pipelines",
        "/api/v1/dashboard",
        "/api/v1/queues",
        "/api/v1/fulfillments",
        "/api/v1/returns",
        "/api/v1/events",
    ] {
        let response = fixture.get_anonymous(path).await;
        assert_status!(response, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_unknown_pipeline_is_not_found() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/pipelines/does-not-exist").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("does-not-exist"));
}

// =============================================================================
// Queues
// =============================================================================

#[tokio::test]
async fn test_queue_pause_and_resume() {
    let fixture = TestFixture::new();

    let list = fixture.get("/api/v1/queues").await;
    assert_status!(list, StatusCode::OK);
    let names: Vec<&str> = list
        .body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|q| q["name"].as_str())
        .collect();
    assert!(names.contains(&PIPELINE_QUEUE));
    assert!(names.contains(&WEBHOOK_QUEUE));

    let paused = fixture
        .post(&format!("/api/v1/queues/{}/pause", PIPELINE_QUEUE), json!({}))
        .await;
    assert_status!(paused, StatusCode::OK);
    assert_eq!(paused.body["is_paused"], true);

    // Orders still go in; the job waits on the paused queue
    fixture
        .post("/api/v1/orders", json!({ "order": fixtures::order("o1", BRAND) }))
        .await;
    assert_eq!(fixture.engine.run_until_idle().await, 0);

    let detail = fixture.get(&format!("/api/v1/queues/{}", PIPELINE_QUEUE)).await;
    assert_status!(detail, StatusCode::OK);
    assert_eq!(detail.body["is_paused"], true);
    assert_eq!(detail.body["paused"], 1);

    let resumed = fixture
        .post(&format!("/api/v1/queues/{}/resume", PIPELINE_QUEUE), json!({}))
        .await;
    assert_status!(resumed, StatusCode::OK);
    assert_eq!(resumed.body["is_paused"], false);
    assert!(fixture.engine.run_until_idle().await > 0);
}

#[tokio::test]
async fn test_unknown_queue_is_not_found() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/queues/pce:nothing").await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture
        .post("/api/v1/queues/pce:nothing/pause", json!({}))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retry_failed_with_nothing_failed() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            &format!("/api/v1/queues/{}/retry-failed?limit=10", PIPELINE_QUEUE),
            json!({}),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["retried"], 0);
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn test_provider_webhook_with_bad_signature_is_acknowledged_but_dropped() {
    let fixture = TestFixture::new();
    let body = br#"{"type":"package_shipped","order_id":"ext-1"}"#;

    let response = fixture
        .post_raw(
            "/api/v1/webhooks/providers/printful",
            body,
            &[("x-mock-signature", "forged")],
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["received"], true);

    let unsigned = fixture
        .post_raw("/api/v1/webhooks/providers/printful", body, &[])
        .await;
    assert_status!(unsigned, StatusCode::OK);

    let counts = fixture.engine.queue.counts(WEBHOOK_QUEUE).unwrap();
    assert_eq!(counts.waiting, 0);
}

#[tokio::test]
async fn test_signed_provider_webhook_is_queued() {
    let fixture = TestFixture::new();
    let body = br#"{"type":"order_updated","order_id":"ext-1"}"#;
    let signature = MockProvider::sign(body);

    let response = fixture
        .post_raw(
            "/api/v1/webhooks/providers/printful",
            body,
            &[("x-mock-signature", signature.as_str())],
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(fixture.engine.queue.counts(WEBHOOK_QUEUE).unwrap().waiting, 1);

    // Matches no fulfillment; handled without error
    fixture.engine.run_until_idle().await;
    let counts = fixture.engine.queue.counts(WEBHOOK_QUEUE).unwrap();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.failed, 0);
}

#[tokio::test]
async fn test_webhook_for_unknown_provider_is_acknowledged() {
    let fixture = TestFixture::new();

    let response = fixture
        .post_raw("/api/v1/webhooks/providers/acme", b"{}", &[])
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(fixture.engine.queue.counts(WEBHOOK_QUEUE).unwrap().waiting, 0);
}

#[tokio::test]
async fn test_tracking_webhook_is_queued() {
    let fixture = TestFixture::new();

    let body = br#"{"tracking_number":"1Z999","status":"in_transit","carrier":"UPS"}"#;
    let signature = sign_tracking(body);
    let response = fixture
        .post_raw(
            "/api/v1/webhooks/tracking",
            body,
            &[("x-tracking-signature", signature.as_str())],
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(fixture.engine.queue.counts(WEBHOOK_QUEUE).unwrap().waiting, 1);

    let garbage = b"<xml/>";
    let signature = sign_tracking(garbage);
    let response = fixture
        .post_raw(
            "/api/v1/webhooks/tracking",
            garbage,
            &[("x-tracking-signature", signature.as_str())],
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(fixture.engine.queue.counts(WEBHOOK_QUEUE).unwrap().waiting, 1);
}

#[tokio::test]
async fn test_unsigned_tracking_webhook_is_acknowledged_but_dropped() {
    let fixture = TestFixture::new();
    let body = br#"{"tracking_number":"1Z999","status":"delivered"}"#;

    let unsigned = fixture.post_raw("/api/v1/webhooks/tracking", body, &[]).await;
    assert_status!(unsigned, StatusCode::OK);
    assert_eq!(unsigned.body["received"], true);

    let forged = fixture
        .post_raw(
            "/api/v1/webhooks/tracking",
            body,
            &[("x-tracking-signature", "deadbeef")],
        )
        .await;
    assert_status!(forged, StatusCode::OK);

    assert_eq!(fixture.engine.queue.counts(WEBHOOK_QUEUE).unwrap().waiting, 0);
}

// =============================================================================
// Shipping quotes
// =============================================================================

#[tokio::test]
async fn test_shipping_quotes_require_items() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/shipping/quotes",
            json!({ "address": fixtures::address(), "items": [] }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Returns
// =============================================================================

#[tokio::test]
async fn test_return_lifecycle_with_partial_refund() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/orders", json!({ "order": fixtures::order("o1", BRAND) }))
        .await;

    let created = fixture
        .post(
            "/api/v1/returns",
            json!({
                "order_id": "o1",
                "reason": "Print is smudged",
                "items": [{ "line_item_id": "o1-li-1", "quantity": 1 }],
            }),
        )
        .await;
    assert_status!(created, StatusCode::CREATED);
    assert_eq!(created.body["status"], "REQUESTED");
    let return_id = created.body["id"].as_str().unwrap().to_string();

    // Refunds only go through the refund endpoint
    let direct = fixture
        .post(
            &format!("/api/v1/returns/{}/status", return_id),
            json!({ "status": "REFUNDED" }),
        )
        .await;
    assert_status!(direct, StatusCode::BAD_REQUEST);

    let approved = fixture
        .post(
            &format!("/api/v1/returns/{}/status", return_id),
            json!({ "status": "APPROVED", "notes": "Photo confirms defect" }),
        )
        .await;
    assert_status!(approved, StatusCode::OK);
    assert_eq!(approved.body["status"], "APPROVED");

    // Skipping back to REQUESTED is not a legal move
    let backwards = fixture
        .post(
            &format!("/api/v1/returns/{}/status", return_id),
            json!({ "status": "REQUESTED" }),
        )
        .await;
    assert_status!(backwards, StatusCode::CONFLICT);

    let refunded = fixture
        .post(
            &format!("/api/v1/returns/{}/refund", return_id),
            json!({ "amount_cents": 1000 }),
        )
        .await;
    assert_status!(refunded, StatusCode::OK);
    assert_eq!(refunded.body["status"], "REFUNDED");
    assert_eq!(refunded.body["refund_status"], "PARTIAL");
    assert_eq!(refunded.body["refund_amount_cents"], 1000);

    let list = fixture.get("/api/v1/returns?status=REFUNDED").await;
    assert_status!(list, StatusCode::OK);
    assert_eq!(list.body["total"], 1);

    let hidden = fixture
        .get_as("brand-b", &format!("/api/v1/returns/{}", return_id))
        .await;
    assert_status!(hidden, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_return_for_unknown_line_item_is_rejected() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/orders", json!({ "order": fixtures::order("o1", BRAND) }))
        .await;

    let response = fixture
        .post(
            "/api/v1/returns",
            json!({
                "order_id": "o1",
                "reason": "Wrong size",
                "items": [{ "line_item_id": "someone-elses", "quantity": 1 }],
            }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let other_brand = fixture
        .post_as(
            "brand-b",
            "/api/v1/returns",
            json!({
                "order_id": "o1",
                "reason": "Wrong size",
                "items": [{ "line_item_id": "o1-li-1", "quantity": 1 }],
            }),
        )
        .await;
    assert_status!(other_brand, StatusCode::NOT_FOUND);
}
