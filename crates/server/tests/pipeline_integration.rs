//! Pipeline lifecycle through the HTTP API.
//!
//! Orders go in through `POST /orders`; the tests drive the stage queues by
//! hand and check what the API reports at each step.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use pce_core::fulfillment::FulfillmentStatus;
use pce_core::testing::MockProvider;

use common::{fixtures, TestFixture, BRAND};

async fn submit(fixture: &TestFixture, order_id: &str) -> String {
    let response = fixture
        .post(
            "/api/v1/orders",
            json!({ "order": fixtures::order(order_id, BRAND) }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    response.body["pipeline_id"].as_str().unwrap().to_string()
}

/// Run the order until the factory has it and return the external order id.
async fn run_to_fulfillment(fixture: &TestFixture, pipeline_id: &str) -> String {
    fixture.engine.run_until_idle().await;
    let response = fixture.get(&format!("/api/v1/pipelines/{}", pipeline_id)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["current_stage"], "FULFILLMENT");

    fixture
        .engine
        .fulfillment_for(pipeline_id)
        .and_then(|f| f.external_order_id)
        .expect("Fulfillment should be submitted")
}

// =============================================================================
// Intake
// =============================================================================

#[tokio::test]
async fn test_order_intake_is_idempotent() {
    let fixture = TestFixture::new();
    let body = json!({ "order": fixtures::order("o1", BRAND) });

    let first = fixture.post("/api/v1/orders", body.clone()).await;
    assert_status!(first, StatusCode::CREATED);
    assert_eq!(first.body["created"], true);
    assert_eq!(first.body["status"], "IN_PROGRESS");
    assert_eq!(first.body["current_stage"], "VALIDATION");

    let second = fixture.post("/api/v1/orders", body).await;
    assert_status!(second, StatusCode::OK);
    assert_eq!(second.body["created"], false);
    assert_eq!(second.body["pipeline_id"], first.body["pipeline_id"]);

    let list = fixture.get("/api/v1/pipelines").await;
    assert_status!(list, StatusCode::OK);
    assert_eq!(list.body["total"], 1);
}

#[tokio::test]
async fn test_order_for_another_brand_is_forbidden() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/orders",
            json!({ "order": fixtures::order("o1", "brand-b") }),
        )
        .await;
    assert_status!(response, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_pipeline_for_recorded_order() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;

    // Active pipeline already exists for the order
    let response = fixture
        .post("/api/v1/pipelines", json!({ "order_id": "o1" }))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["pipeline_id"], pipeline_id.as_str());

    let missing = fixture
        .post("/api/v1/pipelines", json!({ "order_id": "nope" }))
        .await;
    assert_status!(missing, StatusCode::NOT_FOUND);

    // Another brand cannot see the order
    let other = fixture
        .post_as("brand-b", "/api/v1/pipelines", json!({ "order_id": "o1" }))
        .await;
    assert_status!(other, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pipelines_are_isolated_by_brand() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;

    let own = fixture.get(&format!("/api/v1/pipelines/{}", pipeline_id)).await;
    assert_status!(own, StatusCode::OK);
    assert_eq!(own.body["order_id"], "o1");
    assert_eq!(own.body["brand_id"], BRAND);

    let other = fixture
        .get_as("brand-b", &format!("/api/v1/pipelines/{}", pipeline_id))
        .await;
    assert_status!(other, StatusCode::NOT_FOUND);

    let list = fixture.get_as("brand-b", "/api/v1/pipelines").await;
    assert_status!(list, StatusCode::OK);
    assert_eq!(list.body["total"], 0);

    let cancel = fixture
        .post_as(
            "brand-b",
            &format!("/api/v1/pipelines/{}/cancel", pipeline_id),
            json!({}),
        )
        .await;
    assert_status!(cancel, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_pipelines_filters() {
    let fixture = TestFixture::new();
    submit(&fixture, "o1").await;
    submit(&fixture, "o2").await;

    let by_order = fixture.get("/api/v1/pipelines?order_id=o2").await;
    assert_status!(by_order, StatusCode::OK);
    assert_eq!(by_order.body["total"], 1);
    assert_eq!(by_order.body["items"][0]["order_id"], "o2");

    let by_stage = fixture.get("/api/v1/pipelines?stage=validation").await;
    assert_status!(by_stage, StatusCode::OK);
    assert_eq!(by_stage.body["total"], 2);

    let completed = fixture.get("/api/v1/pipelines?status=COMPLETED").await;
    assert_status!(completed, StatusCode::OK);
    assert_eq!(completed.body["total"], 0);

    let bad = fixture.get("/api/v1/pipelines?status=sideways").await;
    assert_status!(bad, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Operator actions
// =============================================================================

#[tokio::test]
async fn test_advance_backward_conflicts() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;
    run_to_fulfillment(&fixture, &pipeline_id).await;

    let response = fixture
        .post(
            &format!("/api/v1/pipelines/{}/advance", pipeline_id),
            json!({ "stage": "RENDER" }),
        )
        .await;
    assert_status!(response, StatusCode::CONFLICT);
    assert!(response.body["error"].is_string());

    // Advancing to the current stage is a no-op
    let same = fixture
        .post(
            &format!("/api/v1/pipelines/{}/advance", pipeline_id),
            json!({ "stage": "FULFILLMENT" }),
        )
        .await;
    assert_status!(same, StatusCode::OK);
    assert_eq!(same.body["current_stage"], "FULFILLMENT");
}

#[tokio::test]
async fn test_cancel_pipeline_with_reason() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;
    let external_id = run_to_fulfillment(&fixture, &pipeline_id).await;

    let response = fixture
        .post(
            &format!("/api/v1/pipelines/{}/cancel", pipeline_id),
            json!({ "reason": "Customer changed their mind" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["pipeline"]["status"], "CANCELLED");
    assert_eq!(response.body["provider_cancelled"], true);
    assert_eq!(fixture.engine.provider.cancelled_orders(), vec![external_id]);

    let view = fixture.get(&format!("/api/v1/pipelines/{}", pipeline_id)).await;
    assert_eq!(view.body["cancel_reason"], "Customer changed their mind");

    // Terminal pipelines cannot be retried
    let retry = fixture
        .post(&format!("/api/v1/pipelines/{}/retry", pipeline_id), json!({}))
        .await;
    assert_status!(retry, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_without_body_uses_default_reason() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;

    let response = fixture
        .post(&format!("/api/v1/pipelines/{}/cancel", pipeline_id), json!({}))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(
        response.body["pipeline"]["cancel_reason"],
        "Cancelled by operator"
    );
}

// =============================================================================
// Shipping and delivery
// =============================================================================

#[tokio::test]
async fn test_webhooks_carry_pipeline_to_completion() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;
    let external_id = run_to_fulfillment(&fixture, &pipeline_id).await;

    let body = serde_json::to_vec(&json!({
        "type": "package_shipped",
        "order_id": external_id,
        "status": "shipped",
        "carrier": "UPS",
        "tracking_number": "1Z555",
    }))
    .unwrap();
    let signature = MockProvider::sign(&body);
    let response = fixture
        .post_raw(
            "/api/v1/webhooks/providers/printful",
            &body,
            &[("x-mock-signature", signature.as_str())],
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["received"], true);

    fixture.engine.run_until_idle().await;
    let view = fixture.get(&format!("/api/v1/pipelines/{}", pipeline_id)).await;
    assert_eq!(view.body["current_stage"], "SHIPPED");

    let tracking = fixture.get("/api/v1/tracking/1Z555").await;
    assert_status!(tracking, StatusCode::OK);
    assert_eq!(tracking.body["tracking_number"], "1Z555");
    let hidden = fixture.get_as("brand-b", "/api/v1/tracking/1Z555").await;
    assert_status!(hidden, StatusCode::NOT_FOUND);

    let body = serde_json::to_vec(&json!({ "tracking_number": "1Z555", "status": "delivered" }))
        .unwrap();
    let signature = pce_core::testing::sign_tracking(&body);
    let response = fixture
        .post_raw(
            "/api/v1/webhooks/tracking",
            &body,
            &[("x-tracking-signature", signature.as_str())],
        )
        .await;
    assert_status!(response, StatusCode::OK);
    fixture.engine.run_until_idle().await;

    let engine = &fixture.engine;
    let delivered = engine
        .eventually(|| {
            engine
                .fulfillment_for(&pipeline_id)
                .map(|f| f.status == FulfillmentStatus::Delivered)
                .unwrap_or(false)
        })
        .await;
    assert!(delivered);

    engine.run_until_idle().await;
    let view = fixture.get(&format!("/api/v1/pipelines/{}", pipeline_id)).await;
    assert_eq!(view.body["status"], "COMPLETED");
    assert_eq!(view.body["progress"], 100);
}

#[tokio::test]
async fn test_manual_shipment_requires_tracking_details() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;
    run_to_fulfillment(&fixture, &pipeline_id).await;
    let fulfillment_id = fixture.engine.fulfillment_for(&pipeline_id).unwrap().id;

    let blank = fixture
        .post(
            &format!("/api/v1/fulfillments/{}/ship", fulfillment_id),
            json!({ "carrier": "", "tracking_number": "" }),
        )
        .await;
    assert_status!(blank, StatusCode::BAD_REQUEST);

    let shipped = fixture
        .post(
            &format!("/api/v1/fulfillments/{}/ship", fulfillment_id),
            json!({ "carrier": "USPS", "tracking_number": "9400100000000000000000" }),
        )
        .await;
    assert_status!(shipped, StatusCode::OK);
    assert_eq!(shipped.body["status"], "SHIPPED");
    assert_eq!(shipped.body["carrier"], "USPS");

    let list = fixture
        .get(&format!("/api/v1/fulfillments?pipeline_id={}", pipeline_id))
        .await;
    assert_status!(list, StatusCode::OK);
    assert_eq!(list.body["total"], 1);

    let other = fixture
        .get_as("brand-b", &format!("/api/v1/fulfillments/{}", fulfillment_id))
        .await;
    assert_status!(other, StatusCode::NOT_FOUND);
}

// =============================================================================
// Dashboard and events
// =============================================================================

#[tokio::test]
async fn test_dashboard_counts_only_own_brand() {
    let fixture = TestFixture::new();
    submit(&fixture, "o1").await;
    submit(&fixture, "o2").await;

    let response = fixture.get("/api/v1/dashboard").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["stats"]["total"], 2);
    assert_eq!(response.body["recent"].as_array().unwrap().len(), 2);
    assert!(response.body["queues"].is_array());

    let other = fixture.get_as("brand-b", "/api/v1/dashboard").await;
    assert_status!(other, StatusCode::OK);
    assert_eq!(other.body["stats"]["total"], 0);
}

#[tokio::test]
async fn test_events_are_recorded_per_brand() {
    let fixture = TestFixture::new();
    let pipeline_id = submit(&fixture, "o1").await;

    // The event log is written on the dispatcher task
    let path = format!(
        "/api/v1/events?event_type=pipeline_created&pipeline_id={}",
        pipeline_id
    );
    let mut response = fixture.get(&path).await;
    for _ in 0..100 {
        if response.body["total"] == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        response = fixture.get(&path).await;
    }
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["events"][0]["event_type"], "PIPELINE_CREATED");

    let other = fixture.get_as("brand-b", "/api/v1/events").await;
    assert_status!(other, StatusCode::OK);
    assert_eq!(other.body["total"], 0);
}
