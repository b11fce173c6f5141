//! Pipeline lifecycle integration tests.
//!
//! These drive the full stack (orchestrator, stage workers, fulfillment,
//! tracking, returns) against in-memory SQLite and the mock provider:
//! - order intake and idempotency
//! - stage ordering
//! - cancellation surviving provider failures
//! - webhook-driven delivery
//! - refunds and failed-job recovery

use serde_json::json;

use pce_core::{
    events::{EventFilter, EventLog},
    fulfillment::FulfillmentStatus,
    orchestrator::{OrchestratorError, MANUFACTURING_QUEUE, PIPELINE_QUEUE, RENDER_QUEUE},
    order::{OrderStore, PaymentStatus},
    pipeline::{PipelineOptions, PipelineStage, PipelineStatus},
    provider::ProviderError,
    queue::JobQueue,
    returns::{NewReturn, RefundStatus, ReturnItem, ReturnStatus},
    testing::{fixtures, TestEngine},
};

fn engine() -> TestEngine {
    TestEngine::new().expect("Failed to build test engine")
}

/// Run a pipeline until the factory has the order and report its external id.
async fn run_to_fulfillment(engine: &TestEngine, order_id: &str) -> (String, String) {
    let created = engine.submit(order_id, "b1").await.unwrap();
    engine.run_until_idle().await;
    let p = engine.pipeline(&created.pipeline_id).unwrap();
    assert_eq!(p.current_stage, PipelineStage::Fulfillment);
    let external_id = engine
        .fulfillment_for(&created.pipeline_id)
        .and_then(|f| f.external_order_id)
        .expect("Fulfillment should be submitted");
    (created.pipeline_id, external_id)
}

#[tokio::test]
async fn test_process_order_is_idempotent() {
    let engine = engine();

    let first = engine.submit("o1", "b1").await.unwrap();
    assert!(first.created);
    assert_eq!(first.status, PipelineStatus::InProgress);
    assert_eq!(first.current_stage, PipelineStage::Validation);
    assert!(first.estimated_completion.is_some());

    let second = engine
        .orchestrator
        .process_order("o1", "b1", PipelineOptions::default())
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.pipeline_id, first.pipeline_id);

    // One job on the entry queue, not two.
    assert_eq!(engine.queue.counts(PIPELINE_QUEUE).unwrap().waiting, 1);
}

#[tokio::test]
async fn test_process_order_for_other_brand_is_not_found() {
    let engine = engine();
    engine.submit("o1", "b1").await.unwrap();

    let result = engine
        .orchestrator
        .process_order("o1", "b2", PipelineOptions::default())
        .await;
    assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
}

#[tokio::test]
async fn test_advance_cannot_move_backward() {
    let engine = engine();
    let created = engine.submit("o1", "b1").await.unwrap();
    let id = created.pipeline_id;

    for stage in [
        PipelineStage::Render,
        PipelineStage::Manufacturing,
        PipelineStage::Fulfillment,
        PipelineStage::Shipped,
    ] {
        engine
            .orchestrator
            .advance_stage(&id, stage, "manual")
            .await
            .unwrap();
    }

    let result = engine
        .orchestrator
        .advance_stage(&id, PipelineStage::Fulfillment, "manual")
        .await;
    assert!(matches!(result, Err(OrchestratorError::InvalidTransition(_))));

    // Skipping ahead is rejected too; repeating the current stage is a no-op.
    let p = engine.pipeline(&id).unwrap();
    let again = engine
        .orchestrator
        .advance_stage(&id, PipelineStage::Shipped, "worker")
        .await
        .unwrap();
    assert_eq!(again.version, p.version);
    assert_eq!(p.stage_history.len(), 5);
}

#[tokio::test]
async fn test_cancel_succeeds_when_provider_cancel_fails() {
    let engine = engine();
    let (pipeline_id, external_id) = run_to_fulfillment(&engine, "o1").await;

    engine
        .provider
        .fail_cancel(ProviderError::Connection("factory unreachable".into()));
    let result = engine
        .orchestrator
        .cancel_pipeline(&pipeline_id, "Customer requested")
        .await
        .unwrap();

    assert_eq!(result.pipeline.status, PipelineStatus::Cancelled);
    assert_eq!(result.pipeline.cancel_reason.as_deref(), Some("Customer requested"));
    assert_eq!(result.provider_cancelled, Some(false));
    assert!(engine.provider.cancelled_orders().is_empty());

    let f = engine.fulfillment_for(&pipeline_id).unwrap();
    assert_eq!(f.status, FulfillmentStatus::Cancelled);

    // A late shipment webhook for the cancelled order changes nothing.
    engine.provider.set_order_status(
        &external_id,
        FulfillmentStatus::Shipped,
        Some(fixtures::shipment("UPS", "1Z-LATE")),
    );
    engine.run_until_idle().await;
    assert_eq!(
        engine.pipeline(&pipeline_id).unwrap().status,
        PipelineStatus::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_forwards_to_provider() {
    let engine = engine();
    let (pipeline_id, external_id) = run_to_fulfillment(&engine, "o1").await;

    let first = engine
        .orchestrator
        .cancel_pipeline(&pipeline_id, "duplicate order")
        .await
        .unwrap();
    assert_eq!(first.provider_cancelled, Some(true));
    assert_eq!(engine.provider.cancelled_orders(), vec![external_id]);

    let second = engine
        .orchestrator
        .cancel_pipeline(&pipeline_id, "duplicate order")
        .await
        .unwrap();
    assert_eq!(second.pipeline.version, first.pipeline.version);
    assert_eq!(engine.provider.cancelled_orders().len(), 1);
}

#[tokio::test]
async fn test_cancel_after_ambiguous_submission_cancels_placed_order() {
    let engine = engine();
    engine
        .provider
        .fail_next_create_after_placing(ProviderError::Timeout("response lost".into()));
    let created = engine.submit("o1", "b1").await.unwrap();

    // Validation, render, then the manufacturing attempt that times out.
    for queue in [PIPELINE_QUEUE, RENDER_QUEUE, MANUFACTURING_QUEUE] {
        engine.processor.process_next(queue).await.unwrap();
    }
    let draft = engine.fulfillment_for(&created.pipeline_id).unwrap();
    assert!(draft.submission_uncertain);
    assert_eq!(engine.provider.create_count(), 1);
    let placed = engine.provider.created_orders()[0].external_order_id.clone();

    let result = engine
        .orchestrator
        .cancel_pipeline(&created.pipeline_id, "customer changed mind")
        .await
        .unwrap();
    assert_eq!(result.provider_cancelled, Some(true));
    assert_eq!(engine.provider.cancelled_orders(), vec![placed]);

    engine.run_until_idle().await;
    assert_eq!(engine.provider.create_count(), 1);
    assert_eq!(
        engine.fulfillment_for(&created.pipeline_id).unwrap().status,
        FulfillmentStatus::Cancelled
    );
}

#[tokio::test]
async fn test_tracking_webhook_completes_pipeline() {
    let engine = engine();
    let (pipeline_id, external_id) = run_to_fulfillment(&engine, "o1").await;

    // Provider announces the shipment through a signed webhook.
    let body = serde_json::to_vec(&json!({
        "type": "package_shipped",
        "order_id": external_id,
        "status": "shipped",
        "carrier": "UPS",
        "tracking_number": "1Z555",
    }))
    .unwrap();
    let signature = pce_core::testing::MockProvider::sign(&body);
    let outcome = engine
        .webhooks
        .ingest_provider("printful", &body, Some(&signature))
        .unwrap();
    assert!(outcome.is_queued());

    engine.run_until_idle().await;
    assert_eq!(
        engine.pipeline(&pipeline_id).unwrap().current_stage,
        PipelineStage::Shipped
    );
    assert!(engine.tracking.is_subscribed("1Z555", "UPS").await);

    // The carrier reports delivery; the tracking handler applies it.
    let body = serde_json::to_vec(&json!({"tracking_number": "1Z555", "status": "Delivered"})).unwrap();
    let unsigned = engine.webhooks.ingest_tracking(&body, None).unwrap();
    assert!(!unsigned.is_queued());
    let signature = pce_core::testing::sign_tracking(&body);
    assert!(engine
        .webhooks
        .ingest_tracking(&body, Some(&signature))
        .unwrap()
        .is_queued());
    engine.run_until_idle().await;
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
    let p = engine.pipeline(&pipeline_id).unwrap();
    assert_eq!(p.status, PipelineStatus::Completed);
    assert_eq!(p.progress(), 100);
    assert!(p.completed_at.is_some());
    // Delivered shipments leave the watch-set.
    assert!(!engine.tracking.is_subscribed("1Z555", "UPS").await);

    let completed = engine
        .eventually(|| {
            engine
                .event_log
                .count(
                    &EventFilter::new()
                        .with_pipeline(pipeline_id.clone())
                        .with_event_type("PIPELINE_COMPLETED"),
                )
                .unwrap_or(0)
                == 1
        })
        .await;
    assert!(completed);
}

#[tokio::test]
async fn test_zero_refund_is_recorded_as_rejected() {
    let engine = engine();
    engine.orders.record(&fixtures::order("o1", "b1")).unwrap();

    let request = engine
        .returns
        .create_return(
            "b1",
            NewReturn {
                order_id: "o1".to_string(),
                fulfillment_id: None,
                reason: "damaged in transit".to_string(),
                items: vec![ReturnItem {
                    line_item_id: "o1-li-1".to_string(),
                    quantity: 1,
                }],
            },
        )
        .await
        .unwrap();
    engine
        .returns
        .process_return(&request.id, "b1", ReturnStatus::Approved, Some("photo checked"))
        .await
        .unwrap();

    let refunded = engine
        .returns
        .process_refund(&request.id, "b1", 0, None)
        .await
        .unwrap();
    assert_eq!(refunded.status, ReturnStatus::Refunded);
    assert_eq!(refunded.refund_status, Some(RefundStatus::Rejected));
    assert_eq!(refunded.refund_amount_cents, Some(0));
}

#[tokio::test]
async fn test_retry_failed_jobs_respects_limit() {
    let engine = engine();
    for n in 0..3 {
        let mut order = fixtures::order(&format!("unpaid-{}", n), "b1");
        order.payment_status = PaymentStatus::Pending;
        engine
            .submit_order(&order, PipelineOptions::default())
            .await
            .unwrap();
    }
    engine.run_until_idle().await;
    assert_eq!(engine.queue.counts(PIPELINE_QUEUE).unwrap().failed, 3);

    let moved = engine.queues.retry_failed_jobs(PIPELINE_QUEUE, 2).unwrap();
    assert_eq!(moved, 2);
    let counts = engine.queue.counts(PIPELINE_QUEUE).unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.waiting, 2);

    let moved = engine.queues.retry_failed_jobs(PIPELINE_QUEUE, 100).unwrap();
    assert_eq!(moved, 1);
}

#[tokio::test]
async fn test_retried_failed_job_resumes_pipeline() {
    let engine = engine();
    let mut order = fixtures::order("late-payment", "b1");
    order.payment_status = PaymentStatus::Pending;
    let created = engine
        .submit_order(&order, PipelineOptions::default())
        .await
        .unwrap();
    engine.run_until_idle().await;
    let failed = engine.pipeline(&created.pipeline_id).unwrap();
    assert_eq!(failed.status, PipelineStatus::Failed);
    assert_eq!(failed.current_stage, PipelineStage::Validation);

    // Payment clears; the operator re-drives the dead job.
    order.payment_status = PaymentStatus::Paid;
    engine.orders.record(&order).unwrap();
    assert_eq!(engine.queues.retry_failed_jobs(PIPELINE_QUEUE, 100).unwrap(), 1);
    engine.run_until_idle().await;

    let p = engine.pipeline(&created.pipeline_id).unwrap();
    assert_eq!(p.status, PipelineStatus::InProgress);
    assert_eq!(p.current_stage, PipelineStage::Fulfillment);
    assert!(p.stage_history.iter().any(|entry| entry.trigger == "retry"));
    assert_eq!(engine.queue.counts(PIPELINE_QUEUE).unwrap().failed, 0);
    assert_eq!(engine.provider.create_count(), 1);
}

#[tokio::test]
async fn test_dashboard_reports_failures() {
    let engine = engine();
    run_to_fulfillment(&engine, "good").await;
    let mut order = fixtures::order("bad", "b1");
    order.line_items.clear();
    let failed = engine
        .submit_order(&order, PipelineOptions::default())
        .await
        .unwrap();
    engine.run_until_idle().await;
    engine.queues.pause_queue(PIPELINE_QUEUE).unwrap();

    let dashboard = engine.orchestrator.get_dashboard("b1", &engine.queues).unwrap();
    assert_eq!(dashboard.stats.total, 2);
    assert_eq!(dashboard.stats.failed, 1);
    assert_eq!(dashboard.stats.in_progress, 1);
    assert_eq!(dashboard.recent.len(), 2);
    assert_eq!(dashboard.queues.len(), 6);

    let pipeline_alert = dashboard
        .alerts
        .iter()
        .find(|a| a.pipeline_id.as_deref() == Some(failed.pipeline_id.as_str()))
        .expect("Failed pipeline should raise an alert");
    assert!(pipeline_alert.message.contains("no line items"));
    assert!(dashboard
        .alerts
        .iter()
        .any(|a| a.queue.as_deref() == Some(PIPELINE_QUEUE) && a.message.contains("paused")));

    let other = engine.orchestrator.get_dashboard("b2", &engine.queues).unwrap();
    assert_eq!(other.stats.total, 0);
    assert!(other.recent.is_empty());
}
