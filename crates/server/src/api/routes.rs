use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::middleware::{auth_middleware, metrics_middleware};
use super::{dashboard, events, fulfillments, handlers, pipelines, queues, returns, webhooks};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Routes acting for a brand
    let brand_routes = Router::new()
        .route("/dashboard", get(dashboard::get_dashboard))
        // Orders and pipelines
        .route("/orders", post(pipelines::create_order))
        .route(
            "/pipelines",
            get(pipelines::list_pipelines).post(pipelines::create_pipeline),
        )
        .route("/pipelines/{id}", get(pipelines::get_pipeline))
        .route("/pipelines/{id}/advance", post(pipelines::advance_pipeline))
        .route("/pipelines/{id}/retry", post(pipelines::retry_pipeline))
        .route("/pipelines/{id}/cancel", post(pipelines::cancel_pipeline))
        // Queues
        .route("/queues", get(queues::list_queues))
        .route("/queues/{name}", get(queues::get_queue))
        .route("/queues/{name}/pause", post(queues::pause_queue))
        .route("/queues/{name}/resume", post(queues::resume_queue))
        .route("/queues/{name}/retry-failed", post(queues::retry_failed))
        // Fulfillments
        .route("/fulfillments", get(fulfillments::list_fulfillments))
        .route("/fulfillments/{id}", get(fulfillments::get_fulfillment))
        .route("/fulfillments/{id}/ship", post(fulfillments::mark_shipped))
        .route("/fulfillments/{id}/deliver", post(fulfillments::mark_delivered))
        .route("/fulfillments/{id}/cancel", post(fulfillments::cancel_fulfillment))
        .route("/fulfillments/{id}/status", post(fulfillments::update_status))
        .route("/fulfillments/{id}/sync", post(fulfillments::sync_fulfillment))
        .route("/shipping/quotes", post(fulfillments::shipping_quotes))
        .route("/tracking/{tracking_number}", get(fulfillments::get_tracking))
        // Returns
        .route(
            "/returns",
            get(returns::list_returns).post(returns::create_return),
        )
        .route("/returns/{id}", get(returns::get_return))
        .route("/returns/{id}/status", post(returns::update_return_status))
        .route("/returns/{id}/refund", post(returns::refund_return))
        // Event log
        .route("/events", get(events::query_events))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Unauthenticated
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/webhooks/tracking", post(webhooks::tracking_webhook))
        .route("/webhooks/providers/{slug}", post(webhooks::provider_webhook));

    let api_routes = brand_routes.merge(public_routes).with_state(state.clone());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
