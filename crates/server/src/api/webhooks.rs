//! Inbound webhook endpoints.
//!
//! These routes are not authenticated. Payloads are checked against the
//! sender's HMAC signature before they are queued. Verification and parse
//! outcomes always answer 200 so senders do not learn what was rejected.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use pce_core::{IngestOutcome, QueueError, TRACKING_SIGNATURE_HEADER};

use super::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

impl From<IngestOutcome> for WebhookAck {
    fn from(_: IngestOutcome) -> Self {
        WebhookAck { received: true }
    }
}

fn ack(result: Result<IngestOutcome, QueueError>) -> ApiResult<Json<WebhookAck>> {
    // Only a failed queue write is reported; the sender then redelivers.
    Ok(Json(result?.into()))
}

/// Carrier tracking payloads, signed by the tracking aggregator
pub async fn tracking_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(TRACKING_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    ack(state.webhooks().ingest_tracking(&body, signature))
}

/// POD provider payloads, signed in the provider's own header
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let webhooks = state.webhooks();
    let signature = webhooks
        .signature_header(&slug)
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok());
    ack(webhooks.ingest_provider(&slug, &body, signature))
}
