//! Inbound webhooks: verified at the edge, queued, applied by the webhook worker.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::jobs::{WebhookJob, WEBHOOK_QUEUE};
use crate::fulfillment::FulfillmentService;
use crate::metrics;
use crate::provider::{verify_signature, ProviderRegistry, ProviderSlug};
use crate::queue::{EnqueueOptions, JobQueue, QueueError};
use crate::tracking::TrackingService;

/// Header the tracking aggregator puts its HMAC signature in.
pub const TRACKING_SIGNATURE_HEADER: &str = "x-tracking-signature";

/// What happened to an inbound webhook. Callers answer 200 either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued { job_id: String },
    Dropped { reason: String },
}

impl IngestOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, IngestOutcome::Queued { .. })
    }

    fn dropped(source: &str, result: &str, reason: impl Into<String>) -> Self {
        metrics::WEBHOOKS_RECEIVED
            .with_label_values(&[source, result])
            .inc();
        IngestOutcome::Dropped {
            reason: reason.into(),
        }
    }
}

/// Accepts webhook bodies and applies queued webhook jobs.
pub struct WebhookIngest {
    queue: Arc<dyn JobQueue>,
    providers: Arc<ProviderRegistry>,
    tracking: Arc<TrackingService>,
    fulfillments: Arc<FulfillmentService>,
    require_signature: bool,
    tracking_secret: Option<String>,
}

impl WebhookIngest {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        providers: Arc<ProviderRegistry>,
        tracking: Arc<TrackingService>,
        fulfillments: Arc<FulfillmentService>,
        require_signature: bool,
    ) -> Self {
        Self {
            queue,
            providers,
            tracking,
            fulfillments,
            require_signature,
            tracking_secret: None,
        }
    }

    pub fn with_tracking_secret(mut self, secret: Option<String>) -> Self {
        self.tracking_secret = secret;
        self
    }

    /// Verify and queue a tracking payload.
    ///
    /// `signature` is the value of [`TRACKING_SIGNATURE_HEADER`], if sent.
    pub fn ingest_tracking(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome, QueueError> {
        if !verify_signature(self.tracking_secret.as_deref(), body, signature) {
            if self.require_signature {
                warn!("Tracking webhook signature invalid; dropped");
                return Ok(IngestOutcome::dropped(
                    "tracking",
                    "invalid_signature",
                    "invalid signature",
                ));
            }
            warn!("Accepting unverified tracking webhook");
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Unparseable tracking webhook dropped");
                return Ok(IngestOutcome::dropped("tracking", "ignored", "invalid JSON"));
            }
        };
        let job_id = self.enqueue(&WebhookJob::Tracking { payload })?;
        debug!(job_id = %job_id, "Tracking webhook queued");
        Ok(IngestOutcome::Queued { job_id })
    }

    /// Verify and queue a provider payload.
    ///
    /// `signature` is the value of the provider's signature header, if sent.
    pub fn ingest_provider(
        &self,
        slug: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome, QueueError> {
        let source = slug.to_ascii_lowercase();
        let Some(provider) = ProviderSlug::from_str(slug)
            .ok()
            .and_then(|s| self.providers.get(s))
        else {
            warn!(provider = %slug, "Webhook for unconfigured provider dropped");
            return Ok(IngestOutcome::dropped(&source, "ignored", "unknown provider"));
        };

        if !provider.verify_webhook(body, signature) {
            if self.require_signature {
                warn!(provider = %source, "Webhook signature invalid; dropped");
                return Ok(IngestOutcome::dropped(
                    &source,
                    "invalid_signature",
                    "invalid signature",
                ));
            }
            warn!(provider = %source, "Accepting unverified webhook");
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                warn!(provider = %source, error = %e, "Unparseable provider webhook dropped");
                return Ok(IngestOutcome::dropped(&source, "ignored", "invalid JSON"));
            }
        };

        let job_id = self.enqueue(&WebhookJob::Provider {
            provider: provider.slug(),
            payload,
        })?;
        debug!(provider = %source, job_id = %job_id, "Provider webhook queued");
        Ok(IngestOutcome::Queued { job_id })
    }

    /// Header the provider puts its signature in. `None` if not configured.
    pub fn signature_header(&self, slug: &str) -> Option<&'static str> {
        ProviderSlug::from_str(slug)
            .ok()
            .and_then(|s| self.providers.get(s))
            .map(|p| p.signature_header())
    }

    fn enqueue(&self, job: &WebhookJob) -> Result<String, QueueError> {
        let payload = serde_json::to_value(job).map_err(|e| QueueError::Payload(e.to_string()))?;
        self.queue
            .enqueue(WEBHOOK_QUEUE, &payload, EnqueueOptions::default())
    }

    /// Apply one queued webhook. Payloads that match nothing are not errors.
    pub async fn process(&self, job: WebhookJob) -> anyhow::Result<()> {
        match job {
            WebhookJob::Tracking { payload } => {
                // Emits TRACKING_UPDATED; the tracking handler applies it.
                self.tracking.handle_webhook(&payload).await;
            }
            WebhookJob::Provider { provider, payload } => {
                let Some(adapter) = self.providers.get(provider) else {
                    warn!(provider = %provider, "Queued webhook for unconfigured provider");
                    return Ok(());
                };
                let Some(event) = adapter.parse_webhook(&payload) else {
                    debug!(provider = %provider, "Provider webhook carried no order event");
                    metrics::WEBHOOKS_RECEIVED
                        .with_label_values(&[provider.as_str(), "ignored"])
                        .inc();
                    return Ok(());
                };
                match self.fulfillments.apply_provider_event(provider, &event).await? {
                    Some(f) => {
                        info!(
                            fulfillment_id = %f.id,
                            event_type = %event.event_type,
                            status = %f.status,
                            "Provider webhook applied"
                        );
                        metrics::WEBHOOKS_RECEIVED
                            .with_label_values(&[provider.as_str(), "accepted"])
                            .inc();
                    }
                    None => {
                        debug!(event_type = %event.event_type, "Provider webhook matched no fulfillment");
                        metrics::WEBHOOKS_RECEIVED
                            .with_label_values(&[provider.as_str(), "ignored"])
                            .inc();
                    }
                }
            }
        }
        Ok(())
    }
}
