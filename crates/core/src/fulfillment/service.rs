use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::store::FulfillmentStore;
use super::types::{
    Fulfillment, FulfillmentError, FulfillmentFilter, FulfillmentStatus, ShipmentDetails,
};
use crate::events::{DomainEvent, EventHandle};
use crate::order::{OrderError, OrderStore};
use crate::pipeline::{PipelineStatus, PipelineStore};
use crate::provider::{
    OrderItem, OrderMetadata, PodProvider, ProviderOrderStatus, ProviderRegistry, ProviderShipment,
    ProviderSlug, ProviderWebhookEvent, ShippingAddress, ShippingRate,
};
use crate::storage::StoreError;
use crate::tracking::TrackingService;

const MAX_CONFLICT_RETRIES: usize = 5;

impl From<OrderError> for FulfillmentError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NotFound(id) => FulfillmentError::NotFound(format!("order {}", id)),
            OrderError::Store(e) => FulfillmentError::Store(e),
        }
    }
}

/// Outcome of cancelling a fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentCancellation {
    pub fulfillment: Fulfillment,
    /// Whether the provider acknowledged the cancellation.
    pub provider_cancelled: bool,
    pub provider_message: Option<String>,
}

/// Creates and updates fulfillments, talking to the brand's provider.
pub struct FulfillmentService {
    store: Arc<dyn FulfillmentStore>,
    pipelines: Arc<dyn PipelineStore>,
    orders: Arc<dyn OrderStore>,
    providers: Arc<ProviderRegistry>,
    tracking: Option<Arc<TrackingService>>,
    events: Option<EventHandle>,
}

/// Provider side of a cancellation.
struct RemoteCancel {
    cancelled: bool,
    message: Option<String>,
    /// Provider order found by reference for an ambiguous submission.
    adopted_order_id: Option<String>,
}

impl RemoteCancel {
    fn nothing_placed() -> Self {
        Self {
            cancelled: true,
            message: None,
            adopted_order_id: None,
        }
    }

    fn failed(current: &Fulfillment, message: String) -> Self {
        warn!(fulfillment_id = %current.id, error = %message, "Provider cancel failed");
        Self {
            cancelled: false,
            message: Some(message),
            adopted_order_id: None,
        }
    }
}

impl FulfillmentService {
    pub fn new(
        store: Arc<dyn FulfillmentStore>,
        pipelines: Arc<dyn PipelineStore>,
        orders: Arc<dyn OrderStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            store,
            pipelines,
            orders,
            providers,
            tracking: None,
            events: None,
        }
    }

    pub fn with_tracking(mut self, tracking: Arc<TrackingService>) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_fulfillment(&self, id: &str, brand_id: &str) -> Result<Fulfillment, FulfillmentError> {
        self.store
            .get(id)?
            .filter(|f| f.brand_id == brand_id)
            .ok_or_else(|| FulfillmentError::NotFound(format!("fulfillment {}", id)))
    }

    /// Fulfillments for a brand, with the total matching count.
    pub fn list_fulfillments(
        &self,
        brand_id: &str,
        filter: FulfillmentFilter,
    ) -> Result<(Vec<Fulfillment>, i64), FulfillmentError> {
        let filter = filter.with_brand(brand_id);
        Ok((self.store.list(&filter)?, self.store.count(&filter)?))
    }

    pub fn find_for_pipeline(&self, pipeline_id: &str) -> Result<Option<Fulfillment>, FulfillmentError> {
        Ok(self.store.find_active_by_pipeline(pipeline_id)?)
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Submit the pipeline's order to the brand's provider.
    ///
    /// The record is persisted as DRAFT before the provider is called. If a
    /// previous attempt ended ambiguously, the provider is asked for an order
    /// carrying our reference before anything is created, so a retry never
    /// produces a second factory order.
    pub async fn create_fulfillment(
        &self,
        pipeline_id: &str,
        brand_id: &str,
    ) -> Result<Fulfillment, FulfillmentError> {
        let pipeline = self
            .pipelines
            .get(pipeline_id)?
            .filter(|p| p.brand_id == brand_id)
            .ok_or_else(|| FulfillmentError::NotFound(format!("pipeline {}", pipeline_id)))?;
        if pipeline.status == PipelineStatus::Cancelled {
            return Err(FulfillmentError::PipelineCancelled(pipeline_id.to_string()));
        }

        let draft = match self.store.find_active_by_pipeline(pipeline_id)? {
            Some(existing) if existing.status == FulfillmentStatus::Failed => {
                info!(fulfillment_id = %existing.id, "Resubmitting failed fulfillment");
                self.mutate(&existing.id, |f| Ok(f.reset_for_resubmission(Utc::now())))?
                    .1
            }
            Some(existing) if existing.status != FulfillmentStatus::Draft => {
                debug!(fulfillment_id = %existing.id, "Fulfillment already submitted");
                return Ok(existing);
            }
            Some(existing) => existing,
            None => {
                let provider = self.providers.for_brand(brand_id)?;
                let draft = Fulfillment::draft(
                    pipeline_id,
                    &pipeline.order_id,
                    brand_id,
                    provider.slug(),
                );
                match self.store.insert(&draft) {
                    Ok(()) => draft,
                    // A concurrent worker created it first.
                    Err(StoreError::Constraint(_)) => self
                        .store
                        .find_active_by_pipeline(pipeline_id)?
                        .ok_or_else(|| StoreError::Conflict(format!("fulfillment for {}", pipeline_id)))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let provider = self.provider_for(draft.provider)?;

        if draft.submission_uncertain {
            if let Some(found) = provider.find_order_by_reference(&draft.reference).await? {
                info!(
                    fulfillment_id = %draft.id,
                    external_order_id = %found.external_order_id,
                    "Adopting provider order from an earlier ambiguous submission"
                );
                let (_, adopted) = self.mutate(&draft.id, |f| {
                    f.submission_uncertain = false;
                    f.external_order_id = Some(found.external_order_id.clone());
                    f.provider_status = Some(found.raw_status.clone());
                    f.transition(found.status, "reconciled", Utc::now());
                    Ok(true)
                })?;
                self.emit_created(&adopted).await;
                return Ok(adopted);
            }
            debug!(fulfillment_id = %draft.id, "No provider order for reference; submitting");
        }

        let order = self.orders.require(&pipeline.order_id)?;
        let rendered: Vec<(String, String)> = pipeline
            .artifacts
            .iter()
            .map(|a| (a.line_item_id.clone(), a.file_url.clone()))
            .collect();
        let items = order.order_items(&rendered);
        let metadata = OrderMetadata {
            reference: draft.reference.clone(),
            order_id: order.order_id.clone(),
            brand_id: brand_id.to_string(),
        };

        match provider
            .create_order(&items, &order.shipping_address, &metadata)
            .await
        {
            Ok(created) => {
                let (_, submitted) = self.mutate(&draft.id, |f| {
                    f.submission_uncertain = false;
                    f.external_order_id = Some(created.external_order_id.clone());
                    f.provider_status = Some(created.raw_status.clone());
                    f.estimated_delivery = created.estimated_completion;
                    f.transition(created.status, "provider", Utc::now());
                    Ok(true)
                })?;
                info!(
                    fulfillment_id = %submitted.id,
                    provider = %submitted.provider,
                    external_order_id = ?submitted.external_order_id,
                    "Provider order created"
                );
                self.emit_created(&submitted).await;
                Ok(submitted)
            }
            Err(e) if e.is_ambiguous() => {
                warn!(fulfillment_id = %draft.id, error = %e, "Provider order outcome unknown");
                self.mutate(&draft.id, |f| {
                    f.submission_uncertain = true;
                    Ok(true)
                })?;
                Err(e.into())
            }
            Err(e) if e.is_transient() => Err(e.into()),
            Err(e) => {
                warn!(fulfillment_id = %draft.id, error = %e, "Provider rejected order");
                let message = e.to_string();
                let (before, after) = self.mutate(&draft.id, |f| {
                    f.failure_reason = Some(message.clone());
                    f.transition(FulfillmentStatus::Failed, "provider", Utc::now());
                    Ok(true)
                })?;
                self.after_change(&before, &after, "provider").await;
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Guarded status writers
    // =========================================================================

    /// Record the carrier handoff and subscribe to tracking.
    pub async fn mark_as_shipped(
        &self,
        id: &str,
        brand_id: &str,
        shipment: ShipmentDetails,
    ) -> Result<Fulfillment, FulfillmentError> {
        let current = self.get_fulfillment(id, brand_id)?;
        self.ensure_pipeline_open(&current)?;
        self.record_shipment(&current.id, &shipment, "admin").await
    }

    pub async fn mark_as_delivered(&self, id: &str, brand_id: &str) -> Result<Fulfillment, FulfillmentError> {
        let current = self.get_fulfillment(id, brand_id)?;
        self.ensure_pipeline_open(&current)?;
        self.write_status(&current, FulfillmentStatus::Delivered, "admin")
            .await
    }

    /// Move to `status` if it is progress; regressions are ignored.
    pub async fn update_fulfillment_status(
        &self,
        id: &str,
        brand_id: &str,
        status: FulfillmentStatus,
        source: &str,
    ) -> Result<Fulfillment, FulfillmentError> {
        let current = self.get_fulfillment(id, brand_id)?;
        if status != FulfillmentStatus::Cancelled {
            self.ensure_pipeline_open(&current)?;
        }
        self.write_status(&current, status, source).await
    }

    /// Cancel locally, asking the provider to cancel too. A provider refusal
    /// or error is reported but does not stop the local cancellation.
    pub async fn cancel_fulfillment(
        &self,
        id: &str,
        brand_id: &str,
        reason: &str,
    ) -> Result<FulfillmentCancellation, FulfillmentError> {
        let current = self.get_fulfillment(id, brand_id)?;
        self.cancel(current, reason).await
    }

    /// Cancel the pipeline's fulfillment unless it has already shipped.
    pub async fn cancel_for_pipeline(
        &self,
        pipeline_id: &str,
        reason: &str,
    ) -> Result<Option<FulfillmentCancellation>, FulfillmentError> {
        let Some(current) = self.store.find_active_by_pipeline(pipeline_id)? else {
            return Ok(None);
        };
        if current.status.has_shipped() {
            info!(fulfillment_id = %current.id, status = %current.status, "Fulfillment already shipped; not cancelling");
            return Ok(None);
        }
        self.cancel(current, reason).await.map(Some)
    }

    async fn cancel(
        &self,
        current: Fulfillment,
        reason: &str,
    ) -> Result<FulfillmentCancellation, FulfillmentError> {
        if current.status == FulfillmentStatus::Cancelled {
            return Ok(FulfillmentCancellation {
                fulfillment: current,
                provider_cancelled: false,
                provider_message: None,
            });
        }
        if current.status.has_shipped() {
            return Err(FulfillmentError::InvalidStatus {
                from: current.status,
                to: FulfillmentStatus::Cancelled,
            });
        }

        let remote = self.cancel_remote(&current).await;

        let reason = reason.to_string();
        let (before, after) = self.mutate(&current.id, |f| {
            if f.failure_reason.is_none() {
                f.failure_reason = Some(format!("cancelled: {}", reason));
            }
            if let Some(found) = &remote.adopted_order_id {
                f.external_order_id = Some(found.clone());
                f.submission_uncertain = false;
            }
            Ok(f.transition(FulfillmentStatus::Cancelled, "cancel", Utc::now()))
        })?;
        self.after_change(&before, &after, "cancel").await;

        Ok(FulfillmentCancellation {
            fulfillment: after,
            provider_cancelled: remote.cancelled,
            provider_message: remote.message,
        })
    }

    /// Ask the provider to cancel. A draft whose submission outcome is
    /// unknown is first looked up by reference, since the factory may hold
    /// the order anyway.
    async fn cancel_remote(&self, current: &Fulfillment) -> RemoteCancel {
        if current.external_order_id.is_none() && !current.submission_uncertain {
            return RemoteCancel::nothing_placed();
        }
        let provider = match self.provider_for(current.provider) {
            Ok(provider) => provider,
            Err(e) => return RemoteCancel::failed(current, e.to_string()),
        };

        let (external_id, adopted_order_id) = match &current.external_order_id {
            Some(id) => (id.clone(), None),
            None => match provider.find_order_by_reference(&current.reference).await {
                Ok(Some(found)) => {
                    info!(
                        fulfillment_id = %current.id,
                        external_order_id = %found.external_order_id,
                        "Found provider order from an ambiguous submission; cancelling it"
                    );
                    (found.external_order_id.clone(), Some(found.external_order_id))
                }
                Ok(None) => return RemoteCancel::nothing_placed(),
                Err(e) => {
                    return RemoteCancel::failed(
                        current,
                        format!("could not look up provider order: {}", e),
                    )
                }
            },
        };

        let mut remote = match provider.cancel_order(&external_id).await {
            Ok(outcome) => {
                if !outcome.cancelled {
                    warn!(
                        fulfillment_id = %current.id,
                        message = ?outcome.message,
                        "Provider refused cancellation"
                    );
                }
                RemoteCancel {
                    cancelled: outcome.cancelled,
                    message: outcome.message,
                    adopted_order_id: None,
                }
            }
            Err(e) => RemoteCancel::failed(current, e.to_string()),
        };
        remote.adopted_order_id = adopted_order_id;
        remote
    }

    // =========================================================================
    // Provider sync, webhooks and tracking
    // =========================================================================

    /// Pull the provider's view of the order and apply it.
    pub async fn sync_from_provider(&self, id: &str, brand_id: &str) -> Result<Fulfillment, FulfillmentError> {
        let current = self.get_fulfillment(id, brand_id)?;
        self.sync(current).await
    }

    /// Sync without a brand check, for stage workers.
    pub async fn sync_for_pipeline(&self, pipeline_id: &str) -> Result<Fulfillment, FulfillmentError> {
        let current = self
            .store
            .find_active_by_pipeline(pipeline_id)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("fulfillment for pipeline {}", pipeline_id)))?;
        self.sync(current).await
    }

    async fn sync(&self, current: Fulfillment) -> Result<Fulfillment, FulfillmentError> {
        let Some(external_id) = current.external_order_id.clone() else {
            return Ok(current);
        };
        if current.status.is_terminal() {
            return Ok(current);
        }
        let provider = self.provider_for(current.provider)?;
        let remote = provider.get_order_status(&external_id).await?;
        self.apply_remote(&current, &remote, "sync").await
    }

    async fn apply_remote(
        &self,
        current: &Fulfillment,
        remote: &ProviderOrderStatus,
        source: &str,
    ) -> Result<Fulfillment, FulfillmentError> {
        if let Some(shipment) = &remote.shipment {
            let details = shipment_details(shipment, remote.estimated_delivery);
            match self.record_shipment(&current.id, &details, source).await {
                Ok(_) => {}
                Err(FulfillmentError::TrackingNumberImmutable { existing, .. }) => {
                    warn!(
                        fulfillment_id = %current.id,
                        existing = %existing,
                        reported = %shipment.tracking_number,
                        "Provider reported a different tracking number; keeping the original"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let raw = remote.raw_status.clone();
        let status = remote.status;
        let (before, after) = self.mutate(&current.id, |f| {
            let raw_changed = f.provider_status.as_deref() != Some(raw.as_str());
            f.provider_status = Some(raw.clone());
            let moved = f.transition(status, source, Utc::now());
            Ok(moved || raw_changed)
        })?;
        self.after_change(&before, &after, source).await;
        Ok(after)
    }

    /// Apply a normalized provider webhook. Returns `None` when no fulfillment
    /// matches or the owning pipeline is cancelled.
    pub async fn apply_provider_event(
        &self,
        provider: ProviderSlug,
        event: &ProviderWebhookEvent,
    ) -> Result<Option<Fulfillment>, FulfillmentError> {
        let by_external = match &event.external_order_id {
            Some(external_id) => self.store.find_by_external_order(provider, external_id)?,
            None => None,
        };
        let found = match (by_external, &event.reference) {
            (Some(f), _) => Some(f),
            (None, Some(reference)) => self.store.find_by_reference(reference)?,
            (None, None) => None,
        };
        let Some(current) = found else {
            debug!(provider = %provider, event_type = %event.event_type, "Webhook matches no fulfillment");
            return Ok(None);
        };

        if event.status != Some(FulfillmentStatus::Cancelled) && self.pipeline_cancelled(&current)? {
            info!(fulfillment_id = %current.id, "Ignoring webhook for cancelled pipeline");
            return Ok(None);
        }

        // A webhook can confirm a submission whose response we never saw.
        if current.external_order_id.is_none() {
            if let Some(external_id) = event.external_order_id.clone() {
                self.mutate(&current.id, |f| {
                    f.external_order_id = Some(external_id.clone());
                    f.submission_uncertain = false;
                    Ok(true)
                })?;
            }
        }

        let remote = ProviderOrderStatus {
            external_order_id: event.external_order_id.clone().unwrap_or_default(),
            status: event.status.unwrap_or(current.status),
            raw_status: event.event_type.clone(),
            shipment: event.shipment.clone(),
            estimated_delivery: None,
        };
        self.apply_remote(&current, &remote, "webhook").await.map(Some)
    }

    /// Apply a carrier tracking status to the fulfillment holding `tracking_number`.
    pub async fn apply_tracking_update(
        &self,
        tracking_number: &str,
        status: FulfillmentStatus,
    ) -> Result<Option<Fulfillment>, FulfillmentError> {
        let Some(current) = self.store.find_by_tracking_number(tracking_number)? else {
            return Ok(None);
        };
        if self.pipeline_cancelled(&current)? {
            return Ok(None);
        }
        self.write_status(&current, status, "tracking").await.map(Some)
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    /// Shipping quotes from every configured provider, cheapest first.
    /// Providers that fail are logged and skipped.
    pub async fn get_shipping_quotes(
        &self,
        brand_id: &str,
        address: &ShippingAddress,
        items: &[OrderItem],
    ) -> Vec<ShippingRate> {
        let providers = self.providers.all();
        let results = join_all(
            providers
                .iter()
                .map(|p| async move { (p.slug(), p.get_shipping_rates(address, items).await) }),
        )
        .await;

        let mut rates: Vec<ShippingRate> = results
            .into_iter()
            .filter_map(|(slug, result)| match result {
                Ok(rates) => Some(rates),
                Err(e) => {
                    warn!(provider = %slug, brand_id, error = %e, "Shipping quote failed");
                    None
                }
            })
            .flatten()
            .collect();
        rates.sort_by(|a, b| {
            a.amount_cents
                .cmp(&b.amount_cents)
                .then_with(|| a.provider.cmp(&b.provider))
        });
        rates
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn provider_for(&self, slug: ProviderSlug) -> Result<Arc<dyn PodProvider>, FulfillmentError> {
        self.providers.get(slug).ok_or_else(|| {
            FulfillmentError::Provider(crate::provider::ProviderError::Config(format!(
                "provider {} is not configured",
                slug
            )))
        })
    }

    fn pipeline_cancelled(&self, f: &Fulfillment) -> Result<bool, FulfillmentError> {
        Ok(self
            .pipelines
            .get(&f.pipeline_id)?
            .map(|p| p.status == PipelineStatus::Cancelled)
            .unwrap_or(false))
    }

    fn ensure_pipeline_open(&self, f: &Fulfillment) -> Result<(), FulfillmentError> {
        if self.pipeline_cancelled(f)? {
            return Err(FulfillmentError::PipelineCancelled(f.pipeline_id.clone()));
        }
        Ok(())
    }

    async fn write_status(
        &self,
        current: &Fulfillment,
        status: FulfillmentStatus,
        source: &str,
    ) -> Result<Fulfillment, FulfillmentError> {
        let (before, after) = self.mutate(&current.id, |f| Ok(f.transition(status, source, Utc::now())))?;
        if before.status == after.status && before.status != status {
            debug!(
                fulfillment_id = %current.id,
                current = %after.status,
                requested = %status,
                "Ignoring non-monotonic status write"
            );
        }
        self.after_change(&before, &after, source).await;
        Ok(after)
    }

    async fn record_shipment(
        &self,
        id: &str,
        shipment: &ShipmentDetails,
        source: &str,
    ) -> Result<Fulfillment, FulfillmentError> {
        let (before, after) = self.mutate(id, |f| {
            if f.status == FulfillmentStatus::Cancelled {
                return Err(FulfillmentError::InvalidStatus {
                    from: f.status,
                    to: FulfillmentStatus::Shipped,
                });
            }
            f.apply_shipment(shipment)?;
            f.transition(FulfillmentStatus::Shipped, source, Utc::now());
            Ok(true)
        })?;
        self.after_change(&before, &after, source).await;
        Ok(after)
    }

    /// Load, modify, and compare-and-swap, retrying on version conflicts.
    /// `apply` returns whether anything changed. Returns (before, after).
    fn mutate<F>(&self, id: &str, mut apply: F) -> Result<(Fulfillment, Fulfillment), FulfillmentError>
    where
        F: FnMut(&mut Fulfillment) -> Result<bool, FulfillmentError>,
    {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let current = self
                .store
                .get(id)?
                .ok_or_else(|| FulfillmentError::NotFound(format!("fulfillment {}", id)))?;
            let mut next = current.clone();
            if !apply(&mut next)? {
                return Ok((current.clone(), current));
            }
            match self.store.update(&next) {
                Ok(stored) => return Ok((current, stored)),
                Err(StoreError::Conflict(_)) => {
                    debug!(fulfillment_id = %id, "Fulfillment version conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(format!("fulfillment {}", id)).into())
    }

    async fn after_change(&self, before: &Fulfillment, after: &Fulfillment, source: &str) {
        if before.tracking_number.is_none() {
            if let (Some(carrier), Some(number)) = (&after.carrier, &after.tracking_number) {
                if let Some(ref tracking) = self.tracking {
                    tracking.subscribe(number, carrier).await;
                }
                if let Some(ref events) = self.events {
                    events
                        .emit(DomainEvent::FulfillmentShipped {
                            fulfillment_id: after.id.clone(),
                            pipeline_id: after.pipeline_id.clone(),
                            brand_id: after.brand_id.clone(),
                            carrier: carrier.clone(),
                            tracking_number: number.clone(),
                        })
                        .await;
                }
            }
        }

        if before.status != after.status {
            info!(
                fulfillment_id = %after.id,
                from = %before.status,
                to = %after.status,
                source,
                "Fulfillment status changed"
            );
            if after.status.is_terminal() {
                if let (Some(tracking), Some(carrier), Some(number)) =
                    (&self.tracking, &after.carrier, &after.tracking_number)
                {
                    tracking.unsubscribe(number, carrier).await;
                }
            }
            if let Some(ref events) = self.events {
                events
                    .emit(DomainEvent::FulfillmentStatusChanged {
                        fulfillment_id: after.id.clone(),
                        pipeline_id: after.pipeline_id.clone(),
                        brand_id: after.brand_id.clone(),
                        from_status: before.status,
                        to_status: after.status,
                        source: source.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn emit_created(&self, f: &Fulfillment) {
        if let Some(ref events) = self.events {
            events
                .emit(DomainEvent::FulfillmentCreated {
                    fulfillment_id: f.id.clone(),
                    pipeline_id: f.pipeline_id.clone(),
                    brand_id: f.brand_id.clone(),
                    provider: f.provider.to_string(),
                    external_order_id: f.external_order_id.clone(),
                })
                .await;
        }
    }
}

fn shipment_details(
    shipment: &ProviderShipment,
    estimated_delivery: Option<chrono::DateTime<Utc>>,
) -> ShipmentDetails {
    ShipmentDetails {
        carrier: shipment.carrier.clone(),
        tracking_number: shipment.tracking_number.clone(),
        tracking_url: shipment.tracking_url.clone(),
        shipped_at: shipment.shipped_at,
        estimated_delivery,
    }
}
