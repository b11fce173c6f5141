use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::store::ReturnStore;
use super::types::{NewReturn, ReturnError, ReturnFilter, ReturnRequest, ReturnStatus};
use crate::events::{DomainEvent, EventHandle};
use crate::order::OrderStore;
use crate::storage::StoreError;

const MAX_CONFLICT_RETRIES: usize = 5;

/// Brand-scoped return and refund workflow.
///
/// Every operation loads the return and checks it belongs to the calling
/// brand first; a return owned by another brand is reported as not found.
pub struct ReturnService {
    store: Arc<dyn ReturnStore>,
    orders: Arc<dyn OrderStore>,
    events: Option<EventHandle>,
}

impl ReturnService {
    pub fn new(store: Arc<dyn ReturnStore>, orders: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            orders,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    pub fn get_return(&self, id: &str, brand_id: &str) -> Result<ReturnRequest, ReturnError> {
        self.store
            .get(id)?
            .filter(|r| r.brand_id == brand_id)
            .ok_or_else(|| ReturnError::NotFound(id.to_string()))
    }

    pub fn list_returns(
        &self,
        brand_id: &str,
        filter: ReturnFilter,
    ) -> Result<(Vec<ReturnRequest>, i64), ReturnError> {
        let filter = filter.with_brand(brand_id);
        Ok((self.store.list(&filter)?, self.store.count(&filter)?))
    }

    /// Open a return in REQUESTED. The order must belong to the brand.
    pub async fn create_return(
        &self,
        brand_id: &str,
        input: NewReturn,
    ) -> Result<ReturnRequest, ReturnError> {
        input.validate()?;
        let order = self
            .orders
            .get(&input.order_id)?
            .filter(|o| o.brand_id == brand_id)
            .ok_or_else(|| ReturnError::NotFound(format!("order {}", input.order_id)))?;
        if let Some(unknown) = input
            .items
            .iter()
            .find(|i| !order.line_items.iter().any(|li| li.id == i.line_item_id))
        {
            return Err(ReturnError::InvalidRequest(format!(
                "line item {} is not part of order {}",
                unknown.line_item_id, order.order_id
            )));
        }

        let request = ReturnRequest::new(brand_id, input);
        self.store.insert(&request)?;
        info!(return_id = %request.id, order_id = %request.order_id, brand_id, "Return requested");

        if let Some(ref events) = self.events {
            events
                .emit(DomainEvent::ReturnRequested {
                    return_id: request.id.clone(),
                    order_id: request.order_id.clone(),
                    brand_id: request.brand_id.clone(),
                })
                .await;
        }
        Ok(request)
    }

    /// Move the return through review. RECEIVED stamps `received_at`.
    pub async fn process_return(
        &self,
        id: &str,
        brand_id: &str,
        target: ReturnStatus,
        notes: Option<&str>,
    ) -> Result<ReturnRequest, ReturnError> {
        let updated = self.mutate(id, brand_id, |r| r.transition(target, notes, Utc::now()))?;
        info!(return_id = %id, status = %updated.status, "Return status changed");

        if let Some(ref events) = self.events {
            let return_id = updated.id.clone();
            let brand_id = updated.brand_id.clone();
            let event = match target {
                ReturnStatus::Approved => Some(DomainEvent::ReturnApproved { return_id, brand_id }),
                ReturnStatus::Rejected => Some(DomainEvent::ReturnRejected {
                    return_id,
                    brand_id,
                    reason: notes.map(str::to_string),
                }),
                ReturnStatus::Received => Some(DomainEvent::ReturnReceived { return_id, brand_id }),
                ReturnStatus::Requested | ReturnStatus::Refunded => None,
            };
            if let Some(event) = event {
                events.emit(event).await;
            }
        }
        Ok(updated)
    }

    /// Close the return with a payout decision.
    ///
    /// `amount_cents <= 0` is accepted and recorded as a REJECTED refund of
    /// zero; the return is still REFUNDED.
    pub async fn process_refund(
        &self,
        id: &str,
        brand_id: &str,
        amount_cents: i64,
        notes: Option<&str>,
    ) -> Result<ReturnRequest, ReturnError> {
        let current = self.get_return(id, brand_id)?;
        let order_total = self
            .orders
            .get(&current.order_id)?
            .map(|o| o.total_cents);

        let updated = self.mutate(id, brand_id, |r| {
            r.refund(amount_cents, order_total, notes, Utc::now()).map(|_| ())
        })?;
        let refund_status = updated
            .refund_status
            .map(|s| s.to_string())
            .unwrap_or_default();
        let amount = updated.refund_amount_cents.unwrap_or(0);
        info!(
            return_id = %id,
            refund_status = %refund_status,
            amount_cents = amount,
            "Return refunded"
        );

        if let Some(ref events) = self.events {
            events
                .emit(DomainEvent::ReturnRefunded {
                    return_id: updated.id.clone(),
                    order_id: updated.order_id.clone(),
                    brand_id: updated.brand_id.clone(),
                    amount_cents: amount,
                    refund_status,
                })
                .await;
        }
        Ok(updated)
    }

    fn mutate<F>(&self, id: &str, brand_id: &str, mut apply: F) -> Result<ReturnRequest, ReturnError>
    where
        F: FnMut(&mut ReturnRequest) -> Result<(), ReturnError>,
    {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut r = self.get_return(id, brand_id)?;
            apply(&mut r)?;
            match self.store.update(&r) {
                Ok(stored) => return Ok(stored),
                Err(StoreError::Conflict(_)) => {
                    debug!(return_id = %id, "Return version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(format!("return {}", id)).into())
    }
}
