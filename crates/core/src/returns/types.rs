use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StoreError;

/// Return lifecycle. REFUNDED and REJECTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    Received,
    Refunded,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::Requested => "REQUESTED",
            ReturnStatus::Approved => "APPROVED",
            ReturnStatus::Rejected => "REJECTED",
            ReturnStatus::Received => "RECEIVED",
            ReturnStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReturnStatus::Rejected | ReturnStatus::Refunded)
    }

    /// Transitions reachable through `process_return`. REFUNDED is only
    /// reached through a refund.
    pub fn can_transition_to(&self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!(
            (self, next),
            (Requested, Approved)
                | (Requested, Rejected)
                | (Approved, Received)
                | (Approved, Rejected)
                | (Received, Rejected)
        )
    }

    pub fn can_refund(&self) -> bool {
        matches!(self, ReturnStatus::Approved | ReturnStatus::Received)
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReturnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUESTED" => Ok(ReturnStatus::Requested),
            "APPROVED" => Ok(ReturnStatus::Approved),
            "REJECTED" => Ok(ReturnStatus::Rejected),
            "RECEIVED" => Ok(ReturnStatus::Received),
            "REFUNDED" => Ok(ReturnStatus::Refunded),
            other => Err(format!("unknown return status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Full,
    Partial,
    /// Closed with no payout.
    Rejected,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Full => "FULL",
            RefundStatus::Partial => "PARTIAL",
            RefundStatus::Rejected => "REJECTED",
        }
    }

    /// REJECTED for non-positive amounts; PARTIAL when below a known order
    /// total; FULL otherwise.
    pub fn for_amount(amount_cents: i64, order_total_cents: Option<i64>) -> Self {
        if amount_cents <= 0 {
            return RefundStatus::Rejected;
        }
        match order_total_cents {
            Some(total) if amount_cents < total => RefundStatus::Partial,
            _ => RefundStatus::Full,
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FULL" => Ok(RefundStatus::Full),
            "PARTIAL" => Ok(RefundStatus::Partial),
            "REJECTED" => Ok(RefundStatus::Rejected),
            other => Err(format!("unknown refund status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub line_item_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnNote {
    pub at: DateTime<Utc>,
    /// Status the return moved to when the note was written.
    pub status: ReturnStatus,
    pub note: String,
}

/// A customer's return, independent of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: String,
    pub brand_id: String,
    pub order_id: String,
    pub fulfillment_id: Option<String>,
    pub reason: String,
    pub items: Vec<ReturnItem>,
    pub status: ReturnStatus,
    pub refund_status: Option<RefundStatus>,
    /// Set only when the return is refunded.
    pub refund_amount_cents: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: Vec<ReturnNote>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReturnRequest {
    pub fn new(brand_id: &str, input: NewReturn) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            brand_id: brand_id.to_string(),
            order_id: input.order_id,
            fulfillment_id: input.fulfillment_id,
            reason: input.reason,
            items: input.items,
            status: ReturnStatus::Requested,
            refund_status: None,
            refund_amount_cents: None,
            refunded_at: None,
            received_at: None,
            notes: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn add_note(&mut self, note: Option<&str>, now: DateTime<Utc>) {
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            self.notes.push(ReturnNote {
                at: now,
                status: self.status,
                note: note.to_string(),
            });
        }
    }

    /// Move through the review lifecycle.
    pub fn transition(
        &mut self,
        next: ReturnStatus,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), ReturnError> {
        if !self.status.can_transition_to(next) {
            return Err(ReturnError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == ReturnStatus::Received {
            self.received_at = Some(now);
        }
        self.add_note(note, now);
        Ok(())
    }

    /// Close the return with a refund decision. A non-positive amount is
    /// recorded as a rejected refund of zero, not an error.
    pub fn refund(
        &mut self,
        amount_cents: i64,
        order_total_cents: Option<i64>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RefundStatus, ReturnError> {
        if !self.status.can_refund() {
            return Err(ReturnError::InvalidTransition {
                from: self.status,
                to: ReturnStatus::Refunded,
            });
        }
        let refund_status = RefundStatus::for_amount(amount_cents, order_total_cents);
        self.status = ReturnStatus::Refunded;
        self.refund_status = Some(refund_status);
        self.refund_amount_cents = Some(amount_cents.max(0));
        self.refunded_at = Some(now);
        self.add_note(note, now);
        Ok(refund_status)
    }
}

/// Input for creating a return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReturn {
    pub order_id: String,
    #[serde(default)]
    pub fulfillment_id: Option<String>,
    pub reason: String,
    pub items: Vec<ReturnItem>,
}

impl NewReturn {
    pub fn validate(&self) -> Result<(), ReturnError> {
        if self.order_id.trim().is_empty() {
            return Err(ReturnError::InvalidRequest("order_id is required".into()));
        }
        if self.reason.trim().is_empty() {
            return Err(ReturnError::InvalidRequest("reason is required".into()));
        }
        if self.items.is_empty() {
            return Err(ReturnError::InvalidRequest("at least one item is required".into()));
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity == 0) {
            return Err(ReturnError::InvalidRequest(format!(
                "item {} has zero quantity",
                item.line_item_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReturnFilter {
    pub brand_id: Option<String>,
    pub status: Option<ReturnStatus>,
    pub order_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ReturnFilter {
    fn default() -> Self {
        Self {
            brand_id: None,
            status: None,
            order_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ReturnFilter {
    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    pub fn with_status(mut self, status: ReturnStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Error)]
pub enum ReturnError {
    /// Missing, or owned by another brand.
    #[error("Return not found: {0}")]
    NotFound(String),

    #[error("Cannot move return from {from} to {to}")]
    InvalidTransition { from: ReturnStatus, to: ReturnStatus },

    #[error("Invalid return request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
