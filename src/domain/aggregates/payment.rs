//! Payment Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, MoneyError};

/// One gateway charge against an order. `refunded` only counts refunds the
/// gateway has confirmed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub gateway_reference: String,
    pub amount: Money,
    pub refunded: Money,
    pub status: PaymentState,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

status_enum! {
    pub enum PaymentState {
        Pending => "pending",
        Succeeded => "succeeded",
        PartiallyRefunded => "partially_refunded",
        Refunded => "refunded",
        Failed => "failed",
    }
}

impl Payment {
    pub fn pending(order_id: Uuid, gateway_reference: impl Into<String>, amount: Money) -> Self {
        let now = Utc::now();
        let refunded = Money::zero(amount.currency());
        Self {
            id: Uuid::now_v7(), order_id, gateway_reference: gateway_reference.into(), amount, refunded,
            status: PaymentState::Pending, failure_reason: None, created_at: now, updated_at: now,
        }
    }

    /// Money was captured at some point, whatever was refunded since.
    pub fn is_captured(&self) -> bool {
        matches!(self.status, PaymentState::Succeeded | PaymentState::PartiallyRefunded | PaymentState::Refunded)
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self.status, PaymentState::Succeeded | PaymentState::PartiallyRefunded)
    }

    /// Returns `false` when the payment had already been marked succeeded,
    /// so duplicate webhook deliveries are no-ops.
    pub fn succeed(&mut self) -> bool {
        if self.status != PaymentState::Pending && self.status != PaymentState::Failed { return false; }
        self.status = PaymentState::Succeeded;
        self.failure_reason = None;
        self.touch();
        true
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status != PaymentState::Pending { return false; }
        self.status = PaymentState::Failed;
        self.failure_reason = Some(reason.into());
        self.touch();
        true
    }

    /// What can still be refunded once `in_flight` (pending refunds) settles.
    pub fn refundable(&self, in_flight: &Money) -> Result<Money, MoneyError> {
        self.amount.subtract(&self.refunded)?.subtract(in_flight)
    }

    /// Adds a confirmed refund and moves the state to partially refunded or
    /// refunded once the refunded total reaches the captured amount.
    pub fn apply_refund(&mut self, amount: &Money) -> Result<(), MoneyError> {
        self.refunded = self.refunded.add(amount)?;
        self.status = if self.refunded.amount() >= self.amount.amount() {
            PaymentState::Refunded
        } else {
            PaymentState::PartiallyRefunded
        };
        self.touch();
        Ok(())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
