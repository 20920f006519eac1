//! Refund Aggregate and refund validation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::payment::{Payment, PaymentState};
use crate::domain::value_objects::{Money, MoneyError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub status: RefundStatus,
    pub source: RefundSource,
    pub gateway_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

status_enum! {
    pub enum RefundStatus { Pending => "pending", Succeeded => "succeeded", Failed => "failed" }
}

status_enum! {
    /// Where a refund originated: issued through this service, or found at
    /// the gateway after someone refunded from its dashboard.
    pub enum RefundSource { Processor => "processor", Manual => "manual" }
}

impl Refund {
    pub fn request(payment: &Payment, amount: Money, reason: impl Into<String>, created_by: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_id: payment.order_id, payment_id: payment.id, amount,
            reason: reason.into(), status: RefundStatus::Pending, source: RefundSource::Processor,
            gateway_refund_id: None, failure_reason: None, created_by, created_at: now, updated_at: now,
        }
    }

    /// A refund that already went through at the gateway.
    pub fn manual(payment: &Payment, amount: Money, gateway_refund_id: impl Into<String>, reason: impl Into<String>, created_by: Option<Uuid>) -> Self {
        let mut refund = Self::request(payment, amount, reason, created_by);
        refund.source = RefundSource::Manual;
        refund.status = RefundStatus::Succeeded;
        refund.gateway_refund_id = Some(gateway_refund_id.into());
        refund
    }

    pub fn is_pending(&self) -> bool { self.status == RefundStatus::Pending }

    pub fn attach_gateway_id(&mut self, gateway_refund_id: impl Into<String>) {
        self.gateway_refund_id = Some(gateway_refund_id.into());
        self.touch();
    }

    pub fn succeed(&mut self) -> Result<(), RefundError> {
        self.transition(RefundStatus::Succeeded)?;
        self.failure_reason = None;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), RefundError> {
        self.transition(RefundStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, to: RefundStatus) -> Result<(), RefundError> {
        if self.status != RefundStatus::Pending {
            return Err(RefundError::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// Sum of refunds still waiting on the gateway for `payment`.
pub fn in_flight_total(payment: &Payment, refunds: &[Refund]) -> Result<Money, MoneyError> {
    refunds
        .iter()
        .filter(|r| r.payment_id == payment.id && r.is_pending())
        .try_fold(Money::zero(payment.amount.currency()), |acc, r| acc.add(&r.amount))
}

/// Checks a refund request against the payment and returns the amount to
/// refund. `requested = None` refunds everything still refundable.
pub fn validate_refund(
    payment: &Payment,
    refunds: &[Refund],
    requested: Option<Money>,
    now: DateTime<Utc>,
    max_age_days: i64,
) -> Result<Money, RefundError> {
    if !payment.is_refundable() {
        return Err(RefundError::NotRefundable { status: payment.status });
    }
    if now - payment.created_at > Duration::days(max_age_days) {
        return Err(RefundError::PaymentTooOld { max_age_days });
    }
    let available = payment.refundable(&in_flight_total(payment, refunds)?)?;
    let amount = requested.unwrap_or_else(|| available.clone());
    if amount.currency() != payment.amount.currency() {
        return Err(MoneyError::CurrencyMismatch { left: amount.currency().to_string(), right: payment.amount.currency().to_string() }.into());
    }
    if !amount.is_positive() {
        return Err(RefundError::InvalidAmount);
    }
    amount.ensure_cents()?;
    if amount.amount() > available.amount() {
        return Err(RefundError::ExceedsRefundable { requested: amount, available });
    }
    Ok(amount)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RefundError {
    #[error("payment in state {status} cannot be refunded")]
    NotRefundable { status: PaymentState },
    #[error("refund amount must be positive")]
    InvalidAmount,
    #[error("refund of {requested} exceeds refundable {available}")]
    ExceedsRefundable { requested: Money, available: Money },
    #[error("payment is older than {max_age_days} days")]
    PaymentTooOld { max_age_days: i64 },
    #[error("refund cannot move from {from} to {to}")]
    InvalidTransition { from: RefundStatus, to: RefundStatus },
    #[error(transparent)]
    Money(#[from] MoneyError),
}
