//! Payment gateway port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::domain::value_objects::Money;
use crate::error::Result;

pub mod stripe;
#[cfg(test)]
pub mod fake;

pub use stripe::StripeGateway;

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayPayment {
    pub reference: String,
    pub client_secret: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_reference: String,
    pub amount: Money,
    pub status: GatewayRefundStatus,
    /// Our refund id, when the refund was requested through this service.
    pub local_id: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GatewayRefundStatus {
    Pending,
    Succeeded,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct RefundRequest<'a> {
    pub refund_id: Uuid,
    pub payment_reference: &'a str,
    pub amount: &'a Money,
    pub reason: &'a str,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, order: &Order) -> Result<GatewayPayment>;
    /// `request.refund_id` doubles as the idempotency key.
    async fn refund(&self, request: RefundRequest<'_>) -> Result<GatewayRefund>;
    async fn retrieve_refund(&self, gateway_refund_id: &str) -> Result<GatewayRefund>;
}
