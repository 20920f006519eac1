//! Domain events
use crate::domain::value_objects::Money;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
    Refund(RefundEvent),
    Dropship(DropshipEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, email: String, total: Money },
    Shipped { order_id: Uuid, order_number: String, email: String },
    Cancelled { order_id: Uuid, order_number: String, email: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    Received { order_id: Uuid, order_number: String, email: String, amount: Money },
    Failed { order_id: Uuid, order_number: String, email: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefundEvent {
    Issued { refund_id: Uuid, order_id: Uuid, order_number: String, email: String, amount: Money },
    Failed { refund_id: Uuid, order_id: Uuid, order_number: String, amount: Money, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DropshipEvent {
    SupplierOrderCreated { supplier_order_id: Uuid, supplier_id: Uuid, order_number: String, item_count: usize },
}

impl DomainEvent {
    /// Subject suffix used when the event is published, e.g. `order.placed`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::Shipped { .. }) => "order.shipped",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Payment(PaymentEvent::Received { .. }) => "payment.received",
            Self::Payment(PaymentEvent::Failed { .. }) => "payment.failed",
            Self::Refund(RefundEvent::Issued { .. }) => "refund.issued",
            Self::Refund(RefundEvent::Failed { .. }) => "refund.failed",
            Self::Dropship(DropshipEvent::SupplierOrderCreated { .. }) => "dropship.supplier_order_created",
        }
    }
}
