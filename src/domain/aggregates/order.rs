//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::payment::{Payment, PaymentState};
use crate::domain::aggregates::supplier_order::{self, SupplierOrder, SupplierOrderStatus};
use crate::domain::value_objects::{Money, MoneyError};
use crate::domain::events::{DomainEvent, OrderEvent};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub items: Vec<LineItem>,
    pub subtotal: Money,
    pub shipping: Money,
    pub total: Money,
    pub shipping_address: Option<Address>,
    /// Tracking number once the lines shipped from our own stock went out.
    pub in_house_tracking: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address { pub name: String, pub street1: String, pub street2: Option<String>, pub city: String, pub state: Option<String>, pub zip: String, pub country: String }

status_enum! {
    pub enum OrderStatus {
        Pending => "pending",
        Processing => "processing",
        Shipped => "shipped",
        Completed => "completed",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

status_enum! {
    pub enum PaymentStatus {
        Unpaid => "unpaid",
        Paid => "paid",
        PartiallyRefunded => "partially_refunded",
        Refunded => "refunded",
        Failed => "failed",
    }
}

status_enum! {
    pub enum FulfillmentStatus { Unfulfilled => "unfulfilled", Partial => "partial", Fulfilled => "fulfilled" }
}

impl LineItem {
    pub fn new(product_id: Uuid, supplier_id: Option<Uuid>, sku: impl Into<String>, name: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        let total = unit_price.multiply(quantity);
        Self { id: Uuid::now_v7(), product_id, supplier_id, sku: sku.into(), name: name.into(), quantity, unit_price, total }
    }
}

impl Order {
    pub fn place(
        order_number: impl Into<String>,
        customer_id: Uuid,
        email: impl Into<String>,
        items: Vec<LineItem>,
        shipping: Money,
        shipping_address: Option<Address>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() { return Err(OrderError::NoItems); }
        let subtotal = items.iter().try_fold(Money::zero(shipping.currency()), |acc, i| acc.add(&i.total))?;
        let total = subtotal.add(&shipping)?;
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::now_v7(), order_number: order_number.into(), customer_id, email: email.into(),
            status: OrderStatus::Pending, payment_status: PaymentStatus::Unpaid, fulfillment_status: FulfillmentStatus::Unfulfilled,
            items, subtotal, shipping, total, shipping_address, in_house_tracking: None,
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id, order_number: order.order_number.clone(), email: order.email.clone(), total: order.total.clone(),
        }));
        Ok(order)
    }

    pub fn currency(&self) -> &str { self.total.currency() }
    pub fn is_terminal(&self) -> bool { matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded) }
    pub fn in_house_items(&self) -> impl Iterator<Item = &LineItem> { self.items.iter().filter(|i| i.supplier_id.is_none()) }
    pub fn has_in_house_items(&self) -> bool { self.in_house_items().next().is_some() }

    /// Cancels an order that has not shipped. Money already captured has to
    /// be refunded first.
    pub fn cancel(&mut self, supplier_orders: &[SupplierOrder]) -> Result<(), OrderError> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Processing) {
            return Err(OrderError::CannotCancel { status: self.status });
        }
        if matches!(self.payment_status, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded) {
            return Err(OrderError::RefundRequired);
        }
        let shipped = self.in_house_tracking.is_some()
            || supplier_orders.iter().any(|so| matches!(so.status, SupplierOrderStatus::Shipped | SupplierOrderStatus::Delivered));
        if shipped { return Err(OrderError::AlreadyShipped); }
        self.status = OrderStatus::Cancelled;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, order_number: self.order_number.clone(), email: self.email.clone() }));
        Ok(())
    }

    pub fn ship_in_house(&mut self, tracking: impl Into<String>) -> Result<(), OrderError> {
        if !self.has_in_house_items() { return Err(OrderError::NothingToShip); }
        if self.status != OrderStatus::Processing && self.status != OrderStatus::Shipped {
            return Err(OrderError::NotPaid);
        }
        if self.in_house_tracking.is_some() { return Err(OrderError::AlreadyShipped); }
        self.in_house_tracking = Some(tracking.into());
        self.touch();
        Ok(())
    }

    /// Recomputes payment, fulfillment and order status from the payment and
    /// supplier-order rows. Raises `OrderEvent::Shipped` on the transition
    /// into shipped.
    pub fn recalculate(&mut self, payments: &[Payment], supplier_orders: &[SupplierOrder]) -> Result<(), OrderError> {
        let currency = self.currency().to_string();
        let captured: Vec<&Payment> = payments.iter().filter(|p| p.order_id == self.id && p.is_captured()).collect();
        let paid = captured.iter().try_fold(Money::zero(&currency), |acc, p| acc.add(&p.amount))?;
        let refunded = captured.iter().try_fold(Money::zero(&currency), |acc, p| acc.add(&p.refunded))?;

        if !paid.is_positive() {
            let own: Vec<&Payment> = payments.iter().filter(|p| p.order_id == self.id).collect();
            self.payment_status = if !own.is_empty() && own.iter().all(|p| p.status == PaymentState::Failed) {
                PaymentStatus::Failed
            } else {
                PaymentStatus::Unpaid
            };
        } else if refunded.amount() >= paid.amount() {
            self.payment_status = PaymentStatus::Refunded;
            if self.status != OrderStatus::Cancelled { self.status = OrderStatus::Refunded; }
        } else if refunded.is_positive() {
            self.payment_status = PaymentStatus::PartiallyRefunded;
        } else {
            self.payment_status = PaymentStatus::Paid;
        }

        if paid.is_positive() && self.status == OrderStatus::Pending {
            self.status = OrderStatus::Processing;
        }

        self.fulfillment_status = supplier_order::fulfillment_status(self, supplier_orders);
        let shippable = matches!(self.status, OrderStatus::Processing | OrderStatus::Shipped);
        if shippable && self.fulfillment_status == FulfillmentStatus::Fulfilled {
            let delivered = supplier_orders
                .iter()
                .filter(|so| so.order_id == self.id && so.status != SupplierOrderStatus::Cancelled)
                .all(|so| so.status == SupplierOrderStatus::Delivered);
            if self.status == OrderStatus::Processing {
                self.raise_event(DomainEvent::Order(OrderEvent::Shipped { order_id: self.id, order_number: self.order_number.clone(), email: self.email.clone() }));
            }
            // in-house lines carry no delivery confirmation, so they stop at shipped
            self.status = if delivered && !self.has_in_house_items() { OrderStatus::Completed } else { OrderStatus::Shipped };
        }
        self.touch();
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("order in status {status} cannot be cancelled")]
    CannotCancel { status: OrderStatus },
    #[error("order has captured payments; refund it before cancelling")]
    RefundRequired,
    #[error("order has already shipped")]
    AlreadyShipped,
    #[error("order has no in-house items to ship")]
    NothingToShip,
    #[error("order has not been paid")]
    NotPaid,
    #[error(transparent)]
    Money(#[from] MoneyError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::supplier_order::SupplierOrder;
    use rust_decimal::Decimal;

    fn usd(v: i64) -> Money { Money::usd(Decimal::new(v, 0)) }

    fn order_with(supplier: Option<Uuid>) -> Order {
        let items = vec![
            LineItem::new(Uuid::now_v7(), None, "W001", "Widget", 2, usd(10)),
            LineItem::new(Uuid::now_v7(), supplier, "D001", "Drop", 1, usd(30)),
        ];
        Order::place("ORD-00000001", Uuid::now_v7(), "test@example.com", items, usd(5), None).unwrap()
    }

    fn captured(order: &Order, amount: i64) -> Payment {
        let mut p = Payment::pending(order.id, "pi_1", usd(amount));
        p.succeed();
        p
    }

    #[test]
    fn test_place_computes_totals_and_raises_event() {
        let mut order = order_with(None);
        assert_eq!(order.subtotal, usd(50));
        assert_eq!(order.total, usd(55));
        let events = order.take_events();
        assert!(matches!(events.as_slice(), [DomainEvent::Order(OrderEvent::Placed { .. })]));
        assert!(order.take_events().is_empty());
    }

    #[test]
    fn test_place_rejects_empty_orders() {
        assert!(matches!(Order::place("ORD-1", Uuid::now_v7(), "a@b.c", vec![], usd(0), None), Err(OrderError::NoItems)));
    }

    #[test]
    fn test_recalculate_paid_partial_and_full_refund() {
        let mut order = order_with(None);
        let mut payment = captured(&order, 55);
        order.recalculate(&[payment.clone()], &[]).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Processing);

        payment.apply_refund(&usd(20)).unwrap();
        order.recalculate(&[payment.clone()], &[]).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::PartiallyRefunded);
        assert_eq!(order.status, OrderStatus::Processing);

        payment.apply_refund(&usd(35)).unwrap();
        order.recalculate(&[payment], &[]).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert_eq!(order.status, OrderStatus::Refunded);
    }

    #[test]
    fn test_recalculate_marks_failed_payments() {
        let mut order = order_with(None);
        let mut p = Payment::pending(order.id, "pi_f", usd(55));
        p.fail("card_declined");
        order.recalculate(&[p.clone()], &[]).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(order.status, OrderStatus::Pending);

        // a retry is under way
        let retry = Payment::pending(order.id, "pi_r", usd(55));
        order.recalculate(&[p, retry], &[]).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
    }

    #[test]
    fn test_cancel_rules() {
        let mut order = order_with(None);
        let payment = captured(&order, 55);
        order.recalculate(&[payment], &[]).unwrap();
        assert_eq!(order.cancel(&[]), Err(OrderError::RefundRequired));

        let mut unpaid = order_with(None);
        unpaid.cancel(&[]).unwrap();
        assert_eq!(unpaid.status, OrderStatus::Cancelled);
        assert!(matches!(unpaid.cancel(&[]), Err(OrderError::CannotCancel { .. })));
    }

    #[test]
    fn test_shipping_and_completion() {
        let supplier = Uuid::now_v7();
        let mut order = order_with(Some(supplier));
        let payment = captured(&order, 55);
        order.recalculate(&[payment.clone()], &[]).unwrap();
        order.take_events();

        let mut split = SupplierOrder::split(&order);
        assert_eq!(split.len(), 1);
        split[0].status = SupplierOrderStatus::Shipped;
        split[0].tracking_number = Some("1Z".into());
        order.recalculate(&[payment.clone()], &split).unwrap();
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Partial);
        assert_eq!(order.status, OrderStatus::Processing);

        order.ship_in_house("TRK-1").unwrap();
        order.recalculate(&[payment.clone()], &split).unwrap();
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Fulfilled);
        assert_eq!(order.status, OrderStatus::Shipped);
        assert!(matches!(order.take_events().as_slice(), [DomainEvent::Order(OrderEvent::Shipped { .. })]));
    }

    #[test]
    fn test_dropship_only_order_completes_on_delivery() {
        let supplier = Uuid::now_v7();
        let items = vec![LineItem::new(Uuid::now_v7(), Some(supplier), "D1", "Drop", 1, usd(30))];
        let mut order = Order::place("ORD-2", Uuid::now_v7(), "c@example.com", items, usd(0), None).unwrap();
        let payment = captured(&order, 30);
        let mut split = SupplierOrder::split(&order);
        split[0].status = SupplierOrderStatus::Delivered;
        split[0].tracking_number = Some("1Z".into());
        order.recalculate(&[payment], &split).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
    }
}
