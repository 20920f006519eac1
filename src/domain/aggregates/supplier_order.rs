//! Supplier orders: the per-supplier slices of a dropshipped order

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::order::{FulfillmentStatus, LineItem, Order};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    pub supplier_id: Uuid,
    pub items: Vec<SupplierOrderItem>,
    pub status: SupplierOrderStatus,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierOrderItem { pub line_item_id: Uuid, pub product_id: Uuid, pub sku: String, pub name: String, pub quantity: u32 }

status_enum! {
    pub enum SupplierOrderStatus {
        Pending => "pending",
        Sent => "sent",
        Accepted => "accepted",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
}

impl SupplierOrderStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Accepted => 2,
            Self::Shipped => 3,
            Self::Delivered => 4,
            Self::Cancelled => u8::MAX,
        }
    }
}

impl From<&LineItem> for SupplierOrderItem {
    fn from(line: &LineItem) -> Self {
        Self { line_item_id: line.id, product_id: line.product_id, sku: line.sku.clone(), name: line.name.clone(), quantity: line.quantity }
    }
}

impl SupplierOrder {
    /// Groups the order's dropshipped lines by supplier, one supplier order
    /// each. Lines without a supplier are fulfilled in-house and skipped.
    pub fn split(order: &Order) -> Vec<SupplierOrder> {
        let mut by_supplier: BTreeMap<Uuid, Vec<SupplierOrderItem>> = BTreeMap::new();
        for line in &order.items {
            if let Some(supplier_id) = line.supplier_id {
                by_supplier.entry(supplier_id).or_default().push(line.into());
            }
        }
        let now = Utc::now();
        by_supplier
            .into_iter()
            .map(|(supplier_id, items)| SupplierOrder {
                id: Uuid::now_v7(), order_id: order.id, supplier_id, items,
                status: SupplierOrderStatus::Pending, tracking_number: None, carrier: None,
                created_at: now, updated_at: now,
            })
            .collect()
    }

    pub fn is_shipped(&self) -> bool {
        matches!(self.status, SupplierOrderStatus::Shipped | SupplierOrderStatus::Delivered)
    }

    /// Moves the supplier order forward. Returns `Ok(false)` when the status
    /// is unchanged (tracking details may still have been updated).
    pub fn advance(&mut self, to: SupplierOrderStatus, tracking_number: Option<String>, carrier: Option<String>) -> Result<bool, DropshipError> {
        let tracking_number = tracking_number.filter(|t| !t.trim().is_empty()).or_else(|| self.tracking_number.clone());
        let changed = to != self.status;
        if changed {
            let allowed = match to {
                SupplierOrderStatus::Cancelled => matches!(self.status, SupplierOrderStatus::Pending | SupplierOrderStatus::Sent | SupplierOrderStatus::Accepted),
                _ => self.status != SupplierOrderStatus::Cancelled && to.rank() > self.status.rank(),
            };
            if !allowed {
                return Err(DropshipError::InvalidTransition { from: self.status, to });
            }
            if matches!(to, SupplierOrderStatus::Shipped | SupplierOrderStatus::Delivered) && tracking_number.is_none() {
                return Err(DropshipError::TrackingRequired);
            }
        }
        self.status = to;
        self.tracking_number = tracking_number;
        if carrier.is_some() { self.carrier = carrier; }
        self.touch();
        Ok(changed)
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// Fulfillment of an order's lines: a dropshipped line counts once its
/// (non-cancelled) supplier order has shipped, an in-house line once the
/// in-house parcel has a tracking number.
pub fn fulfillment_status(order: &Order, supplier_orders: &[SupplierOrder]) -> FulfillmentStatus {
    let active: Vec<&SupplierOrder> = supplier_orders
        .iter()
        .filter(|so| so.order_id == order.id && so.status != SupplierOrderStatus::Cancelled)
        .collect();
    let line_shipped = |line: &LineItem| match line.supplier_id {
        None => order.in_house_tracking.is_some(),
        Some(_) => active.iter().any(|so| so.is_shipped() && so.items.iter().any(|i| i.line_item_id == line.id)),
    };
    let shipped = order.items.iter().filter(|&l| line_shipped(l)).count();
    match shipped {
        0 => FulfillmentStatus::Unfulfilled,
        n if n == order.items.len() => FulfillmentStatus::Fulfilled,
        _ => FulfillmentStatus::Partial,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropshipError {
    #[error("supplier order cannot move from {from} to {to}")]
    InvalidTransition { from: SupplierOrderStatus, to: SupplierOrderStatus },
    #[error("a tracking number is required to ship")]
    TrackingRequired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;
    use rust_decimal::Decimal;

    fn order(suppliers: &[Option<Uuid>]) -> Order {
        let items = suppliers
            .iter()
            .enumerate()
            .map(|(n, s)| LineItem::new(Uuid::now_v7(), *s, format!("SKU-{n}"), "Item", 1, Money::usd(Decimal::TEN)))
            .collect();
        Order::place("ORD-1", Uuid::now_v7(), "c@example.com", items, Money::usd(Decimal::ZERO), None).unwrap()
    }

    #[test]
    fn test_split_groups_by_supplier() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let o = order(&[Some(a), None, Some(b), Some(a)]);
        let split = SupplierOrder::split(&o);
        assert_eq!(split.len(), 2);
        let for_a = split.iter().find(|s| s.supplier_id == a).unwrap();
        assert_eq!(for_a.items.len(), 2);
        assert!(split.iter().all(|s| s.order_id == o.id && s.status == SupplierOrderStatus::Pending));
    }

    #[test]
    fn test_split_without_suppliers_is_empty() {
        assert!(SupplierOrder::split(&order(&[None, None])).is_empty());
    }

    #[test]
    fn test_transitions() {
        let mut so = SupplierOrder::split(&order(&[Some(Uuid::now_v7())])).remove(0);
        assert!(so.advance(SupplierOrderStatus::Sent, None, None).unwrap());
        assert!(!so.advance(SupplierOrderStatus::Sent, None, None).unwrap());
        assert_eq!(so.advance(SupplierOrderStatus::Shipped, None, None), Err(DropshipError::TrackingRequired));
        assert!(so.advance(SupplierOrderStatus::Shipped, Some("1Z999".into()), Some("UPS".into())).unwrap());
        assert!(matches!(so.advance(SupplierOrderStatus::Accepted, None, None), Err(DropshipError::InvalidTransition { .. })));
        assert!(matches!(so.advance(SupplierOrderStatus::Cancelled, None, None), Err(DropshipError::InvalidTransition { .. })));
        assert!(so.advance(SupplierOrderStatus::Delivered, None, None).unwrap());
    }

    #[test]
    fn test_fulfillment_ignores_cancelled_supplier_orders() {
        let supplier = Uuid::now_v7();
        let o = order(&[Some(supplier)]);
        let mut split = SupplierOrder::split(&o);
        split[0].tracking_number = Some("1Z".into());
        split[0].status = SupplierOrderStatus::Shipped;
        assert_eq!(fulfillment_status(&o, &split), FulfillmentStatus::Fulfilled);
        split[0].status = SupplierOrderStatus::Cancelled;
        assert_eq!(fulfillment_status(&o, &split), FulfillmentStatus::Unfulfilled);
    }
}
