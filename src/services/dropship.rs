//! Splitting paid orders into supplier orders and tracking their fulfillment.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Actor, Permission};
use crate::domain::aggregates::{Order, SupplierOrder, SupplierOrderStatus};
use crate::domain::events::{DomainEvent, DropshipEvent};
use crate::error::{EcommerceError, Result};
use crate::services::{load_order, reconcile, NotificationDispatcher};
use crate::store::{Page, Store};

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSupplierOrderRequest {
    pub status: SupplierOrderStatus,
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub carrier: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ShipRequest {
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: String,
}

#[derive(Clone)]
pub struct DropshipService {
    store: Arc<dyn Store>,
    notifier: NotificationDispatcher,
}

impl DropshipService {
    pub fn new(store: Arc<dyn Store>, notifier: NotificationDispatcher) -> Self {
        Self { store, notifier }
    }

    /// Creates one supplier order per supplier, notifies each supplier and
    /// marks the orders sent. Splitting an order twice returns the supplier
    /// orders of the first split, finishing any that were stored but never
    /// sent.
    pub async fn split_order(&self, order: &Order) -> Result<Vec<SupplierOrder>> {
        let split = SupplierOrder::split(order);
        if split.is_empty() {
            return Ok(split);
        }
        let stored = if self.store.insert_supplier_orders(order.id, &split).await? {
            split
        } else {
            tracing::debug!(order_id = %order.id, "order already split");
            self.store.supplier_orders_for_order(order.id).await?
        };
        let (unsent, mut done): (Vec<_>, Vec<_>) = stored.into_iter().partition(|so| so.status == SupplierOrderStatus::Pending);
        if unsent.is_empty() {
            return Ok(done);
        }

        let events = unsent
            .iter()
            .map(|so| DomainEvent::Dropship(DropshipEvent::SupplierOrderCreated {
                supplier_order_id: so.id,
                supplier_id: so.supplier_id,
                order_number: order.order_number.clone(),
                item_count: so.items.len(),
            }))
            .collect();
        self.notifier.publish(events).await;

        let sent = unsent.len();
        for mut so in unsent {
            so.advance(SupplierOrderStatus::Sent, None, None)?;
            self.store.update_supplier_order(&so).await?;
            done.push(so);
        }
        tracing::info!(order_id = %order.id, supplier_orders = sent, "supplier orders sent");
        Ok(done)
    }

    pub async fn update_supplier_order(&self, actor: &Actor, id: Uuid, request: UpdateSupplierOrderRequest) -> Result<SupplierOrder> {
        request.validate()?;
        let mut so = self.store.get_supplier_order(id).await?.ok_or(EcommerceError::NotFound("supplier order"))?;
        actor.ensure_supplier_order_access(&so)?;
        let changed = so.advance(request.status, request.tracking_number, request.carrier)?;
        self.store.update_supplier_order(&so).await?;
        if changed {
            tracing::info!(supplier_order_id = %so.id, status = %so.status, "supplier order updated");
            self.refresh_order(so.order_id).await?;
        }
        Ok(so)
    }

    /// Records the tracking number of the parcel with the in-house lines.
    pub async fn mark_in_house_shipped(&self, actor: &Actor, order_id: Uuid, request: ShipRequest) -> Result<Order> {
        actor.require(Permission::ManageOrders)?;
        request.validate()?;
        let mut order = load_order(self.store.as_ref(), order_id).await?;
        order.ship_in_house(request.tracking_number)?;
        reconcile(self.store.as_ref(), &mut order).await?;
        self.store.update_order(&order).await?;
        self.notifier.publish(order.take_events()).await;
        Ok(order)
    }

    pub async fn list_for_order(&self, actor: &Actor, order_id: Uuid) -> Result<Vec<SupplierOrder>> {
        let order = load_order(self.store.as_ref(), order_id).await?;
        actor.ensure_order_access(&order)?;
        self.store.supplier_orders_for_order(order_id).await
    }

    /// A supplier's own orders; staff name the supplier.
    pub async fn list_for_supplier(&self, actor: &Actor, supplier_id: Option<Uuid>, page: Page) -> Result<(Vec<SupplierOrder>, i64)> {
        let supplier_id = match (actor.supplier_id, supplier_id) {
            (Some(own), None) => own,
            (Some(own), Some(wanted)) if own == wanted => own,
            (_, wanted) => {
                actor.require(Permission::ManageSupplierOrders)?;
                wanted.ok_or_else(|| EcommerceError::Validation("supplier_id is required".into()))?
            }
        };
        self.store.supplier_orders_for_supplier(supplier_id, page).await
    }

    async fn refresh_order(&self, order_id: Uuid) -> Result<Order> {
        let mut order = load_order(self.store.as_ref(), order_id).await?;
        reconcile(self.store.as_ref(), &mut order).await?;
        self.store.update_order(&order).await?;
        self.notifier.publish(order.take_events()).await;
        Ok(order)
    }
}
