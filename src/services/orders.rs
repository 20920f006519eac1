//! Placing, reading and cancelling orders.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::{Actor, Permission};
use crate::domain::aggregates::{Address, LineItem, Order, Payment, Refund, SupplierOrder, SupplierOrderStatus};
use crate::domain::value_objects::Money;
use crate::error::{EcommerceError, Result};
use crate::services::{load_order, NotificationDispatcher};
use crate::store::{Page, Store};

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, max = 100), custom = "positive_quantities")]
    pub items: Vec<OrderItemRequest>,
    /// Defaults to the customer's account email.
    #[validate(email)]
    pub email: Option<String>,
    pub shipping: Option<Decimal>,
    pub shipping_address: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: u32,
}

fn positive_quantities(items: &Vec<OrderItemRequest>) -> std::result::Result<(), ValidationError> {
    if items.iter().all(|i| (1..=1000).contains(&i.quantity)) { Ok(()) } else { Err(ValidationError::new("quantity")) }
}

/// An order with everything that has happened to it.
#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
    pub supplier_orders: Vec<SupplierOrder>,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    notifier: NotificationDispatcher,
    currency: String,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, notifier: NotificationDispatcher, currency: &str) -> Self {
        Self { store, notifier, currency: currency.to_uppercase() }
    }

    pub async fn place_order(&self, actor: &Actor, request: PlaceOrderRequest) -> Result<Order> {
        actor.require(Permission::PlaceOrders)?;
        request.validate()?;

        // same product twice becomes one line
        let mut wanted: Vec<OrderItemRequest> = Vec::with_capacity(request.items.len());
        for item in request.items {
            match wanted.iter_mut().find(|w| w.product_id == item.product_id) {
                Some(w) => w.quantity += item.quantity,
                None => wanted.push(item),
            }
        }

        let mut items = Vec::with_capacity(wanted.len());
        for item in &wanted {
            let product = self.store.get_product(item.product_id).await?.ok_or(EcommerceError::NotFound("product"))?;
            if !product.is_active() {
                return Err(EcommerceError::Validation(format!("product {} is not available", product.sku)));
            }
            if product.price.currency() != self.currency {
                return Err(EcommerceError::Validation(format!("product {} is not priced in {}", product.sku, self.currency)));
            }
            if !product.is_dropshipped() && product.inventory.value() < item.quantity {
                return Err(EcommerceError::Conflict(format!("insufficient inventory for {}", product.sku)));
            }
            items.push(LineItem::new(product.id, product.supplier_id, product.sku.as_str(), &product.name, item.quantity, product.price.clone()));
        }

        let shipping = request.shipping.unwrap_or(Decimal::ZERO);
        if shipping < Decimal::ZERO {
            return Err(EcommerceError::Validation("shipping cannot be negative".into()));
        }
        let shipping = Money::new(shipping, &self.currency);
        shipping.ensure_cents()?;
        let order_number = format!("ORD-{:08}", rand::random::<u32>() % 100_000_000);
        let email = request.email.unwrap_or_else(|| actor.email.clone());
        let mut order = Order::place(order_number, actor.user_id, email, items, shipping, request.shipping_address)?;

        self.store.create_order(&order).await?;
        tracing::info!(order_id = %order.id, order_number = %order.order_number, total = %order.total, "order placed");
        self.notifier.publish(order.take_events()).await;
        Ok(order)
    }

    pub async fn get_order(&self, actor: &Actor, id: Uuid) -> Result<OrderView> {
        let order = load_order(self.store.as_ref(), id).await?;
        actor.ensure_order_access(&order)?;
        Ok(OrderView {
            payments: self.store.payments_for_order(id).await?,
            refunds: self.store.refunds_for_order(id).await?,
            supplier_orders: self.store.supplier_orders_for_order(id).await?,
            order,
        })
    }

    /// Staff see every order, everyone else only their own.
    pub async fn list_orders(&self, actor: &Actor, page: Page) -> Result<(Vec<Order>, i64)> {
        let customer = if actor.role.grants(Permission::ViewAllOrders) { None } else { Some(actor.user_id) };
        self.store.list_orders(customer, page).await
    }

    /// Cancels an unshipped, unpaid order: returns in-house stock and calls
    /// off the open supplier orders.
    pub async fn cancel_order(&self, actor: &Actor, id: Uuid) -> Result<Order> {
        let mut order = load_order(self.store.as_ref(), id).await?;
        if order.customer_id != actor.user_id {
            actor.require(Permission::ManageOrders)?;
        }
        let mut supplier_orders = self.store.supplier_orders_for_order(id).await?;
        order.cancel(&supplier_orders)?;

        let mut cancelled = Vec::new();
        for so in supplier_orders.iter_mut().filter(|so| so.status != SupplierOrderStatus::Cancelled) {
            so.advance(SupplierOrderStatus::Cancelled, None, None)?;
            cancelled.push(so.clone());
        }
        self.store.cancel_order(&order, &cancelled).await?;
        tracing::info!(order_id = %order.id, supplier_orders = cancelled.len(), "order cancelled");
        self.notifier.publish(order.take_events()).await;
        Ok(order)
    }
}
