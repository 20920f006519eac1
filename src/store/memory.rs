//! In-memory store used by tests and local experiments.

use std::collections::HashMap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Page, RefundSettlement, Store};
use crate::auth::User;
use crate::domain::aggregates::{Notification, Order, Payment, Product, Refund, Supplier, SupplierOrder};
use crate::error::{EcommerceError, Result};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    suppliers: HashMap<Uuid, Supplier>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    refunds: HashMap<Uuid, Refund>,
    supplier_orders: HashMap<Uuid, SupplierOrder>,
    notifications: HashMap<Uuid, Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

/// Newest first, like the SQL queries.
fn paginate<T: Clone>(mut rows: Vec<T>, key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, Uuid), page: Page) -> (Vec<T>, i64) {
    rows.sort_by_key(|r| std::cmp::Reverse(key(r)));
    let total = rows.len() as i64;
    let data = rows.into_iter().skip(usize::try_from(page.offset()).unwrap_or(usize::MAX)).take(page.limit() as usize).collect();
    (data, total)
}

fn oldest_first<T>(mut rows: Vec<T>, key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, Uuid)) -> Vec<T> {
    rows.sort_by_key(|r| key(r));
    rows
}

fn without_events(order: &Order) -> Order {
    let mut stored = order.clone();
    stored.events.clear();
    stored
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.tables.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.values().find(|u| u.api_token_hash == token_hash).cloned())
    }

    async fn insert_supplier(&self, supplier: &Supplier) -> Result<()> {
        self.tables.lock().await.suppliers.insert(supplier.id, supplier.clone());
        Ok(())
    }

    async fn get_supplier(&self, id: Uuid) -> Result<Option<Supplier>> {
        Ok(self.tables.lock().await.suppliers.get(&id).cloned())
    }

    async fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        let mut suppliers: Vec<Supplier> = self.tables.lock().await.suppliers.values().cloned().collect();
        suppliers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(suppliers)
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.products.values().any(|p| p.sku == product.sku) {
            return Err(EcommerceError::Conflict(format!("sku {} already exists", product.sku)));
        }
        t.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut t = self.tables.lock().await;
        let slot = t.products.get_mut(&product.id).ok_or(EcommerceError::NotFound("product"))?;
        *slot = product.clone();
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self, page: Page) -> Result<(Vec<Product>, i64)> {
        let rows = self.tables.lock().await.products.values().filter(|p| p.is_active()).cloned().collect();
        Ok(paginate(rows, |p: &Product| (p.created_at, p.id), page))
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut t = self.tables.lock().await;
        for line in order.in_house_items() {
            let product = t.products.get(&line.product_id).ok_or(EcommerceError::NotFound("product"))?;
            if product.inventory.value() < line.quantity {
                return Err(EcommerceError::Conflict(format!("insufficient inventory for {}", line.sku)));
            }
        }
        for line in order.in_house_items() {
            if let Some(product) = t.products.get_mut(&line.product_id) {
                product.reserve(line.quantity)?;
            }
        }
        t.orders.insert(order.id, without_events(order));
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, customer_id: Option<Uuid>, page: Page) -> Result<(Vec<Order>, i64)> {
        let rows = self
            .tables
            .lock()
            .await
            .orders
            .values()
            .filter(|o| customer_id.map_or(true, |c| o.customer_id == c))
            .cloned()
            .collect();
        Ok(paginate(rows, |o: &Order| (o.created_at, o.id), page))
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut t = self.tables.lock().await;
        let slot = t.orders.get_mut(&order.id).ok_or(EcommerceError::NotFound("order"))?;
        *slot = without_events(order);
        Ok(())
    }

    async fn cancel_order(&self, order: &Order, supplier_orders: &[SupplierOrder]) -> Result<()> {
        let mut t = self.tables.lock().await;
        for line in order.in_house_items() {
            if let Some(product) = t.products.get_mut(&line.product_id) {
                product.release(line.quantity);
            }
        }
        for so in supplier_orders {
            t.supplier_orders.insert(so.id, so.clone());
        }
        t.orders.insert(order.id, without_events(order));
        Ok(())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        self.tables.lock().await.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut t = self.tables.lock().await;
        let slot = t.payments.get_mut(&payment.id).ok_or(EcommerceError::NotFound("payment"))?;
        *slot = payment.clone();
        Ok(())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        Ok(self.tables.lock().await.payments.values().find(|p| p.gateway_reference == reference).cloned())
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let rows = self.tables.lock().await.payments.values().filter(|p| p.order_id == order_id).cloned().collect();
        Ok(oldest_first(rows, |p: &Payment| (p.created_at, p.id)))
    }

    async fn insert_refund(&self, refund: &Refund) -> Result<()> {
        let mut t = self.tables.lock().await;
        if let Some(gid) = &refund.gateway_refund_id {
            if t.refunds.values().any(|r| r.gateway_refund_id.as_ref() == Some(gid)) {
                return Err(EcommerceError::Conflict(format!("refund {gid} already recorded")));
            }
        }
        t.refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn update_refund(&self, refund: &Refund) -> Result<()> {
        let mut t = self.tables.lock().await;
        let slot = t.refunds.get_mut(&refund.id).ok_or(EcommerceError::NotFound("refund"))?;
        *slot = refund.clone();
        Ok(())
    }

    async fn find_refund_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>> {
        Ok(self
            .tables
            .lock()
            .await
            .refunds
            .values()
            .find(|r| r.gateway_refund_id.as_deref() == Some(gateway_refund_id))
            .cloned())
    }

    async fn refunds_for_order(&self, order_id: Uuid) -> Result<Vec<Refund>> {
        let rows = self.tables.lock().await.refunds.values().filter(|r| r.order_id == order_id).cloned().collect();
        Ok(oldest_first(rows, |r: &Refund| (r.created_at, r.id)))
    }

    async fn settle_refund(&self, settlement: RefundSettlement<'_>) -> Result<()> {
        let mut t = self.tables.lock().await;
        let current = t.payments.get(&settlement.payment.id).ok_or(EcommerceError::NotFound("payment"))?;
        if current.refunded.amount() != settlement.previous_refunded {
            return Err(EcommerceError::Conflict("payment was refunded concurrently".into()));
        }
        if let Some(gid) = &settlement.refund.gateway_refund_id {
            let duplicate = t.refunds.values().any(|r| r.id != settlement.refund.id && r.gateway_refund_id.as_ref() == Some(gid));
            if duplicate {
                return Err(EcommerceError::Conflict(format!("refund {gid} already recorded")));
            }
        }
        t.refunds.insert(settlement.refund.id, settlement.refund.clone());
        t.payments.insert(settlement.payment.id, settlement.payment.clone());
        t.orders.insert(settlement.order.id, without_events(settlement.order));
        Ok(())
    }

    async fn insert_supplier_orders(&self, order_id: Uuid, supplier_orders: &[SupplierOrder]) -> Result<bool> {
        let mut t = self.tables.lock().await;
        if t.supplier_orders.values().any(|so| so.order_id == order_id) {
            return Ok(false);
        }
        for so in supplier_orders {
            t.supplier_orders.insert(so.id, so.clone());
        }
        Ok(true)
    }

    async fn update_supplier_order(&self, supplier_order: &SupplierOrder) -> Result<()> {
        let mut t = self.tables.lock().await;
        let slot = t.supplier_orders.get_mut(&supplier_order.id).ok_or(EcommerceError::NotFound("supplier order"))?;
        *slot = supplier_order.clone();
        Ok(())
    }

    async fn get_supplier_order(&self, id: Uuid) -> Result<Option<SupplierOrder>> {
        Ok(self.tables.lock().await.supplier_orders.get(&id).cloned())
    }

    async fn supplier_orders_for_order(&self, order_id: Uuid) -> Result<Vec<SupplierOrder>> {
        let rows = self.tables.lock().await.supplier_orders.values().filter(|so| so.order_id == order_id).cloned().collect();
        Ok(oldest_first(rows, |so: &SupplierOrder| (so.created_at, so.id)))
    }

    async fn supplier_orders_for_supplier(&self, supplier_id: Uuid, page: Page) -> Result<(Vec<SupplierOrder>, i64)> {
        let rows = self.tables.lock().await.supplier_orders.values().filter(|so| so.supplier_id == supplier_id).cloned().collect();
        Ok(paginate(rows, |so: &SupplierOrder| (so.created_at, so.id), page))
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.tables.lock().await.notifications.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn update_notification(&self, notification: &Notification) -> Result<()> {
        let mut t = self.tables.lock().await;
        let slot = t.notifications.get_mut(&notification.id).ok_or(EcommerceError::NotFound("notification"))?;
        *slot = notification.clone();
        Ok(())
    }

    async fn notifications_for(&self, recipient: &str, page: Page) -> Result<(Vec<Notification>, i64)> {
        let rows = self.tables.lock().await.notifications.values().filter(|n| n.recipient == recipient).cloned().collect();
        Ok(paginate(rows, |n: &Notification| (n.created_at, n.id), page))
    }
}
