//! Persistence port. `PgStore` backs the service, `MemoryStore` backs tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::User;
use crate::domain::aggregates::{Notification, Order, Payment, Product, Refund, Supplier, SupplierOrder};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Pagination parameters, clamped to 1..=100 rows per page.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Page {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl Page {
    pub fn number(&self) -> u32 { self.page.unwrap_or(1).max(1) }
    pub fn limit(&self) -> u32 { self.per_page.unwrap_or(20).clamp(1, 100) }
    /// Row offset; `i64` so the largest page number cannot overflow.
    pub fn offset(&self) -> i64 { i64::from(self.number() - 1) * i64::from(self.limit()) }
}

/// Everything that changes when a refund settles, written in one unit.
/// The payment write only succeeds while its refunded total still equals
/// `previous_refunded`; otherwise a concurrent refund won and the store
/// returns `Conflict`.
pub struct RefundSettlement<'a> {
    pub refund: &'a Refund,
    pub payment: &'a Payment,
    pub previous_refunded: Decimal,
    pub order: &'a Order,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>>;

    async fn insert_supplier(&self, supplier: &Supplier) -> Result<()>;
    async fn get_supplier(&self, id: Uuid) -> Result<Option<Supplier>>;
    async fn list_suppliers(&self) -> Result<Vec<Supplier>>;

    async fn insert_product(&self, product: &Product) -> Result<()>;
    async fn update_product(&self, product: &Product) -> Result<()>;
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn list_products(&self, page: Page) -> Result<(Vec<Product>, i64)>;

    /// Persists a new order and takes in-house lines out of stock. Fails with
    /// `Conflict` if stock ran out in the meantime.
    async fn create_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn list_orders(&self, customer_id: Option<Uuid>, page: Page) -> Result<(Vec<Order>, i64)>;
    async fn update_order(&self, order: &Order) -> Result<()>;
    /// Saves a cancelled order, returns in-house stock and saves the
    /// cancelled supplier orders.
    async fn cancel_order(&self, order: &Order, supplier_orders: &[SupplierOrder]) -> Result<()>;

    async fn insert_payment(&self, payment: &Payment) -> Result<()>;
    async fn update_payment(&self, payment: &Payment) -> Result<()>;
    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>>;

    async fn insert_refund(&self, refund: &Refund) -> Result<()>;
    async fn update_refund(&self, refund: &Refund) -> Result<()>;
    async fn find_refund_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>>;
    async fn refunds_for_order(&self, order_id: Uuid) -> Result<Vec<Refund>>;
    /// Upserts the refund, applies it to the payment and saves the order.
    async fn settle_refund(&self, settlement: RefundSettlement<'_>) -> Result<()>;

    /// Returns `false` without writing anything if the order already has
    /// supplier orders.
    async fn insert_supplier_orders(&self, order_id: Uuid, supplier_orders: &[SupplierOrder]) -> Result<bool>;
    async fn update_supplier_order(&self, supplier_order: &SupplierOrder) -> Result<()>;
    async fn get_supplier_order(&self, id: Uuid) -> Result<Option<SupplierOrder>>;
    async fn supplier_orders_for_order(&self, order_id: Uuid) -> Result<Vec<SupplierOrder>>;
    async fn supplier_orders_for_supplier(&self, supplier_id: Uuid, page: Page) -> Result<(Vec<SupplierOrder>, i64)>;

    async fn insert_notification(&self, notification: &Notification) -> Result<()>;
    async fn update_notification(&self, notification: &Notification) -> Result<()>;
    async fn notifications_for(&self, recipient: &str, page: Page) -> Result<(Vec<Notification>, i64)>;
}
