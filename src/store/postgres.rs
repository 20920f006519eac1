//! PostgreSQL store over sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Page, RefundSettlement, Store};
use crate::auth::User;
use crate::domain::aggregates::{
    Address, LineItem, Notification, Order, Payment, Product, Refund, Supplier, SupplierOrder, SupplierOrderItem,
};
use crate::domain::value_objects::{Money, Quantity, Sku};
use crate::error::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<Vec<OrderItemRow>> {
        Ok(sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position")
            .bind(order_ids)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn assemble(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let items = self.load_items(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let lines = items.iter().filter(|i| i.order_id == row.id).map(|i| i.to_domain(&row.currency)).collect::<Result<Vec<_>>>()?;
                row.into_domain(lines)
            })
            .collect()
    }
}

fn unique_conflict(e: sqlx::Error, what: &str) -> EcommerceError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => EcommerceError::Conflict(format!("{what} already exists")),
        _ => e.into(),
    }
}

fn count(n: u32) -> i32 { i32::try_from(n).unwrap_or(i32::MAX) }

fn uncount(n: i32, what: &str) -> Result<u32> {
    u32::try_from(n).map_err(|_| EcommerceError::Storage(format!("negative {what}: {n}")))
}

#[derive(sqlx::FromRow)]
struct UserRow { id: Uuid, email: String, role: String, supplier_id: Option<Uuid>, api_token_hash: String }

impl UserRow {
    fn into_domain(self) -> Result<User> {
        Ok(User { id: self.id, email: self.email, role: self.role.parse()?, supplier_id: self.supplier_id, api_token_hash: self.api_token_hash })
    }
}

#[derive(sqlx::FromRow)]
struct SupplierRow { id: Uuid, name: String, email: String, active: bool, created_at: DateTime<Utc> }

impl From<SupplierRow> for Supplier {
    fn from(r: SupplierRow) -> Self { Self { id: r.id, name: r.name, email: r.email, active: r.active, created_at: r.created_at } }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid, sku: String, name: String, description: String, price: Decimal, currency: String,
    inventory: i32, status: String, supplier_id: Option<Uuid>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_domain(self) -> Result<Product> {
        Ok(Product {
            id: self.id,
            sku: Sku::new(self.sku).map_err(|e| EcommerceError::Storage(e.to_string()))?,
            name: self.name,
            description: self.description,
            price: Money::new(self.price, &self.currency),
            inventory: Quantity::new(uncount(self.inventory, "inventory")?),
            status: self.status.parse()?,
            supplier_id: self.supplier_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, customer_id: Uuid, email: String,
    status: String, payment_status: String, fulfillment_status: String, currency: String,
    subtotal: Decimal, shipping: Decimal, total: Decimal,
    shipping_address: Option<Json<Address>>, in_house_tracking: Option<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self, items: Vec<LineItem>) -> Result<Order> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            customer_id: self.customer_id,
            email: self.email,
            status: self.status.parse()?,
            payment_status: self.payment_status.parse()?,
            fulfillment_status: self.fulfillment_status.parse()?,
            items,
            subtotal: Money::new(self.subtotal, &self.currency),
            shipping: Money::new(self.shipping, &self.currency),
            total: Money::new(self.total, &self.currency),
            shipping_address: self.shipping_address.map(|a| a.0),
            in_house_tracking: self.in_house_tracking,
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid, order_id: Uuid, product_id: Uuid, supplier_id: Option<Uuid>, sku: String, name: String,
    quantity: i32, unit_price: Decimal, total: Decimal,
}

impl OrderItemRow {
    fn to_domain(&self, currency: &str) -> Result<LineItem> {
        Ok(LineItem {
            id: self.id,
            product_id: self.product_id,
            supplier_id: self.supplier_id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            quantity: uncount(self.quantity, "quantity")?,
            unit_price: Money::new(self.unit_price, currency),
            total: Money::new(self.total, currency),
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid, order_id: Uuid, gateway_reference: String, currency: String, amount: Decimal, refunded: Decimal,
    status: String, failure_reason: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_domain(self) -> Result<Payment> {
        Ok(Payment {
            id: self.id,
            order_id: self.order_id,
            gateway_reference: self.gateway_reference,
            amount: Money::new(self.amount, &self.currency),
            refunded: Money::new(self.refunded, &self.currency),
            status: self.status.parse()?,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid, order_id: Uuid, payment_id: Uuid, currency: String, amount: Decimal, reason: String,
    status: String, source: String, gateway_refund_id: Option<String>, failure_reason: Option<String>,
    created_by: Option<Uuid>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_domain(self) -> Result<Refund> {
        Ok(Refund {
            id: self.id,
            order_id: self.order_id,
            payment_id: self.payment_id,
            amount: Money::new(self.amount, &self.currency),
            reason: self.reason,
            status: self.status.parse()?,
            source: self.source.parse()?,
            gateway_refund_id: self.gateway_refund_id,
            failure_reason: self.failure_reason,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SupplierOrderRow {
    id: Uuid, order_id: Uuid, supplier_id: Uuid, items: Json<Vec<SupplierOrderItem>>, status: String,
    tracking_number: Option<String>, carrier: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl SupplierOrderRow {
    fn into_domain(self) -> Result<SupplierOrder> {
        Ok(SupplierOrder {
            id: self.id,
            order_id: self.order_id,
            supplier_id: self.supplier_id,
            items: self.items.0,
            status: self.status.parse()?,
            tracking_number: self.tracking_number,
            carrier: self.carrier,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid, recipient: String, kind: String, subject: String, body: String, status: String,
    attempts: i32, last_error: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_domain(self) -> Result<Notification> {
        Ok(Notification {
            id: self.id,
            recipient: self.recipient,
            kind: self.kind.parse()?,
            subject: self.subject,
            body: self.body,
            status: self.status.parse()?,
            attempts: uncount(self.attempts, "attempts")?,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

async fn write_order_status(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<()> {
    sqlx::query("UPDATE orders SET status = $2, payment_status = $3, fulfillment_status = $4, in_house_tracking = $5, updated_at = $6 WHERE id = $1")
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.fulfillment_status.as_str())
        .bind(&order.in_house_tracking)
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn write_supplier_order(tx: &mut Transaction<'_, Postgres>, so: &SupplierOrder) -> Result<()> {
    sqlx::query("UPDATE supplier_orders SET status = $2, tracking_number = $3, carrier = $4, updated_at = $5 WHERE id = $1")
        .bind(so.id)
        .bind(so.status.as_str())
        .bind(&so.tracking_number)
        .bind(&so.carrier)
        .bind(so.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, email, role, supplier_id, api_token_hash, created_at) VALUES ($1, $2, $3, $4, $5, NOW())")
            .bind(user.id).bind(&user.email).bind(user.role.as_str()).bind(user.supplier_id).bind(&user.api_token_hash)
            .execute(&self.pool).await.map_err(|e| unique_conflict(e, "user"))?;
        Ok(())
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT id, email, role, supplier_id, api_token_hash FROM users WHERE api_token_hash = $1")
            .bind(token_hash).fetch_optional(&self.pool).await?
            .map(UserRow::into_domain).transpose()
    }

    async fn insert_supplier(&self, supplier: &Supplier) -> Result<()> {
        sqlx::query("INSERT INTO suppliers (id, name, email, active, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(supplier.id).bind(&supplier.name).bind(&supplier.email).bind(supplier.active).bind(supplier.created_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_supplier(&self, id: Uuid) -> Result<Option<Supplier>> {
        Ok(sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers WHERE id = $1").bind(id).fetch_optional(&self.pool).await?.map(Into::into))
    }

    async fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        let rows = sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers ORDER BY name").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_product(&self, p: &Product) -> Result<()> {
        sqlx::query("INSERT INTO products (id, sku, name, description, price, currency, inventory, status, supplier_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)")
            .bind(p.id).bind(p.sku.as_str()).bind(&p.name).bind(&p.description).bind(p.price.amount()).bind(p.price.currency())
            .bind(count(p.inventory.value())).bind(p.status.as_str()).bind(p.supplier_id).bind(p.created_at).bind(p.updated_at)
            .execute(&self.pool).await.map_err(|e| unique_conflict(e, "sku"))?;
        Ok(())
    }

    async fn update_product(&self, p: &Product) -> Result<()> {
        let done = sqlx::query("UPDATE products SET name = $2, description = $3, price = $4, currency = $5, inventory = $6, status = $7, supplier_id = $8, updated_at = $9 WHERE id = $1")
            .bind(p.id).bind(&p.name).bind(&p.description).bind(p.price.amount()).bind(p.price.currency())
            .bind(count(p.inventory.value())).bind(p.status.as_str()).bind(p.supplier_id).bind(p.updated_at)
            .execute(&self.pool).await?;
        if done.rows_affected() == 0 { return Err(EcommerceError::NotFound("product")); }
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await?
            .map(ProductRow::into_domain).transpose()
    }

    async fn list_products(&self, page: Page) -> Result<(Vec<Product>, i64)> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE status = 'active' ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2")
            .bind(i64::from(page.limit())).bind(page.offset()).fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE status = 'active'").fetch_one(&self.pool).await?;
        Ok((rows.into_iter().map(ProductRow::into_domain).collect::<Result<_>>()?, total.0))
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO orders (id, order_number, customer_id, email, status, payment_status, fulfillment_status, currency, subtotal, shipping, total, shipping_address, in_house_tracking, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)")
            .bind(order.id).bind(&order.order_number).bind(order.customer_id).bind(&order.email)
            .bind(order.status.as_str()).bind(order.payment_status.as_str()).bind(order.fulfillment_status.as_str())
            .bind(order.currency()).bind(order.subtotal.amount()).bind(order.shipping.amount()).bind(order.total.amount())
            .bind(order.shipping_address.clone().map(Json)).bind(&order.in_house_tracking).bind(order.created_at).bind(order.updated_at)
            .execute(&mut *tx).await.map_err(|e| unique_conflict(e, "order number"))?;

        for (position, line) in order.items.iter().enumerate() {
            sqlx::query("INSERT INTO order_items (id, order_id, position, product_id, supplier_id, sku, name, quantity, unit_price, total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
                .bind(line.id).bind(order.id).bind(position as i32).bind(line.product_id).bind(line.supplier_id)
                .bind(&line.sku).bind(&line.name).bind(count(line.quantity)).bind(line.unit_price.amount()).bind(line.total.amount())
                .execute(&mut *tx).await?;
        }

        for line in order.in_house_items() {
            let reserved = sqlx::query("UPDATE products SET inventory = inventory - $2, updated_at = NOW() WHERE id = $1 AND supplier_id IS NULL AND inventory >= $2")
                .bind(line.product_id).bind(count(line.quantity))
                .execute(&mut *tx).await?;
            if reserved.rows_affected() == 0 {
                return Err(EcommerceError::Conflict(format!("insufficient inventory for {}", line.sku)));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        let Some(row) = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        Ok(self.assemble(vec![row]).await?.pop())
    }

    async fn list_orders(&self, customer_id: Option<Uuid>, page: Page) -> Result<(Vec<Order>, i64)> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE ($1::uuid IS NULL OR customer_id = $1) ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3")
            .bind(customer_id).bind(i64::from(page.limit())).bind(page.offset())
            .fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE ($1::uuid IS NULL OR customer_id = $1)")
            .bind(customer_id).fetch_one(&self.pool).await?;
        Ok((self.assemble(rows).await?, total.0))
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_order_status(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn cancel_order(&self, order: &Order, supplier_orders: &[SupplierOrder]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_order_status(&mut tx, order).await?;
        for line in order.in_house_items() {
            sqlx::query("UPDATE products SET inventory = inventory + $2, updated_at = NOW() WHERE id = $1 AND supplier_id IS NULL")
                .bind(line.product_id).bind(count(line.quantity))
                .execute(&mut *tx).await?;
        }
        for so in supplier_orders {
            write_supplier_order(&mut tx, so).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_payment(&self, p: &Payment) -> Result<()> {
        sqlx::query("INSERT INTO payments (id, order_id, gateway_reference, currency, amount, refunded, status, failure_reason, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
            .bind(p.id).bind(p.order_id).bind(&p.gateway_reference).bind(p.amount.currency()).bind(p.amount.amount())
            .bind(p.refunded.amount()).bind(p.status.as_str()).bind(&p.failure_reason).bind(p.created_at).bind(p.updated_at)
            .execute(&self.pool).await.map_err(|e| unique_conflict(e, "payment"))?;
        Ok(())
    }

    async fn update_payment(&self, p: &Payment) -> Result<()> {
        sqlx::query("UPDATE payments SET refunded = $2, status = $3, failure_reason = $4, updated_at = $5 WHERE id = $1")
            .bind(p.id).bind(p.refunded.amount()).bind(p.status.as_str()).bind(&p.failure_reason).bind(p.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE gateway_reference = $1").bind(reference)
            .fetch_optional(&self.pool).await?
            .map(PaymentRow::into_domain).transpose()
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at, id").bind(order_id)
            .fetch_all(&self.pool).await?
            .into_iter().map(PaymentRow::into_domain).collect()
    }

    async fn insert_refund(&self, r: &Refund) -> Result<()> {
        sqlx::query("INSERT INTO refunds (id, order_id, payment_id, currency, amount, reason, status, source, gateway_refund_id, failure_reason, created_by, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)")
            .bind(r.id).bind(r.order_id).bind(r.payment_id).bind(r.amount.currency()).bind(r.amount.amount()).bind(&r.reason)
            .bind(r.status.as_str()).bind(r.source.as_str()).bind(&r.gateway_refund_id).bind(&r.failure_reason)
            .bind(r.created_by).bind(r.created_at).bind(r.updated_at)
            .execute(&self.pool).await.map_err(|e| unique_conflict(e, "refund"))?;
        Ok(())
    }

    async fn update_refund(&self, r: &Refund) -> Result<()> {
        sqlx::query("UPDATE refunds SET status = $2, gateway_refund_id = $3, failure_reason = $4, updated_at = $5 WHERE id = $1")
            .bind(r.id).bind(r.status.as_str()).bind(&r.gateway_refund_id).bind(&r.failure_reason).bind(r.updated_at)
            .execute(&self.pool).await.map_err(|e| unique_conflict(e, "refund"))?;
        Ok(())
    }

    async fn find_refund_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>> {
        sqlx::query_as::<_, RefundRow>("SELECT * FROM refunds WHERE gateway_refund_id = $1").bind(gateway_refund_id)
            .fetch_optional(&self.pool).await?
            .map(RefundRow::into_domain).transpose()
    }

    async fn refunds_for_order(&self, order_id: Uuid) -> Result<Vec<Refund>> {
        sqlx::query_as::<_, RefundRow>("SELECT * FROM refunds WHERE order_id = $1 ORDER BY created_at, id").bind(order_id)
            .fetch_all(&self.pool).await?
            .into_iter().map(RefundRow::into_domain).collect()
    }

    async fn settle_refund(&self, s: RefundSettlement<'_>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let r = s.refund;
        sqlx::query("INSERT INTO refunds (id, order_id, payment_id, currency, amount, reason, status, source, gateway_refund_id, failure_reason, created_by, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
                     ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, gateway_refund_id = EXCLUDED.gateway_refund_id, failure_reason = EXCLUDED.failure_reason, updated_at = EXCLUDED.updated_at")
            .bind(r.id).bind(r.order_id).bind(r.payment_id).bind(r.amount.currency()).bind(r.amount.amount()).bind(&r.reason)
            .bind(r.status.as_str()).bind(r.source.as_str()).bind(&r.gateway_refund_id).bind(&r.failure_reason)
            .bind(r.created_by).bind(r.created_at).bind(r.updated_at)
            .execute(&mut *tx).await.map_err(|e| unique_conflict(e, "refund"))?;

        let p = s.payment;
        let applied = sqlx::query("UPDATE payments SET refunded = $2, status = $3, updated_at = $4 WHERE id = $1 AND refunded = $5")
            .bind(p.id).bind(p.refunded.amount()).bind(p.status.as_str()).bind(p.updated_at).bind(s.previous_refunded)
            .execute(&mut *tx).await?;
        if applied.rows_affected() == 0 {
            return Err(EcommerceError::Conflict("payment was refunded concurrently".into()));
        }

        write_order_status(&mut tx, s.order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_supplier_orders(&self, order_id: Uuid, supplier_orders: &[SupplierOrder]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT id FROM orders WHERE id = $1 FOR UPDATE").bind(order_id).execute(&mut *tx).await?;
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM supplier_orders WHERE order_id = $1)")
            .bind(order_id).fetch_one(&mut *tx).await?;
        if exists {
            return Ok(false);
        }
        for so in supplier_orders {
            sqlx::query("INSERT INTO supplier_orders (id, order_id, supplier_id, items, status, tracking_number, carrier, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
                .bind(so.id).bind(so.order_id).bind(so.supplier_id).bind(Json(&so.items)).bind(so.status.as_str())
                .bind(&so.tracking_number).bind(&so.carrier).bind(so.created_at).bind(so.updated_at)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn update_supplier_order(&self, so: &SupplierOrder) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_supplier_order(&mut tx, so).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_supplier_order(&self, id: Uuid) -> Result<Option<SupplierOrder>> {
        sqlx::query_as::<_, SupplierOrderRow>("SELECT * FROM supplier_orders WHERE id = $1").bind(id)
            .fetch_optional(&self.pool).await?
            .map(SupplierOrderRow::into_domain).transpose()
    }

    async fn supplier_orders_for_order(&self, order_id: Uuid) -> Result<Vec<SupplierOrder>> {
        sqlx::query_as::<_, SupplierOrderRow>("SELECT * FROM supplier_orders WHERE order_id = $1 ORDER BY created_at, id").bind(order_id)
            .fetch_all(&self.pool).await?
            .into_iter().map(SupplierOrderRow::into_domain).collect()
    }

    async fn supplier_orders_for_supplier(&self, supplier_id: Uuid, page: Page) -> Result<(Vec<SupplierOrder>, i64)> {
        let rows = sqlx::query_as::<_, SupplierOrderRow>("SELECT * FROM supplier_orders WHERE supplier_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3")
            .bind(supplier_id).bind(i64::from(page.limit())).bind(page.offset())
            .fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM supplier_orders WHERE supplier_id = $1").bind(supplier_id).fetch_one(&self.pool).await?;
        Ok((rows.into_iter().map(SupplierOrderRow::into_domain).collect::<Result<_>>()?, total.0))
    }

    async fn insert_notification(&self, n: &Notification) -> Result<()> {
        sqlx::query("INSERT INTO notifications (id, recipient, kind, subject, body, status, attempts, last_error, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
            .bind(n.id).bind(&n.recipient).bind(n.kind.as_str()).bind(&n.subject).bind(&n.body).bind(n.status.as_str())
            .bind(count(n.attempts)).bind(&n.last_error).bind(n.created_at).bind(n.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn update_notification(&self, n: &Notification) -> Result<()> {
        sqlx::query("UPDATE notifications SET status = $2, attempts = $3, last_error = $4, updated_at = $5 WHERE id = $1")
            .bind(n.id).bind(n.status.as_str()).bind(count(n.attempts)).bind(&n.last_error).bind(n.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn notifications_for(&self, recipient: &str, page: Page) -> Result<(Vec<Notification>, i64)> {
        let rows = sqlx::query_as::<_, NotificationRow>("SELECT * FROM notifications WHERE recipient = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3")
            .bind(recipient).bind(i64::from(page.limit())).bind(page.offset())
            .fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE recipient = $1").bind(recipient).fetch_one(&self.pool).await?;
        Ok((rows.into_iter().map(NotificationRow::into_domain).collect::<Result<_>>()?, total.0))
    }
}
