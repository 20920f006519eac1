//! Application services: the operations behind the HTTP API and webhooks.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::Config;
use crate::domain::aggregates::Order;
use crate::error::{EcommerceError, Result};
use crate::gateway::PaymentGateway;
use crate::store::Store;

pub mod catalog;
pub mod dropship;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod refunds;

pub use catalog::CatalogService;
pub use dropship::DropshipService;
pub use notifications::{LogChannel, NatsChannel, NotificationChannel, NotificationDispatcher};
pub use orders::OrderService;
pub use payments::PaymentService;
pub use refunds::RefundProcessor;

#[derive(Clone)]
pub struct Services {
    pub catalog: CatalogService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub refunds: RefundProcessor,
    pub dropship: DropshipService,
    pub notifier: NotificationDispatcher,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, notifier: NotificationDispatcher, config: &Config) -> Self {
        let catalog = CatalogService::new(store.clone(), &config.store_currency);
        let orders = OrderService::new(store.clone(), notifier.clone(), &config.store_currency);
        let dropship = DropshipService::new(store.clone(), notifier.clone());
        let refunds = RefundProcessor::new(store.clone(), gateway.clone(), notifier.clone(), config.refund_max_age_days);
        let payments = PaymentService::new(store, gateway, notifier.clone(), dropship.clone(), refunds.clone(), config.stripe.clone());
        Self { catalog, orders, payments, refunds, dropship, notifier }
    }
}

pub(crate) async fn load_order(store: &dyn Store, id: Uuid) -> Result<Order> {
    store.get_order(id).await?.ok_or(EcommerceError::NotFound("order"))
}

/// Recalculates `order` from the stored payments and supplier orders. The
/// caller saves it.
pub(crate) async fn reconcile(store: &dyn Store, order: &mut Order) -> Result<()> {
    let payments = store.payments_for_order(order.id).await?;
    let supplier_orders = store.supplier_orders_for_order(order.id).await?;
    order.recalculate(&payments, &supplier_orders)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! A wired-up service graph over `MemoryStore` and `FakeGateway`.

    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::*;
    use crate::auth::{hash_token, Actor, Role, User};
    use crate::domain::aggregates::{Product, Supplier};
    use crate::domain::value_objects::{Money, Quantity, Sku};
    use crate::gateway::fake::FakeGateway;
    use crate::gateway::stripe::sign;
    use crate::services::orders::{OrderItemRequest, PlaceOrderRequest};
    use crate::store::MemoryStore;

    pub const WEBHOOK_SECRET: &str = "whsec_test";

    pub struct Fixture {
        pub store: Arc<MemoryStore>,
        pub gateway: Arc<FakeGateway>,
        pub config: Config,
        pub services: Services,
        pub admin: Actor,
        pub staff: Actor,
        pub customer: Actor,
        pub supplier: Supplier,
        pub supplier_actor: Actor,
        /// In-house product, 10 in stock, 25.00.
        pub shirt: Product,
        /// Dropshipped by `supplier`, 40.00.
        pub mug: Product,
    }

    pub fn config() -> Config {
        Config::from_lookup(|key: &str| match key {
            "DATABASE_URL" => Some("postgres://localhost/test".into()),
            "STRIPE_SECRET_KEY" => Some("sk_test".into()),
            "STRIPE_WEBHOOK_SECRET" => Some(WEBHOOK_SECRET.into()),
            "STAFF_EMAIL" => Some("ops@shop.test".into()),
            _ => None,
        })
        .expect("test config")
    }

    fn actor(id: Uuid, email: &str, role: Role, supplier_id: Option<Uuid>) -> Actor {
        Actor { user_id: id, email: email.into(), role, supplier_id }
    }

    pub async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let config = config();
        let notifier = NotificationDispatcher::new(store.clone(), vec![Arc::new(LogChannel) as Arc<dyn NotificationChannel>], 2, config.staff_email.clone())
            .with_backoff(Duration::ZERO);
        let services = Services::new(store.clone(), gateway.clone(), notifier, &config);

        let supplier = Supplier::new("Acme Mugs", "orders@acme.test");
        store.insert_supplier(&supplier).await.unwrap();

        let mut shirt = Product::create(Sku::new("SHIRT-1").unwrap(), "Shirt", Money::usd(Decimal::new(2500, 2)));
        shirt.inventory = Quantity::new(10);
        shirt.publish().unwrap();
        store.insert_product(&shirt).await.unwrap();

        let mut mug = Product::create(Sku::new("MUG-1").unwrap(), "Mug", Money::usd(Decimal::new(4000, 2)));
        mug.supplier_id = Some(supplier.id);
        mug.publish().unwrap();
        store.insert_product(&mug).await.unwrap();

        let admin = actor(Uuid::now_v7(), "admin@shop.test", Role::Admin, None);
        let staff = actor(Uuid::now_v7(), "staff@shop.test", Role::Staff, None);
        let customer = actor(Uuid::now_v7(), "buyer@example.com", Role::Customer, None);
        let supplier_actor = actor(Uuid::now_v7(), "orders@acme.test", Role::Supplier, Some(supplier.id));
        for (a, token) in [(&admin, "admin-token"), (&staff, "staff-token"), (&customer, "customer-token"), (&supplier_actor, "supplier-token")] {
            let user = User { id: a.user_id, email: a.email.clone(), role: a.role, supplier_id: a.supplier_id, api_token_hash: hash_token(token) };
            store.insert_user(&user).await.unwrap();
        }

        Fixture { store, gateway, config, services, admin, staff, customer, supplier, supplier_actor, shirt, mug }
    }

    impl Fixture {
        /// Two shirts from stock and one dropshipped mug: 90.00 total.
        pub async fn place_order(&self) -> Order {
            let request = PlaceOrderRequest {
                items: vec![
                    OrderItemRequest { product_id: self.shirt.id, quantity: 2 },
                    OrderItemRequest { product_id: self.mug.id, quantity: 1 },
                ],
                email: None,
                shipping: None,
                shipping_address: None,
            };
            self.services.orders.place_order(&self.customer, request).await.unwrap()
        }

        pub fn signed(&self, payload: &str) -> String {
            sign(payload.as_bytes(), WEBHOOK_SECRET, chrono::Utc::now().timestamp())
        }

        pub async fn webhook(&self, payload: String) -> Result<()> {
            let header = self.signed(&payload);
            self.services.payments.handle_webhook(payload.as_bytes(), &header).await
        }

        /// Starts a payment for `order` and confirms it through the webhook.
        pub async fn pay(&self, order: &Order) -> Order {
            let started = self.services.payments.start_payment(&self.customer, order.id).await.unwrap();
            let payload = serde_json::json!({
                "type": "payment_intent.succeeded",
                "data": { "object": {
                    "id": started.payment.gateway_reference,
                    "amount": order.total.minor_units().unwrap(),
                    "currency": "usd",
                    "client_secret": started.client_secret,
                }}
            });
            self.webhook(payload.to_string()).await.unwrap();
            self.order(order.id).await
        }

        pub async fn order(&self, id: Uuid) -> Order {
            self.store.get_order(id).await.unwrap().unwrap()
        }
    }
}
