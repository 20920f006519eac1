//! Turns domain events into notifications and delivers them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::auth::{Actor, Permission};
use crate::domain::aggregates::{Notification, NotificationKind};
use crate::domain::events::{DomainEvent, DropshipEvent, OrderEvent, PaymentEvent, RefundEvent};
use crate::error::Result;
use crate::store::{Page, Store};

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, notification: &Notification) -> std::result::Result<(), String>;
}

/// Writes notifications to the log; always available.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str { "log" }

    async fn deliver(&self, n: &Notification) -> std::result::Result<(), String> {
        tracing::info!(notification_id = %n.id, recipient = %n.recipient, kind = %n.kind, subject = %n.subject, "notification");
        Ok(())
    }
}

/// Publishes notifications as JSON on `notifications.<kind>` for mailers
/// and other consumers.
pub struct NatsChannel {
    client: async_nats::Client,
}

impl NatsChannel {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl NotificationChannel for NatsChannel {
    fn name(&self) -> &'static str { "nats" }

    async fn deliver(&self, n: &Notification) -> std::result::Result<(), String> {
        let payload = serde_json::to_vec(n).map_err(|e| e.to_string())?;
        self.client
            .publish(format!("notifications.{}", n.kind), payload.into())
            .await
            .map_err(|e| e.to_string())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    channels: Arc<Vec<Arc<dyn NotificationChannel>>>,
    max_attempts: u32,
    backoff: Duration,
    staff_email: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>, channels: Vec<Arc<dyn NotificationChannel>>, max_attempts: u32, staff_email: Option<String>) -> Self {
        Self { store, channels: Arc::new(channels), max_attempts: max_attempts.max(1), backoff: Duration::from_millis(500), staff_email }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Records a notification for every event and hands delivery to a
    /// background task. Never fails: notification problems are logged and
    /// must not undo the business operation that raised the events.
    pub async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            let Some(notification) = self.render(&event).await else { continue };
            if let Err(e) = self.store.insert_notification(&notification).await {
                tracing::error!(error = %e, event = event.name(), "failed to record notification");
                continue;
            }
            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.deliver(notification).await });
        }
    }

    /// Tries every channel, retrying the ones that failed with linear
    /// backoff, and stores the final state.
    pub async fn deliver(&self, mut notification: Notification) -> Notification {
        let mut pending: Vec<Arc<dyn NotificationChannel>> = self.channels.iter().cloned().collect();
        for attempt in 1..=self.max_attempts {
            let outcomes = join_all(pending.iter().map(|c| c.deliver(&notification))).await;
            let mut failed = Vec::new();
            let mut errors = Vec::new();
            for (channel, outcome) in pending.iter().zip(outcomes) {
                if let Err(e) = outcome {
                    tracing::warn!(notification_id = %notification.id, channel = channel.name(), attempt, error = %e, "notification delivery failed");
                    errors.push(format!("{}: {e}", channel.name()));
                    failed.push(channel.clone());
                }
            }
            notification.record_attempt(if errors.is_empty() { Ok(()) } else { Err(errors.join("; ")) });
            pending = failed;
            if pending.is_empty() { break; }
            if attempt < self.max_attempts { tokio::time::sleep(self.backoff * attempt).await; }
        }
        if !pending.is_empty() {
            notification.give_up();
        }
        if let Err(e) = self.store.update_notification(&notification).await {
            tracing::error!(notification_id = %notification.id, error = %e, "failed to store notification state");
        }
        notification
    }

    async fn render(&self, event: &DomainEvent) -> Option<Notification> {
        use NotificationKind as K;
        let n = match event {
            DomainEvent::Order(OrderEvent::Placed { order_number, email, total, .. }) => Notification::new(
                email, K::OrderPlaced,
                format!("Order {order_number} received"),
                format!("Thanks for your order {order_number}. Total: {total}."),
            ),
            DomainEvent::Order(OrderEvent::Shipped { order_number, email, .. }) => Notification::new(
                email, K::OrderShipped,
                format!("Order {order_number} has shipped"),
                format!("Everything in order {order_number} is on its way."),
            ),
            DomainEvent::Order(OrderEvent::Cancelled { order_number, email, .. }) => Notification::new(
                email, K::OrderCancelled,
                format!("Order {order_number} cancelled"),
                format!("Order {order_number} has been cancelled."),
            ),
            DomainEvent::Payment(PaymentEvent::Received { order_number, email, amount, .. }) => Notification::new(
                email, K::PaymentReceived,
                format!("Payment received for order {order_number}"),
                format!("We received your payment of {amount}."),
            ),
            DomainEvent::Payment(PaymentEvent::Failed { order_number, email, .. }) => Notification::new(
                email, K::PaymentFailed,
                format!("Payment failed for order {order_number}"),
                format!("Your payment for order {order_number} did not go through. Please try again."),
            ),
            DomainEvent::Refund(RefundEvent::Issued { order_number, email, amount, .. }) => Notification::new(
                email, K::RefundIssued,
                format!("Refund issued for order {order_number}"),
                format!("A refund of {amount} is on its way back to you."),
            ),
            DomainEvent::Refund(RefundEvent::Failed { refund_id, order_number, amount, reason, .. }) => {
                let Some(staff) = &self.staff_email else {
                    tracing::error!(%refund_id, %order_number, %reason, "refund failed and no staff address is configured");
                    return None;
                };
                Notification::new(
                    staff, K::RefundFailed,
                    format!("Refund failed for order {order_number}"),
                    format!("Refund {refund_id} of {amount} failed: {reason}"),
                )
            }
            DomainEvent::Dropship(DropshipEvent::SupplierOrderCreated { supplier_order_id, supplier_id, order_number, item_count }) => {
                let supplier = match self.store.get_supplier(*supplier_id).await {
                    Ok(Some(s)) => s,
                    Ok(None) => {
                        tracing::error!(%supplier_id, "supplier order created for unknown supplier");
                        return None;
                    }
                    Err(e) => {
                        tracing::error!(%supplier_id, error = %e, "failed to load supplier");
                        return None;
                    }
                };
                Notification::new(
                    supplier.email, K::SupplierOrderCreated,
                    format!("New order {order_number}"),
                    format!("{item_count} line(s) to ship for order {order_number}. Reference {supplier_order_id}."),
                )
            }
        };
        Some(n)
    }
}

/// Notifications addressed to the actor, or to `recipient` for staff.
pub async fn list_notifications(store: &dyn Store, actor: &Actor, recipient: Option<&str>, page: Page) -> Result<(Vec<Notification>, i64)> {
    actor.require(Permission::ViewNotifications)?;
    let recipient = match recipient {
        Some(r) if r != actor.email => {
            actor.require(Permission::ManageOrders)?;
            r
        }
        _ => actor.email.as_str(),
    };
    store.notifications_for(recipient, page).await
}
