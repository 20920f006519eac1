//! Taking payments and reacting to gateway webhooks.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::Actor;
use crate::config::StripeConfig;
use crate::domain::aggregates::{OrderStatus, Payment, PaymentStatus};
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::domain::value_objects::Money;
use crate::error::{EcommerceError, Result};
use crate::gateway::stripe::{verify_signature, StripePaymentIntent, WebhookEvent};
use crate::gateway::PaymentGateway;
use crate::services::{load_order, reconcile, DropshipService, NotificationDispatcher, RefundProcessor};
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct StartedPayment {
    pub payment: Payment,
    /// Handed to the storefront to confirm the payment client-side.
    pub client_secret: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: NotificationDispatcher,
    dropship: DropshipService,
    refunds: RefundProcessor,
    stripe: StripeConfig,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: NotificationDispatcher,
        dropship: DropshipService,
        refunds: RefundProcessor,
        stripe: StripeConfig,
    ) -> Self {
        Self { store, gateway, notifier, dropship, refunds, stripe }
    }

    /// Opens a payment intent for the order total.
    pub async fn start_payment(&self, actor: &Actor, order_id: Uuid) -> Result<StartedPayment> {
        let order = load_order(self.store.as_ref(), order_id).await?;
        actor.ensure_order_access(&order)?;
        if order.status != OrderStatus::Pending || !matches!(order.payment_status, PaymentStatus::Unpaid | PaymentStatus::Failed) {
            return Err(EcommerceError::Conflict(format!("order in status {} is not awaiting payment", order.status)));
        }
        let intent = self.gateway.create_payment(&order).await?;
        let payment = Payment::pending(order.id, intent.reference, order.total.clone());
        self.store.insert_payment(&payment).await?;
        tracing::info!(%order_id, payment_id = %payment.id, reference = %payment.gateway_reference, amount = %payment.amount, "payment started");
        Ok(StartedPayment { payment, client_secret: intent.client_secret })
    }

    /// Verifies and applies a Stripe webhook delivery. Redeliveries are
    /// harmless.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<()> {
        verify_signature(payload, signature, &self.stripe.webhook_secret, self.stripe.webhook_tolerance_secs, Utc::now().timestamp())?;
        match WebhookEvent::parse(payload)? {
            WebhookEvent::PaymentSucceeded(intent) => self.payment_succeeded(intent).await,
            WebhookEvent::PaymentFailed(intent) => self.payment_failed(intent).await,
            WebhookEvent::ChargeRefunded(charge) => {
                for refund in charge.refunds.data {
                    self.refunds.sync_gateway_refund(refund.into_gateway()?).await?;
                }
                Ok(())
            }
            WebhookEvent::RefundUpdated(refund) => self.refunds.sync_gateway_refund(refund.into_gateway()?).await.map(|_| ()),
            WebhookEvent::Ignored(kind) => {
                tracing::debug!(%kind, "ignoring webhook");
                Ok(())
            }
        }
    }

    async fn payment_succeeded(&self, intent: StripePaymentIntent) -> Result<()> {
        let Some(mut payment) = self.store.find_payment_by_reference(&intent.id).await? else {
            tracing::warn!(reference = %intent.id, "succeeded intent has no local payment");
            return Ok(());
        };
        let captured = Money::from_minor_units(intent.amount, &intent.currency);
        if captured != payment.amount {
            tracing::warn!(payment_id = %payment.id, expected = %payment.amount, %captured, "captured amount differs from payment");
        }

        let mut order = load_order(self.store.as_ref(), payment.order_id).await?;
        if payment.succeed() {
            self.store.update_payment(&payment).await?;
            reconcile(self.store.as_ref(), &mut order).await?;
            self.store.update_order(&order).await?;
            tracing::info!(order_id = %order.id, payment_id = %payment.id, "payment received");

            let mut events = order.take_events();
            events.push(DomainEvent::Payment(PaymentEvent::Received {
                order_id: order.id,
                order_number: order.order_number.clone(),
                email: order.email.clone(),
                amount: payment.amount.clone(),
            }));
            self.notifier.publish(events).await;
        }

        // also on redelivery, so a split interrupted last time gets finished
        match order.status {
            OrderStatus::Processing => {
                self.dropship.split_order(&order).await?;
            }
            OrderStatus::Cancelled => {
                tracing::warn!(order_id = %order.id, payment_id = %payment.id, "payment captured for a cancelled order; it needs a refund");
            }
            _ => {}
        }
        Ok(())
    }

    async fn payment_failed(&self, intent: StripePaymentIntent) -> Result<()> {
        let Some(mut payment) = self.store.find_payment_by_reference(&intent.id).await? else {
            tracing::warn!(reference = %intent.id, "failed intent has no local payment");
            return Ok(());
        };
        let reason = intent.last_payment_error.and_then(|e| e.message).unwrap_or_else(|| "payment failed".to_string());
        if !payment.fail(&reason) {
            return Ok(());
        }
        self.store.update_payment(&payment).await?;
        let mut order = load_order(self.store.as_ref(), payment.order_id).await?;
        reconcile(self.store.as_ref(), &mut order).await?;
        self.store.update_order(&order).await?;
        tracing::info!(order_id = %order.id, payment_id = %payment.id, %reason, "payment failed");

        let mut events = order.take_events();
        events.push(DomainEvent::Payment(PaymentEvent::Failed {
            order_id: order.id,
            order_number: order.order_number.clone(),
            email: order.email.clone(),
        }));
        self.notifier.publish(events).await;
        Ok(())
    }
}
