//! Refund processing and reconciliation with the gateway.
//!
//! A payment's `refunded` total only ever grows through [`Store::settle_refund`],
//! which compares-and-sets it. Every path that completes a refund (the
//! synchronous gateway answer, a `refund.updated` webhook, a refund found at
//! the gateway) funnels through `settle`, so the same refund can arrive
//! through several of them and still count once.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Actor, Permission};
use crate::domain::aggregates::refund::validate_refund;
use crate::domain::aggregates::{Order, Payment, Refund, RefundStatus};
use crate::domain::events::{DomainEvent, RefundEvent};
use crate::domain::value_objects::Money;
use crate::error::{EcommerceError, Result};
use crate::gateway::{GatewayRefund, GatewayRefundStatus, PaymentGateway, RefundRequest};
use crate::services::{load_order, NotificationDispatcher};
use crate::store::{RefundSettlement, Store};

const SETTLE_ATTEMPTS: u32 = 3;
const MANUAL_REASON: &str = "refunded at the payment gateway";

#[derive(Debug, Deserialize, Validate)]
pub struct ProcessRefundRequest {
    /// Defaults to everything still refundable on the payment.
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManualRefundRequest {
    #[validate(length(min = 1, max = 255))]
    pub gateway_refund_id: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct RefundProcessor {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: NotificationDispatcher,
    max_age_days: i64,
}

impl RefundProcessor {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, notifier: NotificationDispatcher, max_age_days: i64) -> Self {
        Self { store, gateway, notifier, max_age_days }
    }

    /// Refunds the order's most recent refundable payment through the gateway.
    pub async fn process_refund(&self, actor: &Actor, order_id: Uuid, request: ProcessRefundRequest) -> Result<Refund> {
        actor.require(Permission::IssueRefunds)?;
        request.validate()?;
        let order = load_order(self.store.as_ref(), order_id).await?;
        let payments = self.store.payments_for_order(order_id).await?;
        let refunds = self.store.refunds_for_order(order_id).await?;
        let payment = payments
            .iter()
            .rev()
            .find(|p| p.is_refundable())
            .ok_or_else(|| EcommerceError::Conflict("order has no refundable payment".into()))?;

        let requested = request.amount.map(|a| Money::new(a, payment.amount.currency()));
        let amount = validate_refund(payment, &refunds, requested, Utc::now(), self.max_age_days)?;
        let mut refund = Refund::request(payment, amount, request.reason, Some(actor.user_id));
        self.store.insert_refund(&refund).await?;
        tracing::info!(refund_id = %refund.id, %order_id, amount = %refund.amount, "refund requested");

        let outcome = self
            .gateway
            .refund(RefundRequest { refund_id: refund.id, payment_reference: &payment.gateway_reference, amount: &refund.amount, reason: &refund.reason })
            .await;
        let gateway_refund = match outcome {
            Ok(r) => r,
            Err(e) => {
                self.fail(&order, refund, e.to_string()).await?;
                return Err(e);
            }
        };

        refund.attach_gateway_id(&gateway_refund.id);
        match gateway_refund.status {
            GatewayRefundStatus::Succeeded => self.settle(refund).await,
            GatewayRefundStatus::Pending => {
                self.store.update_refund(&refund).await?;
                tracing::info!(refund_id = %refund.id, gateway_refund_id = %gateway_refund.id, "refund pending at gateway");
                Ok(refund)
            }
            GatewayRefundStatus::Failed(reason) => {
                self.fail(&order, refund, reason.clone()).await?;
                Err(EcommerceError::Gateway(reason))
            }
        }
    }

    /// Records a refund someone issued from the gateway's dashboard.
    /// Recording the same gateway refund again returns the stored refund.
    pub async fn record_manual_refund(&self, actor: &Actor, order_id: Uuid, request: ManualRefundRequest) -> Result<Refund> {
        actor.require(Permission::IssueRefunds)?;
        request.validate()?;
        let order = load_order(self.store.as_ref(), order_id).await?;
        if let Some(existing) = self.store.find_refund_by_gateway_id(&request.gateway_refund_id).await? {
            if existing.order_id != order.id {
                return Err(EcommerceError::Conflict("refund is recorded against another order".into()));
            }
            return Ok(existing);
        }

        let gateway_refund = self.gateway.retrieve_refund(&request.gateway_refund_id).await?;
        let payments = self.store.payments_for_order(order.id).await?;
        let payment = payments
            .iter()
            .find(|p| p.gateway_reference == gateway_refund.payment_reference)
            .ok_or_else(|| EcommerceError::Validation("refund does not belong to this order".into()))?;
        if gateway_refund.status != GatewayRefundStatus::Succeeded {
            return Err(EcommerceError::Conflict("refund has not succeeded at the gateway".into()));
        }
        let reason = request.reason.unwrap_or_else(|| MANUAL_REASON.to_string());
        let refund = Refund::manual(payment, gateway_refund.amount, gateway_refund.id, reason, Some(actor.user_id));
        self.check_fits(payment, &refund)?;
        self.settle(refund).await
    }

    pub async fn list_refunds(&self, actor: &Actor, order_id: Uuid) -> Result<Vec<Refund>> {
        let order = load_order(self.store.as_ref(), order_id).await?;
        actor.ensure_order_access(&order)?;
        self.store.refunds_for_order(order_id).await
    }

    /// Brings local state in line with a refund reported by the gateway:
    /// settles or fails a pending local refund, or records an unknown one
    /// that succeeded as manual. Returns `None` when there was nothing to do.
    pub async fn sync_gateway_refund(&self, gateway_refund: GatewayRefund) -> Result<Option<Refund>> {
        let known = match self.store.find_refund_by_gateway_id(&gateway_refund.id).await? {
            Some(r) => Some(r),
            None => self.find_local(&gateway_refund).await?,
        };

        if let Some(mut refund) = known {
            if !refund.is_pending() {
                return Ok(None);
            }
            return match gateway_refund.status {
                GatewayRefundStatus::Pending => Ok(None),
                GatewayRefundStatus::Succeeded => {
                    refund.attach_gateway_id(&gateway_refund.id);
                    self.settle(refund).await.map(Some)
                }
                GatewayRefundStatus::Failed(reason) => {
                    refund.attach_gateway_id(&gateway_refund.id);
                    let order = load_order(self.store.as_ref(), refund.order_id).await?;
                    self.fail(&order, refund, reason).await.map(Some)
                }
            };
        }

        if gateway_refund.status != GatewayRefundStatus::Succeeded {
            return Ok(None);
        }
        let Some(payment) = self.store.find_payment_by_reference(&gateway_refund.payment_reference).await? else {
            tracing::warn!(gateway_refund_id = %gateway_refund.id, payment = %gateway_refund.payment_reference, "refund for unknown payment");
            return Ok(None);
        };
        let refund = Refund::manual(&payment, gateway_refund.amount, gateway_refund.id, MANUAL_REASON, None);
        self.check_fits(&payment, &refund)?;
        tracing::info!(refund_id = %refund.id, gateway_refund_id = ?refund.gateway_refund_id, "recording refund issued at the gateway");
        self.settle(refund).await.map(Some)
    }

    /// A refund we requested whose gateway id was not stored yet.
    async fn find_local(&self, gateway_refund: &GatewayRefund) -> Result<Option<Refund>> {
        let Some(local_id) = gateway_refund.local_id else { return Ok(None) };
        let Some(payment) = self.store.find_payment_by_reference(&gateway_refund.payment_reference).await? else { return Ok(None) };
        let refunds = self.store.refunds_for_order(payment.order_id).await?;
        Ok(refunds.into_iter().find(|r| r.id == local_id))
    }

    fn check_fits(&self, payment: &Payment, refund: &Refund) -> Result<()> {
        let remaining = payment.amount.subtract(&payment.refunded)?;
        if refund.amount.currency() != payment.amount.currency() || refund.amount.amount() > remaining.amount() {
            tracing::error!(refund = %refund.amount, %remaining, payment_id = %payment.id, "gateway refund exceeds what is left on the payment");
            return Err(EcommerceError::Validation(format!("refund of {} exceeds the {remaining} left on the payment", refund.amount)));
        }
        Ok(())
    }

    /// Applies a succeeded refund to its payment and order. Retries when a
    /// concurrent settlement moved the payment's refunded total first; a
    /// gateway refund already recorded under another id is returned as is.
    async fn settle(&self, candidate: Refund) -> Result<Refund> {
        for attempt in 1..=SETTLE_ATTEMPTS {
            if let Some(gateway_id) = &candidate.gateway_refund_id {
                if let Some(existing) = self.store.find_refund_by_gateway_id(gateway_id).await? {
                    if existing.id != candidate.id && !existing.is_pending() {
                        return Ok(existing);
                    }
                }
            }
            let refunds = self.store.refunds_for_order(candidate.order_id).await?;
            let mut refund = match refunds.into_iter().find(|r| r.id == candidate.id) {
                Some(stored) if stored.status == RefundStatus::Succeeded => return Ok(stored),
                Some(stored) if stored.status == RefundStatus::Failed => {
                    return Err(EcommerceError::Conflict(format!("refund {} already failed", stored.id)));
                }
                Some(stored) => stored,
                None => candidate.clone(),
            };
            if refund.gateway_refund_id.is_none() {
                refund.gateway_refund_id = candidate.gateway_refund_id.clone();
            }
            if refund.is_pending() {
                refund.succeed()?;
            }

            let mut payments = self.store.payments_for_order(refund.order_id).await?;
            let payment = payments.iter_mut().find(|p| p.id == refund.payment_id).ok_or(EcommerceError::NotFound("payment"))?;
            // a concurrent settlement may have used up the payment since the caller checked
            self.check_fits(payment, &refund)?;
            let previous_refunded = payment.refunded.amount();
            payment.apply_refund(&refund.amount)?;
            let payment = payment.clone();

            let mut order = load_order(self.store.as_ref(), refund.order_id).await?;
            let supplier_orders = self.store.supplier_orders_for_order(order.id).await?;
            order.recalculate(&payments, &supplier_orders)?;

            match self.store.settle_refund(RefundSettlement { refund: &refund, payment: &payment, previous_refunded, order: &order }).await {
                Ok(()) => {
                    tracing::info!(refund_id = %refund.id, order_id = %order.id, amount = %refund.amount, payment_status = %order.payment_status, "refund settled");
                    let mut events = order.take_events();
                    events.push(DomainEvent::Refund(RefundEvent::Issued {
                        refund_id: refund.id,
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                        email: order.email.clone(),
                        amount: refund.amount.clone(),
                    }));
                    self.notifier.publish(events).await;
                    return Ok(refund);
                }
                Err(EcommerceError::Conflict(reason)) if attempt < SETTLE_ATTEMPTS => {
                    tracing::warn!(refund_id = %refund.id, attempt, %reason, "refund settlement raced, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(EcommerceError::Conflict("refund settlement kept conflicting".into()))
    }

    async fn fail(&self, order: &Order, mut refund: Refund, reason: String) -> Result<Refund> {
        refund.fail(reason.clone())?;
        self.store.update_refund(&refund).await?;
        tracing::error!(refund_id = %refund.id, order_id = %order.id, %reason, "refund failed");
        self.notifier
            .publish(vec![DomainEvent::Refund(RefundEvent::Failed {
                refund_id: refund.id,
                order_id: order.id,
                order_number: order.order_number.clone(),
                amount: refund.amount.clone(),
                reason,
            })])
            .await;
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{NotificationKind, OrderStatus, PaymentState, PaymentStatus, RefundSource};
    use crate::services::testing::{fixture, Fixture};
    use crate::store::Page;

    fn request(amount: Option<i64>) -> ProcessRefundRequest {
        ProcessRefundRequest { amount: amount.map(|cents| Decimal::new(cents, 2)), reason: "damaged".into() }
    }

    async fn paid(f: &Fixture) -> Order {
        f.pay(&f.place_order().await).await
    }

    async fn payment(f: &Fixture, order: &Order) -> Payment {
        f.store.payments_for_order(order.id).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_partial_then_full_refund() {
        let f = fixture().await;
        let order = paid(&f).await;

        let refund = f.services.refunds.process_refund(&f.admin, order.id, request(Some(3000))).await.unwrap();
        assert_eq!(refund.status, RefundStatus::Succeeded);
        assert_eq!(refund.source, RefundSource::Processor);
        assert!(refund.gateway_refund_id.is_some());
        let order_now = f.order(order.id).await;
        assert_eq!(order_now.payment_status, PaymentStatus::PartiallyRefunded);
        assert_eq!(order_now.status, OrderStatus::Processing);
        assert_eq!(payment(&f, &order).await.status, PaymentState::PartiallyRefunded);

        // no amount: the remaining 60.00
        let rest = f.services.refunds.process_refund(&f.admin, order.id, request(None)).await.unwrap();
        assert_eq!(rest.amount, Money::usd(Decimal::new(6000, 2)));
        let order_now = f.order(order.id).await;
        assert_eq!(order_now.payment_status, PaymentStatus::Refunded);
        assert_eq!(order_now.status, OrderStatus::Refunded);
        assert_eq!(payment(&f, &order).await.refunded, Money::usd(Decimal::new(9000, 2)));

        let err = f.services.refunds.process_refund(&f.admin, order.id, request(None)).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Conflict(_)));

        let (notes, _) = f.store.notifications_for("buyer@example.com", Page::default()).await.unwrap();
        assert_eq!(notes.iter().filter(|n| n.kind == NotificationKind::RefundIssued).count(), 2);
    }

    #[tokio::test]
    async fn test_refund_validation() {
        let f = fixture().await;
        let unpaid = f.place_order().await;
        assert!(matches!(f.services.refunds.process_refund(&f.admin, unpaid.id, request(None)).await, Err(EcommerceError::Conflict(_))));

        let order = paid(&f).await;
        assert!(matches!(f.services.refunds.process_refund(&f.staff, order.id, request(None)).await, Err(EcommerceError::Forbidden)));
        assert!(matches!(f.services.refunds.process_refund(&f.admin, order.id, request(Some(9001))).await, Err(EcommerceError::Validation(_))));
        assert!(matches!(f.services.refunds.process_refund(&f.admin, order.id, request(Some(0))).await, Err(EcommerceError::Validation(_))));
        let sub_cent = ProcessRefundRequest { amount: Some(Decimal::new(4, 3)), reason: "rounding".into() };
        assert!(matches!(f.services.refunds.process_refund(&f.admin, order.id, sub_cent).await, Err(EcommerceError::Validation(_))));
        assert_eq!(f.order(order.id).await.payment_status, PaymentStatus::Paid);
        assert!(f.gateway.refund_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_refunds_count_against_the_payment() {
        let f = fixture().await;
        let order = paid(&f).await;
        f.gateway.script_refund(Ok(GatewayRefundStatus::Pending));
        let pending = f.services.refunds.process_refund(&f.admin, order.id, request(Some(5000))).await.unwrap();
        assert_eq!(pending.status, RefundStatus::Pending);
        assert_eq!(f.order(order.id).await.payment_status, PaymentStatus::Paid);

        let err = f.services.refunds.process_refund(&f.admin, order.id, request(Some(5000))).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Validation(msg) if msg.contains("40.00")));
    }

    #[tokio::test]
    async fn test_gateway_error_fails_refund_and_alerts_staff() {
        let f = fixture().await;
        let order = paid(&f).await;
        f.gateway.script_refund(Err("card_expired".into()));
        let err = f.services.refunds.process_refund(&f.admin, order.id, request(Some(1000))).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Gateway(_)));

        let refunds = f.store.refunds_for_order(order.id).await.unwrap();
        assert_eq!(refunds[0].status, RefundStatus::Failed);
        assert!(refunds[0].failure_reason.as_deref().unwrap().contains("card_expired"));
        assert_eq!(f.order(order.id).await.payment_status, PaymentStatus::Paid);
        let (notes, _) = f.store.notifications_for("ops@shop.test", Page::default()).await.unwrap();
        assert_eq!(notes[0].kind, NotificationKind::RefundFailed);
    }

    #[tokio::test]
    async fn test_manual_refund_is_recorded_once() {
        let f = fixture().await;
        let order = paid(&f).await;
        let p = payment(&f, &order).await;
        f.gateway.add_known_refund(GatewayRefund {
            id: "re_dashboard".into(), payment_reference: p.gateway_reference.clone(),
            amount: Money::usd(Decimal::new(2500, 2)), status: GatewayRefundStatus::Succeeded, local_id: None,
        });
        let req = || ManualRefundRequest { gateway_refund_id: "re_dashboard".into(), reason: None };

        let refund = f.services.refunds.record_manual_refund(&f.admin, order.id, req()).await.unwrap();
        assert_eq!(refund.source, RefundSource::Manual);
        assert_eq!(refund.created_by, Some(f.admin.user_id));
        let again = f.services.refunds.record_manual_refund(&f.admin, order.id, req()).await.unwrap();
        assert_eq!(again.id, refund.id);
        assert_eq!(payment(&f, &order).await.refunded, Money::usd(Decimal::new(2500, 2)));
        assert_eq!(f.order(order.id).await.payment_status, PaymentStatus::PartiallyRefunded);
    }

    #[tokio::test]
    async fn test_manual_refund_must_match_order() {
        let f = fixture().await;
        let order = paid(&f).await;
        f.gateway.add_known_refund(GatewayRefund {
            id: "re_other".into(), payment_reference: "pi_someone_else".into(),
            amount: Money::usd(Decimal::ONE), status: GatewayRefundStatus::Succeeded, local_id: None,
        });
        let req = ManualRefundRequest { gateway_refund_id: "re_other".into(), reason: None };
        assert!(matches!(f.services.refunds.record_manual_refund(&f.admin, order.id, req).await, Err(EcommerceError::Validation(_))));
        let missing = ManualRefundRequest { gateway_refund_id: "re_missing".into(), reason: None };
        assert!(matches!(f.services.refunds.record_manual_refund(&f.admin, order.id, missing).await, Err(EcommerceError::Gateway(_))));
    }

    #[tokio::test]
    async fn test_gateway_report_settles_pending_refund_once() {
        let f = fixture().await;
        let order = paid(&f).await;
        f.gateway.script_refund(Ok(GatewayRefundStatus::Pending));
        let pending = f.services.refunds.process_refund(&f.admin, order.id, request(Some(2000))).await.unwrap();

        let mut report = f.gateway.retrieve_refund(pending.gateway_refund_id.as_deref().unwrap()).await.unwrap();
        report.status = GatewayRefundStatus::Succeeded;
        let settled = f.services.refunds.sync_gateway_refund(report.clone()).await.unwrap().unwrap();
        assert_eq!(settled.id, pending.id);
        assert_eq!(settled.status, RefundStatus::Succeeded);
        assert!(f.services.refunds.sync_gateway_refund(report).await.unwrap().is_none());
        assert_eq!(payment(&f, &order).await.refunded, Money::usd(Decimal::new(2000, 2)));
    }

    #[tokio::test]
    async fn test_report_matched_by_local_id_before_gateway_id_is_stored() {
        let f = fixture().await;
        let order = paid(&f).await;
        let p = payment(&f, &order).await;
        let refund = Refund::request(&p, Money::usd(Decimal::TEN), "late", None);
        f.store.insert_refund(&refund).await.unwrap();

        let report = GatewayRefund {
            id: "re_async".into(), payment_reference: p.gateway_reference.clone(),
            amount: Money::usd(Decimal::TEN), status: GatewayRefundStatus::Succeeded, local_id: Some(refund.id),
        };
        let settled = f.services.refunds.sync_gateway_refund(report).await.unwrap().unwrap();
        assert_eq!(settled.id, refund.id);
        assert_eq!(settled.source, RefundSource::Processor);
        assert_eq!(f.store.refunds_for_order(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_settlements_do_not_double_count() {
        let f = fixture().await;
        let order = paid(&f).await;
        let p = payment(&f, &order).await;
        let a = Refund::manual(&p, Money::usd(Decimal::new(4000, 2)), "re_a", "a", None);
        let b = Refund::manual(&p, Money::usd(Decimal::new(3000, 2)), "re_b", "b", None);
        let (ra, rb) = tokio::join!(f.services.refunds.settle(a), f.services.refunds.settle(b));
        ra.unwrap();
        rb.unwrap();
        assert_eq!(payment(&f, &order).await.refunded, Money::usd(Decimal::new(7000, 2)));
    }

    #[tokio::test]
    async fn test_concurrent_settlements_never_exceed_the_payment() {
        let f = fixture().await;
        let order = paid(&f).await;
        let p = payment(&f, &order).await;
        let a = Refund::manual(&p, Money::usd(Decimal::new(6000, 2)), "re_a", "a", None);
        let b = Refund::manual(&p, Money::usd(Decimal::new(5000, 2)), "re_b", "b", None);
        let (ra, rb) = tokio::join!(f.services.refunds.settle(a), f.services.refunds.settle(b));
        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        let rejected = if ra.is_err() { ra } else { rb };
        assert!(matches!(rejected, Err(EcommerceError::Validation(_))));

        let refunded = payment(&f, &order).await.refunded.amount();
        assert!(refunded == Decimal::new(6000, 2) || refunded == Decimal::new(5000, 2));
        assert_eq!(f.order(order.id).await.payment_status, PaymentStatus::PartiallyRefunded);
    }

    #[tokio::test]
    async fn test_customers_list_refunds_of_their_orders() {
        let f = fixture().await;
        let order = paid(&f).await;
        f.services.refunds.process_refund(&f.admin, order.id, request(Some(500))).await.unwrap();
        assert_eq!(f.services.refunds.list_refunds(&f.customer, order.id).await.unwrap().len(), 1);
        let stranger = Actor { user_id: Uuid::now_v7(), ..f.customer.clone() };
        assert!(matches!(f.services.refunds.list_refunds(&stranger, order.id).await, Err(EcommerceError::Forbidden)));
    }
}
