//! Scripted gateway for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GatewayPayment, GatewayRefund, GatewayRefundStatus, PaymentGateway, RefundRequest};
use crate::domain::aggregates::Order;
use crate::error::{EcommerceError, Result};

#[derive(Default)]
pub struct FakeGateway {
    /// Outcomes handed out to successive `refund` calls; succeeded when empty.
    pub refund_outcomes: Mutex<VecDeque<std::result::Result<GatewayRefundStatus, String>>>,
    /// Refunds that exist at the gateway, e.g. issued from its dashboard.
    pub known_refunds: Mutex<HashMap<String, GatewayRefund>>,
    pub refund_calls: Mutex<Vec<String>>,
    payments: Mutex<u32>,
}

impl FakeGateway {
    pub fn script_refund(&self, outcome: std::result::Result<GatewayRefundStatus, String>) {
        self.refund_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn add_known_refund(&self, refund: GatewayRefund) {
        self.known_refunds.lock().unwrap().insert(refund.id.clone(), refund);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, order: &Order) -> Result<GatewayPayment> {
        let mut n = self.payments.lock().unwrap();
        *n += 1;
        Ok(GatewayPayment { reference: format!("pi_{}_{}", order.order_number, n), client_secret: Some(format!("secret_{n}")) })
    }

    async fn refund(&self, request: RefundRequest<'_>) -> Result<GatewayRefund> {
        self.refund_calls.lock().unwrap().push(request.refund_id.to_string());
        let outcome = self.refund_outcomes.lock().unwrap().pop_front().unwrap_or(Ok(GatewayRefundStatus::Succeeded));
        let status = outcome.map_err(EcommerceError::Gateway)?;
        let refund = GatewayRefund {
            id: format!("re_{}", request.refund_id.simple()),
            payment_reference: request.payment_reference.to_string(),
            amount: request.amount.clone(),
            status,
            local_id: Some(request.refund_id),
        };
        self.known_refunds.lock().unwrap().insert(refund.id.clone(), refund.clone());
        Ok(refund)
    }

    async fn retrieve_refund(&self, gateway_refund_id: &str) -> Result<GatewayRefund> {
        self.known_refunds
            .lock()
            .unwrap()
            .get(gateway_refund_id)
            .cloned()
            .ok_or_else(|| EcommerceError::Gateway(format!("No such refund: {gateway_refund_id}")))
    }
}
