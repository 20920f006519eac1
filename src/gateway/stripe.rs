//! Stripe REST client and webhook parsing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{GatewayPayment, GatewayRefund, GatewayRefundStatus, PaymentGateway, RefundRequest};
use crate::config::StripeConfig;
use crate::domain::aggregates::Order;
use crate::domain::value_objects::Money;
use crate::error::{EcommerceError, Result};

type HmacSha256 = Hmac<Sha256>;

pub struct StripeGateway {
    client: reqwest::Client,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EcommerceError::Gateway(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| EcommerceError::Gateway(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body: StripeErrorBody = response.json().await.unwrap_or_default();
            let message = body.error.message.unwrap_or_else(|| format!("stripe returned {status}"));
            tracing::warn!(%status, %message, "stripe request failed");
            return Err(EcommerceError::Gateway(message));
        }
        response.json().await.map_err(|e| EcommerceError::Gateway(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment(&self, order: &Order) -> Result<GatewayPayment> {
        let params = [
            ("amount", order.total.minor_units()?.to_string()),
            ("currency", order.currency().to_lowercase()),
            ("metadata[order_id]", order.id.to_string()),
            ("metadata[order_number]", order.order_number.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let intent: StripePaymentIntent = self.send(self.client.post(self.url("payment_intents")).form(&params)).await?;
        Ok(GatewayPayment { reference: intent.id, client_secret: intent.client_secret })
    }

    async fn refund(&self, request: RefundRequest<'_>) -> Result<GatewayRefund> {
        let params = [
            ("payment_intent", request.payment_reference.to_string()),
            ("amount", request.amount.minor_units()?.to_string()),
            ("metadata[refund_id]", request.refund_id.to_string()),
            ("metadata[reason]", request.reason.to_string()),
        ];
        let refund: StripeRefund = self
            .send(self.client.post(self.url("refunds")).header("Idempotency-Key", request.refund_id.to_string()).form(&params))
            .await?;
        refund.into_gateway()
    }

    async fn retrieve_refund(&self, gateway_refund_id: &str) -> Result<GatewayRefund> {
        let refund: StripeRefund = self.send(self.client.get(self.url(&format!("refunds/{gateway_refund_id}")))).await?;
        refund.into_gateway()
    }
}

#[derive(Debug, Default, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    error: StripeError,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeError {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub client_secret: Option<String>,
    pub last_payment_error: Option<StripeError>,
}

#[derive(Debug, Deserialize)]
pub struct StripeRefund {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_intent: Option<String>,
    pub status: Option<String>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeRefund {
    pub fn into_gateway(self) -> Result<GatewayRefund> {
        let payment_reference = self
            .payment_intent
            .ok_or_else(|| EcommerceError::Gateway(format!("refund {} has no payment intent", self.id)))?;
        let status = match self.status.as_deref() {
            Some("succeeded") => GatewayRefundStatus::Succeeded,
            Some("failed") | Some("canceled") => {
                GatewayRefundStatus::Failed(self.failure_reason.unwrap_or_else(|| "refund failed".to_string()))
            }
            _ => GatewayRefundStatus::Pending,
        };
        let local_id = self.metadata.get("refund_id").and_then(|id| id.parse().ok());
        Ok(GatewayRefund { id: self.id, payment_reference, amount: Money::from_minor_units(self.amount, &self.currency), status, local_id })
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeCharge {
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub refunds: StripeList<StripeRefund>,
}

#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self { Self { data: Vec::new() } }
}

/// The parts of a webhook event the service acts on.
#[derive(Debug)]
pub enum WebhookEvent {
    PaymentSucceeded(StripePaymentIntent),
    PaymentFailed(StripePaymentIntent),
    ChargeRefunded(StripeCharge),
    RefundUpdated(StripeRefund),
    Ignored(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawEvent = serde_json::from_slice(payload).map_err(|e| EcommerceError::Validation(format!("malformed webhook: {e}")))?;
        let object = raw.data.object;
        let decode = |e: serde_json::Error| EcommerceError::Validation(format!("malformed {} object: {e}", raw.kind));
        Ok(match raw.kind.as_str() {
            "payment_intent.succeeded" => Self::PaymentSucceeded(serde_json::from_value(object).map_err(decode)?),
            "payment_intent.payment_failed" => Self::PaymentFailed(serde_json::from_value(object).map_err(decode)?),
            "charge.refunded" => Self::ChargeRefunded(serde_json::from_value(object).map_err(decode)?),
            "refund.updated" | "charge.refund.updated" => Self::RefundUpdated(serde_json::from_value(object).map_err(decode)?),
            _ => Self::Ignored(raw.kind.clone()),
        })
    }
}

/// Verifies a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>`) against
/// the raw payload. Any `v1` entry may match; timestamps outside
/// `tolerance_secs` of `now` are rejected.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, tolerance_secs: i64, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(EcommerceError::WebhookSignature)?;
    let age = now.checked_sub(timestamp).map(i64::unsigned_abs);
    if age.map_or(true, |age| age > tolerance_secs.unsigned_abs()) {
        tracing::warn!(timestamp, now, "webhook timestamp outside tolerance");
        return Err(EcommerceError::WebhookSignature);
    }
    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else { continue };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| EcommerceError::WebhookSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(EcommerceError::WebhookSignature)
}

#[cfg(test)]
pub(crate) fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign(payload, SECRET, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_rejects_wrong_secret_modified_payload_and_old_timestamp() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign(payload, "wrong_secret", 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, 300, 1_700_000_000).is_err());

        let header = sign(payload, SECRET, 1_700_000_000);
        assert!(verify_signature(br#"{"type":"x"}"#, &header, SECRET, 300, 1_700_000_000).is_err());
        assert!(verify_signature(payload, &header, SECRET, 300, 1_700_000_600).is_err());
    }

    #[test]
    fn test_rejects_missing_parts() {
        assert!(verify_signature(b"{}", "v1=abcd", SECRET, 300, 0).is_err());
        assert!(verify_signature(b"{}", "t=0", SECRET, 300, 0).is_err());
        assert!(verify_signature(b"{}", "t=-9223372036854775808,v1=00", SECRET, 300, 1_700_000_000).is_err());
        assert!(verify_signature(b"{}", "t=9223372036854775807,v1=00", SECRET, 300, -1).is_err());
    }

    #[test]
    fn test_parse_events() {
        let payload = br#"{"type":"charge.refunded","data":{"object":{"payment_intent":"pi_1","refunds":{"data":[{"id":"re_1","amount":500,"currency":"usd","payment_intent":"pi_1","status":"succeeded"}]}}}}"#;
        match WebhookEvent::parse(payload).unwrap() {
            WebhookEvent::ChargeRefunded(charge) => {
                assert_eq!(charge.payment_intent.as_deref(), Some("pi_1"));
                let refund = charge.refunds.data.into_iter().next().unwrap().into_gateway().unwrap();
                assert_eq!(refund.amount, Money::from_minor_units(500, "USD"));
                assert_eq!(refund.status, GatewayRefundStatus::Succeeded);
                assert_eq!(refund.local_id, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        let ignored = WebhookEvent::parse(br#"{"type":"customer.created","data":{"object":{}}}"#).unwrap();
        assert!(matches!(ignored, WebhookEvent::Ignored(kind) if kind == "customer.created"));
    }

    #[test]
    fn test_refund_status_mapping() {
        let refund = StripeRefund { id: "re_2".into(), amount: 100, currency: "usd".into(), payment_intent: Some("pi".into()), status: Some("failed".into()), failure_reason: Some("expired_or_canceled_card".into()), metadata: HashMap::new() };
        assert_eq!(refund.into_gateway().unwrap().status, GatewayRefundStatus::Failed("expired_or_canceled_card".into()));
    }
}
