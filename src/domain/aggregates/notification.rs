//! Outgoing notifications and their delivery state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: String,
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

status_enum! {
    pub enum NotificationKind {
        OrderPlaced => "order_placed",
        OrderShipped => "order_shipped",
        OrderCancelled => "order_cancelled",
        PaymentReceived => "payment_received",
        PaymentFailed => "payment_failed",
        RefundIssued => "refund_issued",
        RefundFailed => "refund_failed",
        SupplierOrderCreated => "supplier_order_created",
    }
}

status_enum! {
    pub enum NotificationStatus { Pending => "pending", Sent => "sent", Failed => "failed" }
}

impl Notification {
    pub fn new(recipient: impl Into<String>, kind: NotificationKind, subject: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), recipient: recipient.into(), kind, subject: subject.into(), body: body.into(),
            status: NotificationStatus::Pending, attempts: 0, last_error: None, created_at: now, updated_at: now,
        }
    }

    pub fn record_attempt(&mut self, outcome: Result<(), String>) {
        self.attempts += 1;
        match outcome {
            Ok(()) => { self.status = NotificationStatus::Sent; self.last_error = None; }
            Err(e) => self.last_error = Some(e),
        }
        self.updated_at = Utc::now();
    }

    pub fn give_up(&mut self) {
        self.status = NotificationStatus::Failed;
        self.updated_at = Utc::now();
    }
}
