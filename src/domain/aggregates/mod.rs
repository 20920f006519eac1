//! Aggregates module
pub mod notification;
pub mod order;
pub mod payment;
pub mod product;
pub mod refund;
pub mod supplier;
pub mod supplier_order;

pub use notification::{Notification, NotificationKind, NotificationStatus};
pub use order::{Address, FulfillmentStatus, LineItem, Order, OrderError, OrderStatus, PaymentStatus};
pub use payment::{Payment, PaymentState};
pub use product::{Product, ProductError, ProductStatus};
pub use refund::{Refund, RefundError, RefundSource, RefundStatus};
pub use supplier::Supplier;
pub use supplier_order::{DropshipError, SupplierOrder, SupplierOrderItem, SupplierOrderStatus};
