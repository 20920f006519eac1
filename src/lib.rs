//! Dropship Commerce
//!
//! Order, payment, refund, dropshipping and notification management for a
//! shop that sells both from its own stock and through dropship suppliers.
//!
//! ## Features
//! - Product catalog with in-house and dropshipped products
//! - Order placement with stock reservation
//! - Stripe payments and signed webhooks
//! - Refunds through the gateway, plus refunds issued from its dashboard
//! - Splitting paid orders into per-supplier orders
//! - Customer, supplier and staff notifications over NATS

pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{EcommerceError, Result};
