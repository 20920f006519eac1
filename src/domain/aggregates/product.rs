//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{Sku, Money, Quantity};

/// A sellable product. Products with a `supplier_id` are dropshipped: the
/// supplier holds the stock, so local inventory is never reserved for them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: Sku,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub inventory: Quantity,
    pub status: ProductStatus,
    pub supplier_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

status_enum! {
    pub enum ProductStatus { Draft => "draft", Active => "active", Archived => "archived" }
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, price: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), sku, name: name.into(), description: String::new(),
            price, inventory: Quantity::default(), status: ProductStatus::Draft,
            supplier_id: None, created_at: now, updated_at: now,
        }
    }

    pub fn is_dropshipped(&self) -> bool { self.supplier_id.is_some() }
    pub fn is_active(&self) -> bool { self.status == ProductStatus::Active }

    pub fn publish(&mut self) -> Result<(), ProductError> {
        if self.name.trim().is_empty() { return Err(ProductError::MissingName); }
        self.status = ProductStatus::Active;
        self.touch();
        Ok(())
    }

    pub fn archive(&mut self) { self.status = ProductStatus::Archived; self.touch(); }

    pub fn add_inventory(&mut self, qty: u32) {
        self.inventory = self.inventory.add(qty);
        self.touch();
    }

    /// Takes `qty` units out of local stock. A no-op for dropshipped products.
    pub fn reserve(&mut self, qty: u32) -> Result<(), ProductError> {
        if self.is_dropshipped() { return Ok(()); }
        self.inventory = self.inventory.subtract(qty).ok_or(ProductError::InsufficientInventory { sku: self.sku.to_string() })?;
        self.touch();
        Ok(())
    }

    /// Puts reserved units back, e.g. when an order is cancelled.
    pub fn release(&mut self, qty: u32) {
        if self.is_dropshipped() { return; }
        self.add_inventory(qty);
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("product name is required")]
    MissingName,
    #[error("insufficient inventory for {sku}")]
    InsufficientInventory { sku: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_product_create() {
        let p = Product::create(Sku::new("TEST-001").unwrap(), "Test Product", Money::usd(Decimal::new(1999, 2)));
        assert_eq!(p.name, "Test Product");
        assert_eq!(p.status, ProductStatus::Draft);
    }

    #[test]
    fn test_inventory() {
        let mut p = Product::create(Sku::new("TEST").unwrap(), "P", Money::usd(Decimal::new(10, 0)));
        assert!(p.reserve(1).is_err());
        p.add_inventory(10);
        p.reserve(5).unwrap();
        assert_eq!(p.inventory.value(), 5);
        assert!(matches!(p.reserve(6), Err(ProductError::InsufficientInventory { .. })));
        p.release(5);
        assert_eq!(p.inventory.value(), 10);
    }

    #[test]
    fn test_dropshipped_product_skips_local_stock() {
        let mut p = Product::create(Sku::new("DS-1").unwrap(), "Drop", Money::usd(Decimal::ONE));
        p.supplier_id = Some(Uuid::now_v7());
        p.reserve(100).unwrap();
        assert_eq!(p.inventory.value(), 0);
    }
}
