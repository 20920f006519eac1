//! Products and suppliers.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Actor, Permission};
use crate::domain::aggregates::{Product, ProductStatus, Supplier};
use crate::domain::value_objects::{Money, Sku};
use crate::error::{EcommerceError, Result};
use crate::store::{Page, Store};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub inventory: Option<u32>,
    pub supplier_id: Option<Uuid>,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    /// Replaces the in-house stock level.
    pub inventory: Option<u32>,
    pub status: Option<ProductStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSupplierRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn Store>,
    currency: String,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>, currency: &str) -> Self {
        Self { store, currency: currency.to_uppercase() }
    }

    fn price(&self, amount: Decimal) -> Result<Money> {
        if amount <= Decimal::ZERO {
            return Err(EcommerceError::Validation("price must be positive".into()));
        }
        let price = Money::new(amount, &self.currency);
        price.ensure_cents()?;
        Ok(price)
    }

    pub async fn create_product(&self, actor: &Actor, request: CreateProductRequest) -> Result<Product> {
        actor.require(Permission::ManageCatalog)?;
        request.validate()?;
        if let Some(supplier_id) = request.supplier_id {
            self.active_supplier(supplier_id).await?;
        }
        let mut product = Product::create(Sku::new(request.sku)?, request.name, self.price(request.price)?);
        product.description = request.description.unwrap_or_default();
        product.supplier_id = request.supplier_id;
        if let Some(qty) = request.inventory {
            product.add_inventory(qty);
        }
        if request.publish {
            product.publish()?;
        }
        self.store.insert_product(&product).await?;
        tracing::info!(product_id = %product.id, sku = %product.sku, dropshipped = product.is_dropshipped(), "product created");
        Ok(product)
    }

    pub async fn update_product(&self, actor: &Actor, id: Uuid, request: UpdateProductRequest) -> Result<Product> {
        actor.require(Permission::ManageCatalog)?;
        request.validate()?;
        let mut product = self.get_product(id).await?;
        if let Some(name) = request.name { product.name = name; }
        if let Some(description) = request.description { product.description = description; }
        if let Some(price) = request.price { product.price = self.price(price)?; }
        if let Some(qty) = request.inventory {
            product.inventory = Default::default();
            product.add_inventory(qty);
        }
        match request.status {
            Some(ProductStatus::Active) => product.publish()?,
            Some(ProductStatus::Archived) => product.archive(),
            Some(ProductStatus::Draft) => product.status = ProductStatus::Draft,
            None => {}
        }
        product.updated_at = chrono::Utc::now();
        self.store.update_product(&product).await?;
        Ok(product)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product> {
        self.store.get_product(id).await?.ok_or(EcommerceError::NotFound("product"))
    }

    pub async fn list_products(&self, page: Page) -> Result<(Vec<Product>, i64)> {
        self.store.list_products(page).await
    }

    pub async fn create_supplier(&self, actor: &Actor, request: CreateSupplierRequest) -> Result<Supplier> {
        actor.require(Permission::ManageCatalog)?;
        request.validate()?;
        let supplier = Supplier::new(request.name, request.email);
        self.store.insert_supplier(&supplier).await?;
        tracing::info!(supplier_id = %supplier.id, "supplier created");
        Ok(supplier)
    }

    pub async fn list_suppliers(&self, actor: &Actor) -> Result<Vec<Supplier>> {
        actor.require(Permission::ManageCatalog)?;
        self.store.list_suppliers().await
    }

    pub async fn get_supplier(&self, actor: &Actor, id: Uuid) -> Result<Supplier> {
        if actor.supplier_id != Some(id) {
            actor.require(Permission::ManageCatalog)?;
        }
        self.store.get_supplier(id).await?.ok_or(EcommerceError::NotFound("supplier"))
    }

    async fn active_supplier(&self, id: Uuid) -> Result<Supplier> {
        let supplier = self.store.get_supplier(id).await?.ok_or(EcommerceError::NotFound("supplier"))?;
        if !supplier.active {
            return Err(EcommerceError::Validation(format!("supplier {} is inactive", supplier.name)));
        }
        Ok(supplier)
    }
}
