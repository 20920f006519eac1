//! Roles, permissions and the authenticated actor behind a request.

use axum::{async_trait, extract::FromRequestParts, http::{header::AUTHORIZATION, request::Parts}};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::AppState;
use crate::domain::aggregates::{Order, SupplierOrder};
use crate::domain::status_enum;
use crate::error::{EcommerceError, Result};

status_enum! {
    pub enum Role { Admin => "admin", Staff => "staff", Supplier => "supplier", Customer => "customer" }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    ManageCatalog,
    PlaceOrders,
    ViewAllOrders,
    ManageOrders,
    IssueRefunds,
    ManageSupplierOrders,
    FulfillSupplierOrders,
    ViewNotifications,
}

impl Role {
    pub fn grants(&self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Admin => true,
            Role::Staff => !matches!(permission, IssueRefunds),
            Role::Supplier => matches!(permission, FulfillSupplierOrders | ViewNotifications),
            Role::Customer => matches!(permission, PlaceOrders | ViewNotifications),
        }
    }
}

/// A stored API user. Only the SHA-256 of the bearer token is kept.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub supplier_id: Option<Uuid>,
    pub api_token_hash: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Actor {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub supplier_id: Option<Uuid>,
}

impl From<User> for Actor {
    fn from(u: User) -> Self { Self { user_id: u.id, email: u.email, role: u.role, supplier_id: u.supplier_id } }
}

impl Actor {
    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.role.grants(permission) { Ok(()) } else {
            tracing::warn!(user_id = %self.user_id, role = %self.role, ?permission, "permission denied");
            Err(EcommerceError::Forbidden)
        }
    }

    /// Staff see every order, customers only their own.
    pub fn ensure_order_access(&self, order: &Order) -> Result<()> {
        if self.role.grants(Permission::ViewAllOrders) || order.customer_id == self.user_id {
            Ok(())
        } else {
            Err(EcommerceError::Forbidden)
        }
    }

    /// Staff may touch any supplier order, suppliers only their own.
    pub fn ensure_supplier_order_access(&self, supplier_order: &SupplierOrder) -> Result<()> {
        if self.role.grants(Permission::ManageSupplierOrders) { return Ok(()); }
        self.require(Permission::FulfillSupplierOrders)?;
        if self.supplier_id == Some(supplier_order.supplier_id) { Ok(()) } else { Err(EcommerceError::Forbidden) }
    }
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = EcommerceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(EcommerceError::Unauthenticated)?;
        let user = state
            .store
            .find_user_by_token_hash(&hash_token(token))
            .await?
            .ok_or(EcommerceError::Unauthenticated)?;
        Ok(user.into())
    }
}
