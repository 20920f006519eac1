//! Service-wide error type and its HTTP mapping.

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use thiserror::Error;

use crate::domain::aggregates::{DropshipError, OrderError, ProductError, RefundError};
use crate::domain::value_objects::{MoneyError, SkuError};
use crate::domain::UnknownStatus;

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("invalid webhook signature")]
    WebhookSignature,

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, EcommerceError>;

impl EcommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::WebhookSignature => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<UnknownStatus> for EcommerceError {
    fn from(e: UnknownStatus) -> Self { Self::Storage(e.to_string()) }
}

impl From<validator::ValidationErrors> for EcommerceError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

impl From<MoneyError> for EcommerceError {
    fn from(e: MoneyError) -> Self { Self::Validation(e.to_string()) }
}

impl From<SkuError> for EcommerceError {
    fn from(e: SkuError) -> Self { Self::Validation(e.to_string()) }
}

impl From<ProductError> for EcommerceError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::MissingName => Self::Validation(e.to_string()),
            ProductError::InsufficientInventory { .. } => Self::Conflict(e.to_string()),
        }
    }
}

impl From<OrderError> for EcommerceError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoItems | OrderError::Money(_) => Self::Validation(e.to_string()),
            _ => Self::Conflict(e.to_string()),
        }
    }
}

impl From<RefundError> for EcommerceError {
    fn from(e: RefundError) -> Self {
        match e {
            RefundError::NotRefundable { .. } | RefundError::InvalidTransition { .. } => Self::Conflict(e.to_string()),
            _ => Self::Validation(e.to_string()),
        }
    }
}

impl From<DropshipError> for EcommerceError {
    fn from(e: DropshipError) -> Self {
        match e {
            DropshipError::TrackingRequired => Self::Validation(e.to_string()),
            DropshipError::InvalidTransition { .. } => Self::Conflict(e.to_string()),
        }
    }
}
