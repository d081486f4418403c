//! OrderDesk order pipeline
//!
//! Server-side core of the operations dashboard: everything that happens
//! between "create this order" and a persisted, priced, approved-or-held
//! order document.
//!
//! ## Features
//! - Coupon validation and discount calculation with an idempotent usage ledger
//! - Weight/dimension lookup from operator-verified item combinations
//! - Sequential, human-readable order ids per order source
//! - Shipping and COD surcharge pricing
//! - Initial approval decision and asynchronous auto-approval
//! - Best-effort side effects (usage recording, customer sync, notification)

use serde_json::Value;
use thiserror::Error;

pub mod api;
pub mod config;
pub mod domain;
pub mod services;
pub mod store;

use services::coupons::{CouponError, CouponRejection};
use store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

/// How a failure should be surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    NotFound,
    Dependency,
    Auth,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{message}")]
    Validation { message: String, details: Value },

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Product {0} is not available for sale")]
    ProductUnavailable(String),

    #[error("Variation {sku} not found for product {product_id}")]
    VariationNotFound { product_id: String, sku: String },

    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock { sku: String, requested: u32, available: u32 },

    #[error("{0}")]
    Coupon(CouponRejection),

    #[error("Invalid order: {0}")]
    Order(#[from] domain::aggregates::OrderError),

    #[error("Could not allocate a unique order id after {0} attempts")]
    OrderIdExhausted(u32),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>, details: Value) -> Self {
        Self::Validation { message: message.into(), details }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ProductNotFound(_) => ErrorKind::NotFound,
            Self::ProductUnavailable(_)
            | Self::VariationNotFound { .. }
            | Self::InsufficientStock { .. }
            | Self::Coupon(_) => ErrorKind::BusinessRule,
            Self::Order(_) => ErrorKind::Validation,
            Self::OrderIdExhausted(_) | Self::Storage(_) => ErrorKind::Dependency,
            Self::Unauthorized | Self::Forbidden(_) => ErrorKind::Auth,
        }
    }
}

impl From<CouponError> for ServiceError {
    fn from(e: CouponError) -> Self {
        match e {
            CouponError::Rejected(r) => Self::Coupon(r),
            CouponError::Store(s) => Self::Storage(s),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = serde_json::to_value(&errors).unwrap_or(Value::Null);
        Self::Validation { message: "Invalid order data".to_string(), details }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
