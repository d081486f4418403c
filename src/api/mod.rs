//! HTTP surface.

pub mod auth;
pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ApiTokens;
use crate::services::{CombinationStore, OrderService};

pub const SERVICE_NAME: &str = "orderdesk";

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub combinations: CombinationStore,
    pub tokens: Arc<ApiTokens>,
}

impl AppState {
    pub fn new(orders: OrderService, tokens: ApiTokens) -> Self {
        let combinations = orders.combinations().clone();
        Self { orders, combinations, tokens: Arc::new(tokens) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": SERVICE_NAME})) }))
        .route("/orders", get(handlers::list_orders).post(handlers::create_order))
        .route("/customer/orders/create", post(handlers::create_customer_order))
        .route("/customer/coupons/validate", post(handlers::validate_coupon))
        .route("/combinations", post(handlers::save_combination))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
