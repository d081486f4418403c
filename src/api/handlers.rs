use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::{Admin, Staff};
use super::error::ApiError;
use super::AppState;
use crate::domain::aggregates::CombinationItem;
use crate::domain::value_objects::Dimensions;
use crate::services::coupons::CouponRejection;
use crate::services::orders::{CouponCheck, CouponCheckInput, CreateOrderInput, Identity, OrderListStatus};
use crate::ServiceError;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

type Created = (StatusCode, Json<Value>);

/// Body decoding errors become 400s with the serde message as detail,
/// instead of axum's plain-text rejection.
fn parse_body<T: DeserializeOwned>(body: &[u8], message: &str) -> Result<T, ServiceError> {
    serde_json::from_slice(body).map_err(|e| ServiceError::validation(message, json!({"error": e.to_string()})))
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty() && k.len() <= MAX_IDEMPOTENCY_KEY_LEN)
        .map(str::to_string)
}

/// "DD Mon YYYY - DD Mon YYYY", five to seven days out.
pub fn expected_delivery(from: DateTime<Utc>) -> String {
    let fmt = "%d %b %Y";
    format!("{} - {}", (from + Duration::days(5)).format(fmt), (from + Duration::days(7)).format(fmt))
}

pub async fn create_order(State(s): State<AppState>, Staff(actor): Staff, headers: HeaderMap, body: Bytes) -> Result<Created, ApiError> {
    let input: CreateOrderInput = parse_body(&body, "Invalid order data")?;
    let key = idempotency_key(&headers);
    let created = s.orders.create_order(input, &actor, key.as_deref()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "orderId": created.order_id, "internalStatus": created.internal_status})),
    ))
}

pub async fn create_customer_order(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Created, ApiError> {
    let input: CreateOrderInput = parse_body(&body, "Invalid order data").map_err(ApiError::customer)?;
    let key = idempotency_key(&headers);
    let created = s
        .orders
        .create_order(input, &Identity::customer_app(), key.as_deref())
        .await
        .map_err(ApiError::customer)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "orderId": created.order_id,
            "message": "Order placed successfully",
            "orderDetails": {
                "orderId": created.order_id,
                "totalAmount": created.grand_total,
                "discount": created.discount,
                "expectedDelivery": expected_delivery(created.created_at),
            },
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_orders(State(s): State<AppState>, Admin(_): Admin, Query(p): Query<ListParams>) -> Result<Json<Value>, ApiError> {
    let status: OrderListStatus = p
        .status
        .as_deref()
        .ok_or_else(|| ServiceError::validation("status is required", json!({"field": "status"})))?
        .parse()?;
    let orders = s.orders.list_orders(status, p.limit).await?;
    Ok(Json(json!({"success": true, "count": orders.len(), "orders": orders})))
}

pub async fn validate_coupon(State(s): State<AppState>, body: Bytes) -> Result<Json<CouponCheck>, ApiError> {
    let input: CouponCheckInput = parse_body(&body, "Invalid coupon request").map_err(ApiError::customer)?;
    if input.coupon_code.trim().is_empty() {
        return Ok(Json(CouponCheck {
            is_valid: false,
            coupon_details: None,
            discount: None,
            free_shipping: None,
            error: Some(CouponRejection::NotFound.to_string()),
        }));
    }
    let check = s.orders.check_coupon(input).await.map_err(ApiError::customer)?;
    Ok(Json(check))
}

#[derive(Debug, Deserialize)]
pub struct CombinationInput {
    pub items: Vec<CombinationItem>,
    pub weight: Decimal,
    pub dimensions: Dimensions,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn save_combination(State(s): State<AppState>, Staff(actor): Staff, body: Bytes) -> Result<Created, ApiError> {
    let input: CombinationInput = parse_body(&body, "Invalid combination data")?;
    let saved = s
        .combinations
        .save(input.items, input.weight, input.dimensions, &actor.subject, input.notes, Utc::now())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "combinationHash": saved.combination_hash,
            "totalItems": saved.total_items,
            "uniqueProducts": saved.unique_products,
        })),
    ))
}
