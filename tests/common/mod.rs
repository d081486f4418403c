#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use orderdesk::api::{self, AppState};
use orderdesk::config::{ApiTokens, AppConfig};
use orderdesk::services::orders::{Collaborators, CreateOrderInput, Identity, OrderService, Role};
use orderdesk::services::LogNotifier;
use orderdesk::store::{collections, DocumentStore, InMemoryStore};

pub const ADMIN_TOKEN: &str = "admin-token";
pub const MACHINE_TOKEN: &str = "machine-token";
pub const PHONE: &str = "9876543210";

/// Service and router wired to a fresh in-memory store.
pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub orders: OrderService,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let tokens = ApiTokens::new()
            .with(ADMIN_TOKEN, Identity::new("alice", Role::Admin))
            .with(MACHINE_TOKEN, Identity::new("order-agent", Role::Machine));
        Self::with_config(AppConfig { tokens, ..AppConfig::default() })
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let collaborators = Collaborators::from_config(store.clone(), &config, Arc::new(LogNotifier));
        Self::with_collaborators(store, collaborators, config.tokens)
    }

    pub fn with_collaborators(store: Arc<InMemoryStore>, collaborators: Collaborators, tokens: ApiTokens) -> Self {
        let orders = OrderService::new(collaborators);
        let router = api::router(AppState::new(orders.clone(), tokens));
        Self { store, orders, router }
    }

    pub fn admin() -> Identity { Identity::new("alice", Role::Admin) }

    /// One active product with a single variation.
    pub async fn seed_product(&self, product_id: &str, sku: &str, stock: u32, price: u32) {
        let doc = json!({
            "productId": product_id,
            "name": format!("Product {product_id}"),
            "status": "active",
            "variations": [{"variationId": format!("{product_id}-V1"), "sku": sku, "stock": stock, "price": price, "salePrice": 0}],
        });
        self.store.set(collections::PRODUCTS, product_id, doc).await.unwrap();
    }

    pub async fn seed_coupon(&self, code: &str, extra: Value) {
        let now = Utc::now();
        let mut doc = json!({
            "couponId": format!("cpn-{}", code.to_lowercase()),
            "code": code,
            "validFrom": now - chrono::Duration::days(1),
            "validUntil": now + chrono::Duration::days(30),
            "isActive": true,
        });
        if let (Some(base), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        let id = doc["couponId"].as_str().unwrap().to_string();
        self.store.set(collections::COUPONS, &id, doc).await.unwrap();
    }

    pub async fn verify_combination(&self, items: &[(&str, u32)]) {
        let items = items.iter().map(|(sku, qty)| orderdesk::domain::aggregates::CombinationItem {
            sku: orderdesk::domain::value_objects::Sku::new(*sku).unwrap(),
            quantity: *qty,
        });
        let dims = orderdesk::domain::value_objects::Dimensions { l: 20.into(), b: 15.into(), h: 10.into() };
        self.orders.combinations().save(items.collect(), rust_decimal::Decimal::ONE, dims, "ops", None, Utc::now()).await.unwrap();
    }

    pub async fn order_doc(&self, order_id: &str) -> Value {
        self.store.get(collections::ORDERS, order_id).await.unwrap().expect("order persisted")
    }

    pub async fn order_count(&self) -> usize { self.store.len(collections::ORDERS).await }

    /// Polls until the background auto-approval pass has written its outcome.
    pub async fn wait_for_auto_approval(&self, order_id: &str) -> Value {
        for _ in 0..100 {
            let doc = self.order_doc(order_id).await;
            if doc.get("autoApproval").is_some() {
                return doc;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("auto-approval never ran for {order_id}");
    }

    pub async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        self.request_with_headers(method, uri, token, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri).header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let response = self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("read response body");
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
        (status, value)
    }
}

pub fn order_body(source: &str, items: Value, method: &str, coupon: Option<&str>) -> Value {
    json!({
        "orderSource": source,
        "customerInfo": {"name": "Asha Kulkarni", "phone": PHONE, "email": "asha@example.com"},
        "shippingAddress": {"line1": "12 MG Road", "city": "Pune", "state": "Maharashtra", "pincode": "411001"},
        "items": items,
        "paymentInfo": {"method": method},
        "couponCode": coupon,
    })
}

pub fn order_input(source: &str, items: Value, method: &str, coupon: Option<&str>) -> CreateOrderInput {
    serde_json::from_value(order_body(source, items, method, coupon)).unwrap()
}
