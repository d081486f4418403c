mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use serde_json::json;

use common::{order_input, TestApp, PHONE};
use orderdesk::config::{ApiTokens, AppConfig};
use orderdesk::domain::aggregates::{Coupon, Customer, InternalStatus, Order, OrderSource};
use orderdesk::services::approval::AutoApprovalRules;
use orderdesk::services::coupons::CouponRejection;
use orderdesk::services::orders::{Collaborators, Identity, OrderListStatus};
use orderdesk::services::{LogNotifier, OrderIdAllocator};
use orderdesk::store::{collections, fetch, DocumentStore, InMemoryStore};
use orderdesk::ServiceError;

async fn stored_order(app: &TestApp, id: &str) -> Order {
    fetch(app.store.as_ref(), collections::ORDERS, id).await.unwrap().expect("order persisted")
}

#[tokio::test]
async fn test_cod_order_above_free_shipping_threshold() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    app.verify_combination(&[("KUR-S", 2)]).await;

    let input = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 2}]), "COD", None);
    let created = app.orders.create_order(input, &Identity::customer_app(), None).await.unwrap();

    assert!(created.order_id.starts_with("ORD"));
    assert_eq!(created.internal_status, InternalStatus::CreatedPending);
    let order = stored_order(&app, &created.order_id).await;
    assert_eq!(order.pricing_info.subtotal, dec!(600));
    assert_eq!(order.pricing_info.shipping_charges, dec!(0));
    assert_eq!(order.pricing_info.cod_charges, dec!(25));
    assert_eq!(order.pricing_info.grand_total, dec!(625));
    assert!(!order.needs_manual_weight_and_dimensions);

    // the background pass approves a small order from a known parcel
    let doc = app.wait_for_auto_approval(&created.order_id).await;
    assert_eq!(doc["internalStatus"], "approved");
    assert_eq!(doc["approval"]["approvedBy"], "system:auto-approval");
}

#[tokio::test]
async fn test_minimum_order_value_rejects_and_persists_nothing() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 400).await;
    app.seed_coupon("SAVE20", json!({"type": "percentage", "value": 20, "maximumDiscountAmount": 200, "minimumOrderValue": 500})).await;

    let input = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", Some("SAVE20"));
    let err = app.orders.create_order(input, &Identity::customer_app(), None).await.unwrap_err();

    assert!(matches!(err, ServiceError::Coupon(CouponRejection::MinimumOrderValue { .. })));
    assert!(err.to_string().contains("Minimum order value"));
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn test_fixed_coupon_order_records_usage_once() {
    let app = TestApp::new();
    app.seed_product("P1", "SAREE-01", 5, 1000).await;
    app.verify_combination(&[("SAREE-01", 1)]).await;
    app.seed_coupon("FLAT100", json!({"type": "fixed_amount", "value": 100, "minimumOrderValue": 800})).await;

    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "SAREE-01", "quantity": 1}]), "Prepaid", Some("flat100"));
    let created = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap();

    let order = stored_order(&app, &created.order_id).await;
    assert_eq!(order.pricing_info.discount, dec!(100));
    assert_eq!(order.pricing_info.shipping_charges, dec!(0));
    assert_eq!(order.pricing_info.taxes, dec!(0));
    assert_eq!(order.pricing_info.grand_total, dec!(900));
    assert_eq!(order.coupon_details.as_ref().map(|c| c.discount_amount), Some(dec!(100)));
    assert_eq!(order.coupon_code.as_deref(), Some("FLAT100"));

    assert_eq!(app.store.len(collections::COUPON_USAGES).await, 1);
    let coupon: Coupon = fetch(app.store.as_ref(), collections::COUPONS, "cpn-flat100").await.unwrap().unwrap();
    assert_eq!(coupon.current_usage_count, 1);
}

#[tokio::test]
async fn test_prepaid_known_parcel_is_fast_tracked() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    app.verify_combination(&[("KUR-S", 1)]).await;

    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "Prepaid", None);
    let created = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap();

    let doc = app.order_doc(&created.order_id).await;
    assert_eq!(doc["internalStatus"], "approved");
    assert_eq!(doc["approval"]["status"], "approved");
    assert_eq!(doc["approval"]["approvedBy"], "alice");
    assert_eq!(doc["paymentInfo"]["status"], "Completed");
    assert_eq!(created.order_id, "1");
}

#[tokio::test]
async fn test_unknown_parcel_needs_manual_verification() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;

    for method in ["Prepaid", "COD"] {
        let input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), method, None);
        let created = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap();
        assert_eq!(created.internal_status, InternalStatus::NeedsManualVerification);
        let doc = app.order_doc(&created.order_id).await;
        assert_eq!(doc["needsManualWeightAndDimensions"], true);
        assert_eq!(doc["approval"]["status"], "pending");
        assert!(doc["weight"].is_null());
    }
}

#[tokio::test]
async fn test_insufficient_stock_fails_whole_order() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    app.seed_product("P2", "DUP-M", 3, 200).await;

    let items = json!([
        {"productId": "P1", "sku": "KUR-S", "quantity": 1},
        {"productId": "P2", "sku": "DUP-M", "quantity": 4},
    ]);
    let err = app.orders.create_order(order_input("admin_form", items, "COD", None), &TestApp::admin(), None).await.unwrap_err();
    match err {
        ServiceError::InsufficientStock { sku, requested, available } => {
            assert_eq!((sku.as_str(), requested, available), ("DUP-M", 4, 3));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn test_split_lines_share_one_stock_check() {
    let app = TestApp::new();
    app.seed_product("P2", "DUP-M", 3, 200).await;
    let items = json!([
        {"productId": "P2", "sku": "DUP-M", "quantity": 2},
        {"productId": "P2", "sku": "dup-m", "quantity": 2},
    ]);
    let err = app.orders.create_order(order_input("admin_form", items, "COD", None), &TestApp::admin(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock { requested: 4, .. }));
}

#[tokio::test]
async fn test_unknown_product_and_variation() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;

    let missing = order_input("admin_form", json!([{"productId": "NOPE", "sku": "KUR-S", "quantity": 1}]), "COD", None);
    assert!(matches!(app.orders.create_order(missing, &TestApp::admin(), None).await, Err(ServiceError::ProductNotFound(_))));

    let bad_sku = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-XL", "quantity": 1}]), "COD", None);
    assert!(matches!(app.orders.create_order(bad_sku, &TestApp::admin(), None).await, Err(ServiceError::VariationNotFound { .. })));
}

#[tokio::test]
async fn test_free_shipping_coupon_waives_shipping() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 400).await;
    app.seed_coupon("FREESHIP", json!({"type": "free_shipping", "value": 0})).await;

    let plain = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "Prepaid", None);
    let without = app.orders.create_order(plain, &Identity::customer_app(), None).await.unwrap();
    assert_eq!(stored_order(&app, &without.order_id).await.pricing_info.shipping_charges, dec!(50));

    let with = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "Prepaid", Some("FREESHIP"));
    let created = app.orders.create_order(with, &Identity::customer_app(), None).await.unwrap();
    let order = stored_order(&app, &created.order_id).await;
    assert_eq!(order.pricing_info.shipping_charges, dec!(0));
    assert_eq!(order.pricing_info.discount, dec!(0));
    assert_eq!(order.pricing_info.grand_total, dec!(400));
}

#[tokio::test]
async fn test_customer_orders_use_catalog_price() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let input = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1, "unitPrice": 1}]), "Prepaid", None);
    let created = app.orders.create_order(input, &Identity::customer_app(), None).await.unwrap();
    assert_eq!(stored_order(&app, &created.order_id).await.items[0].unit_price, dec!(300));

    let admin = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1, "unitPrice": 250}]), "Prepaid", None);
    let created = app.orders.create_order(admin, &TestApp::admin(), None).await.unwrap();
    let order = stored_order(&app, &created.order_id).await;
    assert_eq!(order.items[0].unit_price, dec!(250));
    assert_eq!(order.pricing_info.cod_charges, dec!(0));
}

#[tokio::test]
async fn test_manual_pricing_override() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let mut input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 2}]), "COD", None);
    input.manual_pricing_info = serde_json::from_value(json!({"subtotal": 550, "discount": 50, "shippingCharges": 40})).unwrap();

    let created = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap();
    let order = stored_order(&app, &created.order_id).await;
    assert_eq!(order.pricing_info.grand_total, dec!(540));
    assert_eq!(order.pricing_info.subtotal, dec!(550));
}

#[tokio::test]
async fn test_invalid_coupon_can_be_skipped_by_staff() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let mut input = order_input("ai_agent", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", Some("GHOST"));
    input.skip_invalid_coupon = true;
    let created = app.orders.create_order(input.clone(), &TestApp::admin(), None).await.unwrap();
    assert!(stored_order(&app, &created.order_id).await.coupon_code.is_none());

    // the storefront cannot opt out
    let mut customer = input;
    customer.order_source = OrderSource::CustomerApp;
    let err = app.orders.create_order(customer, &Identity::customer_app(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Coupon(CouponRejection::NotFound)));
}

#[tokio::test]
async fn test_side_effect_outage_does_not_fail_order() {
    let app = TestApp::new();
    app.seed_product("P1", "SAREE-01", 5, 1000).await;
    app.seed_coupon("FLAT100", json!({"type": "fixed_amount", "value": 100})).await;
    app.store.fail_collection(collections::COUPON_USAGES);
    app.store.fail_collection(collections::CUSTOMER_ORDERS);
    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "SAREE-01", "quantity": 1}]), "COD", Some("FLAT100"));
    let created = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap();

    assert_eq!(app.order_count().await, 1);
    assert_eq!(created.grand_total, dec!(900));
}

#[tokio::test]
async fn test_store_outage_on_hard_path_aborts() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    app.store.fail_collection(collections::COMBINATIONS);
    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", None);
    let err = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Storage(_)));
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn test_customer_record_tracks_orders() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 3000).await;
    for _ in 0..2 {
        let input = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "Prepaid", None);
        app.orders.create_order(input, &Identity::customer_app(), None).await.unwrap();
    }
    let customer: Customer = fetch(app.store.as_ref(), collections::CUSTOMERS, "+919876543210").await.unwrap().unwrap();
    assert_eq!(customer.total_orders, 2);
    assert_eq!(customer.total_spent, dec!(6000));
    assert_eq!(customer.loyalty_tier.as_str(), "silver");
    assert_eq!(app.store.len(collections::CUSTOMER_ORDERS).await, 2);
    assert_eq!(customer.phone.as_str(), format!("+91{PHONE}"));
}

#[tokio::test]
async fn test_new_users_only_coupon_after_first_order() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    app.seed_coupon("WELCOME", json!({"type": "percentage", "value": 10, "applicableUsers": "new_users_only"})).await;

    let first = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "Prepaid", Some("WELCOME"));
    let created = app.orders.create_order(first, &Identity::customer_app(), None).await.unwrap();
    assert_eq!(created.discount, dec!(30));

    let second = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "Prepaid", Some("WELCOME"));
    let err = app.orders.create_order(second, &Identity::customer_app(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Coupon(CouponRejection::NewUsersOnly)));
}

#[tokio::test]
async fn test_idempotency_key_replays_first_result() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", None);

    let first = app.orders.create_order(input.clone(), &TestApp::admin(), Some("retry-42")).await.unwrap();
    let second = app.orders.create_order(input, &TestApp::admin(), Some("retry-42")).await.unwrap();

    assert_eq!(first.order_id, second.order_id);
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn test_held_when_over_auto_approval_limit() {
    let config = AppConfig {
        auto_approval: AutoApprovalRules { max_order_value: dec!(500), ..AutoApprovalRules::default() },
        ..AppConfig::default()
    };
    let app = TestApp::with_config(config);
    app.seed_product("P1", "KUR-S", 10, 300).await;
    app.verify_combination(&[("KUR-S", 2)]).await;

    let input = order_input("customer_app", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 2}]), "COD", None);
    let created = app.orders.create_order(input, &Identity::customer_app(), None).await.unwrap();
    let doc = app.wait_for_auto_approval(&created.order_id).await;
    assert_eq!(doc["internalStatus"], "created_pending");
    assert_eq!(doc["autoApproval"]["decision"], "held");
}

/// Hands out ids from a fixed script, standing in for two racing requests.
struct ScriptedIds(Mutex<Vec<&'static str>>);

#[async_trait]
impl OrderIdAllocator for ScriptedIds {
    async fn allocate(&self, _source: OrderSource, _now: DateTime<Utc>) -> String {
        let mut ids = self.0.lock().unwrap();
        if ids.len() > 1 { ids.remove(0).to_string() } else { ids[0].to_string() }
    }
}

fn scripted_app(ids: Vec<&'static str>) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let mut collaborators = Collaborators::from_config(store.clone(), &AppConfig::default(), Arc::new(LogNotifier));
    collaborators.order_ids = Arc::new(ScriptedIds(Mutex::new(ids)));
    TestApp::with_collaborators(store, collaborators, ApiTokens::new())
}

#[tokio::test]
async fn test_duplicate_id_is_reallocated() {
    let app = scripted_app(vec!["1001", "1001", "1002"]);
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", None);

    let first = app.orders.create_order(input.clone(), &TestApp::admin(), None).await.unwrap();
    let second = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap();
    assert_eq!(first.order_id, "1001");
    assert_eq!(second.order_id, "1002");
    assert_eq!(app.order_count().await, 2);
}

#[tokio::test]
async fn test_duplicate_id_gives_up_after_retries() {
    let app = scripted_app(vec!["1001"]);
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", None);

    app.orders.create_order(input.clone(), &TestApp::admin(), None).await.unwrap();
    let err = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::OrderIdExhausted(3)));
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn test_list_orders_by_dashboard_tab() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    app.verify_combination(&[("KUR-S", 1)]).await;

    let manual = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 2}]), "COD", None);
    let pending = app.orders.create_order(manual, &TestApp::admin(), None).await.unwrap();
    let prepaid = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "Prepaid", None);
    let approved = app.orders.create_order(prepaid, &TestApp::admin(), None).await.unwrap();

    let to_approve = app.orders.list_orders(OrderListStatus::ToApprove, None).await.unwrap();
    assert_eq!(to_approve.iter().map(|o| o.order_id.as_str()).collect::<Vec<_>>(), vec![pending.order_id.as_str()]);
    let to_ship = app.orders.list_orders(OrderListStatus::ToShip, Some(500)).await.unwrap();
    assert_eq!(to_ship[0].order_id, approved.order_id);
    assert!(app.orders.list_orders(OrderListStatus::Issues, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_phone_is_validation_error() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let mut input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", None);
    input.customer_info.phone = "12345678901234".into();
    let err = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation { .. }));
    assert_eq!(app.store.len(collections::CUSTOMERS).await, 0);
}

#[tokio::test]
async fn test_oversized_quantity_cannot_slip_past_stock_check() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 5, 300).await;

    let items = json!([
        {"productId": "P1", "sku": "KUR-S", "quantity": 1},
        {"productId": "P1", "sku": "KUR-S", "quantity": u32::MAX},
    ]);
    let err = app.orders.create_order(order_input("customer_app", items, "COD", None), &Identity::customer_app(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation { .. }));

    let items = json!([
        {"productId": "P1", "sku": "KUR-S", "quantity": 1},
        {"productId": "P1", "sku": "KUR-S", "quantity": 10_000},
    ]);
    let err = app.orders.create_order(order_input("customer_app", items, "COD", None), &Identity::customer_app(), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock { requested: 10_001, available: 5, .. }));
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn test_admin_ids_survive_a_burst_of_storefront_orders() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let admin_order = || order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", None);
    assert_eq!(app.orders.create_order(admin_order(), &TestApp::admin(), None).await.unwrap().order_id, "1");

    let later = Utc::now().timestamp_millis() + 1_000;
    for n in 0..50 {
        let id = format!("ORD010126-{}", 5000 + n);
        let doc = json!({"orderId": id, "orderSource": "customer_app", "createdAtMs": later + n});
        app.store.set(collections::ORDERS, &id, doc).await.unwrap();
    }

    let created = app.orders.create_order(admin_order(), &TestApp::admin(), None).await.unwrap();
    assert_eq!(created.order_id, "2");
}

#[tokio::test]
async fn test_taken_id_is_retried_with_fresh_id() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    // a legacy document outside the admin scan already owns "1"
    app.store.set(collections::ORDERS, "1", json!({"orderId": "1", "orderSource": "legacy"})).await.unwrap();

    let input = order_input("admin_form", json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]), "COD", None);
    let created = app.orders.create_order(input, &TestApp::admin(), None).await.unwrap();
    assert_ne!(created.order_id, "1");
    assert!(created.order_id.parse::<u64>().is_ok());
    assert_eq!(app.order_count().await, 2);
}

#[tokio::test]
async fn test_idempotency_keys_are_scoped_to_caller() {
    let app = TestApp::new();
    app.seed_product("P1", "KUR-S", 10, 300).await;
    let items = json!([{"productId": "P1", "sku": "KUR-S", "quantity": 1}]);

    let staff = app.orders.create_order(order_input("admin_form", items.clone(), "COD", None), &TestApp::admin(), Some("shared-key")).await.unwrap();
    let customer = app
        .orders
        .create_order(order_input("customer_app", items, "COD", None), &Identity::customer_app(), Some("shared-key"))
        .await
        .unwrap();

    assert!(!customer.replayed);
    assert_ne!(customer.order_id, staff.order_id);
    assert_eq!(app.order_count().await, 2);
}
