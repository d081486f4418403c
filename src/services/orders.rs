//! Order creation pipeline and order listing.
//!
//! Creation is split into a hard path (validate, resolve customer and items,
//! price, look up the parcel, allocate an id, decide status, persist) where
//! any failure aborts with nothing written, and a soft path of side effects
//! that are logged and swallowed once the order exists.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::config::AppConfig;
use crate::domain::aggregates::{
    Coupon, CouponDetails, CouponUsage, Customer, CustomerInfo, InternalStatus, Order, OrderItem, OrderSource,
    PaymentMethod, ShippingAddress, VerifiedCombination,
};
use crate::domain::value_objects::{Phone, Sku};
use crate::services::approval::{ApprovalDecider, AutoApprovalRequest, AutoApprover, InitialStatus, ThresholdAutoApprover};
use crate::services::catalog::{ProductCatalog, StoreCatalog};
use crate::services::combinations::CombinationStore;
use crate::services::coupons::{coupon_details_json, CouponError, CouponValidator};
use crate::services::customers::{CustomerRegistry, StoreCustomerRegistry};
use crate::services::notifications::Notifier;
use crate::services::order_ids::{DailySequence, GlobalNumeric, OrderIdAllocator, SourceRoutedAllocator};
use crate::services::pricing::{ManualPricing, PricingEngine};
use crate::store::{collections, fetch, DocumentStore, FilterOp, Query, StoreError};
use crate::{Result, ServiceError};

const MAX_ID_ATTEMPTS: u32 = 3;
/// Upper bound for a single line; anything larger is a typo or an attack.
pub const MAX_LINE_QUANTITY: u32 = 10_000;
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 200;

// =============================================================================
// Identity
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role { Admin, Machine, Customer }

/// Who is acting on an order. Recorded as `createdBy` and, on fast-tracked
/// orders, `approval.approvedBy`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub role: Role,
}

impl Identity {
    pub fn new(subject: impl Into<String>, role: Role) -> Self { Self { subject: subject.into(), role } }

    /// The anonymous storefront caller.
    pub fn customer_app() -> Self { Self::new("customer_app", Role::Customer) }

    pub fn is_customer(&self) -> bool { self.role == Role::Customer }
}

// =============================================================================
// Input DTOs
// =============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    pub order_source: OrderSource,
    #[validate]
    pub customer_info: CustomerInfoInput,
    #[validate]
    pub shipping_address: AddressInput,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<OrderItemInput>,
    pub payment_info: PaymentInput,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub manual_pricing_info: Option<ManualPricing>,
    /// Admin only: proceed without the coupon instead of failing.
    #[serde(default)]
    pub skip_invalid_coupon: bool,
    #[serde(default)]
    pub traffic_source: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CustomerInfoInput {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub name: String,
    #[validate(length(min = 10, message = "Phone number is required"))]
    pub phone: String,
    #[serde(default)]
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    #[validate(length(min = 1, message = "Address line is required"))]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub landmark: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "State is required"))]
    pub state: String,
    #[validate(length(equal = 6, message = "Pincode must be 6 digits"))]
    pub pincode: String,
    #[serde(default)]
    pub country: Option<String>,
}

impl From<AddressInput> for ShippingAddress {
    fn from(a: AddressInput) -> Self {
        Self {
            line1: a.line1.trim().to_string(),
            line2: a.line2,
            landmark: a.landmark,
            city: a.city.trim().to_string(),
            state: a.state.trim().to_string(),
            pincode: a.pincode.trim().to_string(),
            country: a.country.unwrap_or_else(|| "India".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: String,
    #[serde(default)]
    pub variation_id: Option<String>,
    pub sku: String,
    pub quantity: u32,
    /// Admin only; customer orders always take the catalog price.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PaymentInput {
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponCheckInput {
    pub coupon_code: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub items: Vec<OrderItemInput>,
}

// =============================================================================
// Results
// =============================================================================

/// What the create endpoints report back. Also the idempotency record body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub internal_status: InternalStatus,
    pub grand_total: Decimal,
    pub discount: Decimal,
    pub created_at: DateTime<Utc>,
    /// Set when an idempotency key matched an earlier request.
    #[serde(default, skip_serializing)]
    pub replayed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponCheck {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_shipping: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dashboard tabs and the internal statuses each one shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderListStatus { ToApprove, ToShip, InTransit, Completed, Rejected, Issues }

impl OrderListStatus {
    pub fn statuses(&self) -> &'static [InternalStatus] {
        use InternalStatus::*;
        match self {
            Self::ToApprove => &[CreatedPending, NeedsManualVerification],
            Self::ToShip => &[Approved, ReadyToShip],
            Self::InTransit => &[Shipped, InTransit],
            Self::Completed => &[Delivered],
            Self::Rejected => &[Rejected, Cancelled],
            Self::Issues => &[Issue],
        }
    }
}

impl FromStr for OrderListStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "to-approve" => Ok(Self::ToApprove),
            "to-ship" => Ok(Self::ToShip),
            "in-transit" => Ok(Self::InTransit),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            "issues" => Ok(Self::Issues),
            other => Err(ServiceError::validation(format!("Unknown order status filter: {other}"), json!({"field": "status"}))),
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Everything the pipeline talks to, injected explicitly.
pub struct Collaborators {
    pub store: Arc<dyn DocumentStore>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub customers: Arc<dyn CustomerRegistry>,
    pub coupons: CouponValidator,
    pub combinations: CombinationStore,
    pub order_ids: Arc<dyn OrderIdAllocator>,
    pub pricing: PricingEngine,
    pub notifier: Arc<dyn Notifier>,
    pub auto_approver: Arc<dyn AutoApprover>,
}

impl Collaborators {
    /// Store-backed defaults for every port.
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let ids = &config.order_ids;
        let order_ids = SourceRoutedAllocator::new(
            DailySequence::new(store.clone(), ids.offset, ids.daily_base, ids.scan_window),
            GlobalNumeric::new(store.clone(), ids.scan_window),
        );
        Self {
            catalog: Arc::new(StoreCatalog::new(store.clone())),
            customers: Arc::new(StoreCustomerRegistry::new(store.clone())),
            coupons: CouponValidator::new(store.clone()),
            combinations: CombinationStore::new(store.clone()),
            order_ids: Arc::new(order_ids),
            pricing: PricingEngine::new(config.pricing),
            auto_approver: Arc::new(ThresholdAutoApprover::new(store.clone(), config.auto_approval.clone(), notifier.clone())),
            notifier,
            store,
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<dyn ProductCatalog>,
    customers: Arc<dyn CustomerRegistry>,
    coupons: CouponValidator,
    combinations: CombinationStore,
    order_ids: Arc<dyn OrderIdAllocator>,
    pricing: PricingEngine,
    notifier: Arc<dyn Notifier>,
    auto_approver: Arc<dyn AutoApprover>,
}

impl OrderService {
    pub fn new(c: Collaborators) -> Self {
        Self {
            store: c.store,
            catalog: c.catalog,
            customers: c.customers,
            coupons: c.coupons,
            combinations: c.combinations,
            order_ids: c.order_ids,
            pricing: c.pricing,
            notifier: c.notifier,
            auto_approver: c.auto_approver,
        }
    }

    pub fn combinations(&self) -> &CombinationStore { &self.combinations }

    pub async fn create_order(&self, input: CreateOrderInput, actor: &Identity, idempotency_key: Option<&str>) -> Result<OrderCreated> {
        // keys are scoped to the caller so one channel cannot replay another's order
        let scoped_key = idempotency_key.map(|key| format!("{}:{key}", actor.subject));
        if let Some(key) = scoped_key.as_deref() {
            if let Some(mut previous) = fetch::<OrderCreated>(self.store.as_ref(), collections::IDEMPOTENCY_KEYS, key).await? {
                info!(order_id = %previous.order_id, "Idempotency key matched, returning existing order");
                previous.replayed = true;
                return Ok(previous);
            }
        }

        // 1. shape
        input.validate()?;
        let customer_channel = actor.is_customer();
        let source = if customer_channel { OrderSource::CustomerApp } else { input.order_source };
        if customer_channel && input.manual_pricing_info.is_some() {
            return Err(ServiceError::validation("Manual pricing is not allowed on customer orders", json!({"field": "manualPricingInfo"})));
        }
        if let Some(pos) = input.items.iter().position(|i| i.quantity == 0) {
            return Err(ServiceError::validation("Quantity must be at least 1", json!({"field": format!("items[{pos}].quantity")})));
        }
        let phone = Phone::parse(&input.customer_info.phone)
            .map_err(|e| ServiceError::validation(e.to_string(), json!({"field": "customerInfo.phone"})))?;
        let address = ShippingAddress::from(input.shipping_address.clone());
        let now = Utc::now();

        // 2. customer
        let info = &input.customer_info;
        let customer = self.customers.upsert(&phone, &info.name, info.email.as_deref(), Some(&address), now).await?;

        // 3. items
        let items = self.resolve_items(&input.items, customer_channel).await?;
        let subtotal = PricingEngine::subtotal(&items);

        // 4. coupon
        let coupon = match input.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            None => None,
            Some(code) => match self.coupons.validate(code, Some(&customer.customer_id), Some(&phone), subtotal, &items, now).await {
                Ok(coupon) => Some(coupon),
                Err(CouponError::Rejected(reason)) if input.skip_invalid_coupon && !customer_channel => {
                    warn!(coupon_code = %code, reason = %reason, "Skipping invalid coupon at caller's request");
                    None
                }
                Err(e) => return Err(e.into()),
            },
        };

        // 5. pricing
        let method = input.payment_info.method;
        let pricing = match &input.manual_pricing_info {
            Some(manual) => PricingEngine::manual(manual)?,
            None => {
                let discount = coupon.as_ref().map_or(Decimal::ZERO, |c| CouponValidator::calculate_discount(c, subtotal, &items));
                let free_shipping = coupon.as_ref().is_some_and(Coupon::is_free_shipping);
                self.pricing.compute(&items, discount, free_shipping, customer_channel && method == PaymentMethod::Cod)
            }
        };

        // 6 + 7. parcel lookup and id allocation are independent
        let combination_hash = CombinationStore::hash(&items);
        let (combination, order_id) = tokio::join!(self.combinations.find(&items), self.order_ids.allocate(source, now));
        let parcel = combination?.as_ref().map(VerifiedCombination::parcel);

        // 8. status
        let status = ApprovalDecider::decide(parcel.is_none(), method, &actor.subject, now);

        let customer_info = CustomerInfo { name: info.name.trim().to_string(), phone: phone.clone(), email: info.email.clone() };
        let mut order = Order::create(order_id, source, customer.customer_id.clone(), customer_info, address, items, pricing, method, actor.subject.clone(), now)?;
        if let Some(c) = &coupon {
            order.apply_coupon(CouponDetails {
                coupon_id: c.coupon_id.clone(),
                code: c.code.clone(),
                coupon_type: c.coupon_type,
                value: c.value,
                discount_amount: order.pricing_info.discount,
            })?;
        }
        order.apply_parcel(combination_hash, parcel);
        order.apply_initial_status(status.internal_status, status.approval.clone(), status.payment_status);
        order.traffic_source = input.traffic_source.clone();
        order.idempotency_key = idempotency_key.map(str::to_string);

        // 9. single atomic write
        self.persist(&mut order, source, now).await?;
        order.place();
        info!(
            order_id = %order.order_id,
            order_source = source.as_str(),
            internal_status = order.internal_status.as_str(),
            grand_total = %order.grand_total(),
            "Order created"
        );

        let created = OrderCreated {
            order_id: order.order_id.clone(),
            internal_status: order.internal_status,
            grand_total: order.grand_total(),
            discount: order.pricing_info.discount,
            created_at: order.created_at,
            replayed: false,
        };

        // 10. soft path
        if let Some(key) = scoped_key.as_deref() {
            self.remember(key, &created).await;
        }
        self.run_side_effects(&mut order, coupon.as_ref(), &customer, &status).await;

        Ok(created)
    }

    /// Fails the whole order on the first unknown product, variation or
    /// stock shortfall. Quantities of repeated lines are checked together.
    async fn resolve_items(&self, inputs: &[OrderItemInput], catalog_prices_only: bool) -> Result<Vec<OrderItem>> {
        let mut requested: HashMap<Sku, u32> = HashMap::new();
        let mut items = Vec::with_capacity(inputs.len());
        for (pos, input) in inputs.iter().enumerate() {
            let sku = Sku::new(input.sku.as_str())
                .map_err(|e| ServiceError::validation(e.to_string(), json!({"field": format!("items[{pos}].sku")})))?;
            let product = self
                .catalog
                .get_product(&input.product_id)
                .await?
                .ok_or_else(|| ServiceError::ProductNotFound(input.product_id.clone()))?;
            if !product.is_sellable() {
                return Err(ServiceError::ProductUnavailable(input.product_id.clone()));
            }
            let variation = product
                .find_variation(input.variation_id.as_deref(), &sku)
                .ok_or_else(|| ServiceError::VariationNotFound { product_id: product.product_id.clone(), sku: sku.to_string() })?;

            if input.quantity > MAX_LINE_QUANTITY {
                return Err(ServiceError::validation(
                    format!("Quantity cannot exceed {MAX_LINE_QUANTITY}"),
                    json!({"field": format!("items[{pos}].quantity")}),
                ));
            }
            let total = requested.entry(variation.sku.clone()).or_insert(0);
            *total = total.checked_add(input.quantity).ok_or_else(|| ServiceError::InsufficientStock {
                sku: variation.sku.to_string(),
                requested: u32::MAX,
                available: variation.stock,
            })?;
            if !variation.has_stock(*total) {
                debug!(sku = %variation.sku, requested = *total, available = variation.stock, "Stock check failed");
                return Err(ServiceError::InsufficientStock { sku: variation.sku.to_string(), requested: *total, available: variation.stock });
            }

            let unit_price = match input.unit_price {
                Some(price) if !catalog_prices_only => price,
                _ => variation.effective_price(),
            };
            if unit_price < Decimal::ZERO {
                return Err(ServiceError::validation("Unit price cannot be negative", json!({"field": format!("items[{pos}].unitPrice")})));
            }

            items.push(OrderItem {
                product_id: product.product_id.clone(),
                variation_id: variation.variation_id.clone(),
                product_name: product.name.clone(),
                quantity: input.quantity,
                unit_price,
                sku: variation.sku.clone(),
                weight: variation.weight,
                dimensions: variation.dimensions,
                hsn_code: variation.hsn_code.clone(),
            });
        }
        Ok(items)
    }

    /// Inserts the order, re-allocating the id when another request took it first.
    async fn persist(&self, order: &mut Order, source: OrderSource, now: DateTime<Utc>) -> Result<()> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            match self.store.create(collections::ORDERS, &order.order_id, serde_json::to_value(&*order).map_err(StoreError::from)?).await {
                Ok(()) => return Ok(()),
                Err(StoreError::AlreadyExists { .. }) => {
                    warn!(order_id = %order.order_id, attempt, "Order id already taken, allocating another");
                    order.order_id = self.order_ids.reallocate(source, now).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        error!(attempts = MAX_ID_ATTEMPTS, "Giving up on order id allocation");
        Err(ServiceError::OrderIdExhausted(MAX_ID_ATTEMPTS))
    }

    async fn remember(&self, key: &str, created: &OrderCreated) {
        let result = match serde_json::to_value(created) {
            Ok(doc) => self.store.create(collections::IDEMPOTENCY_KEYS, key, doc).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(order_id = %created.order_id, error = %e, "Failed to store idempotency key");
        }
    }

    /// Each effect is independent; a failure is logged with the order id and dropped.
    async fn run_side_effects(&self, order: &mut Order, coupon: Option<&Coupon>, customer: &Customer, status: &InitialStatus) {
        if let Some(c) = coupon {
            let usage = CouponUsage {
                usage_id: CouponUsage::key(&c.coupon_id, &order.order_id),
                coupon_id: c.coupon_id.clone(),
                coupon_code: c.code.clone(),
                order_id: order.order_id.clone(),
                customer_id: Some(order.customer_id.clone()),
                customer_phone: Some(order.customer_info.phone.to_string()),
                discount_amount: order.pricing_info.discount,
                order_value: order.grand_total(),
                used_at: order.created_at,
            };
            if let Err(e) = self.coupons.record_usage(&usage).await {
                warn!(order_id = %order.order_id, coupon_code = %c.code, error = %e, "Failed to record coupon usage");
            }
        }

        if !order.needs_manual_weight_and_dimensions {
            self.combinations.record_usage(&order.combination_hash, order.created_at).await;
        }

        if let Err(e) = self.customers.record_order(order).await {
            warn!(order_id = %order.order_id, error = %e, "Failed to update customer totals");
        }
        if let Err(e) = self.customers.project_order(order).await {
            warn!(order_id = %order.order_id, error = %e, "Failed to sync customer order projection");
        }

        for event in order.take_events() {
            if let Err(e) = self.notifier.publish(&event).await {
                warn!(order_id = %order.order_id, event = event.name(), error = %e, "Failed to send order notification");
            }
        }

        if status.needs_auto_approval() {
            let request = AutoApprovalRequest {
                order_id: order.order_id.clone(),
                grand_total: order.grand_total(),
                customer_prior_orders: customer.total_orders,
                customer_since: Some(customer.created_at),
                dimensions_known: order.dimensions.is_some(),
            };
            let approver = self.auto_approver.clone();
            tokio::spawn(async move {
                let order_id = request.order_id.clone();
                match approver.run(request).await {
                    Ok(outcome) => debug!(order_id = %order_id, ?outcome, "Auto-approval finished"),
                    Err(e) => warn!(order_id = %order_id, error = %e, "Auto-approval failed"),
                }
            });
        }
    }

    /// Newest first. `limit` defaults to 50 and is capped at 200.
    pub async fn list_orders(&self, status: OrderListStatus, limit: Option<usize>) -> Result<Vec<Order>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let wanted: Vec<&str> = status.statuses().iter().map(InternalStatus::as_str).collect();
        let query = Query::new()
            .filter("internalStatus", FilterOp::In, json!(wanted))
            .order_by("createdAtMs", true)
            .limit(limit);
        let docs = self.store.query(collections::ORDERS, &query).await?;
        Ok(docs.iter().map(|d| d.decode()).collect::<std::result::Result<_, _>>()?)
    }

    /// Prices the items from the catalog and reports whether the coupon applies.
    pub async fn check_coupon(&self, input: CouponCheckInput) -> Result<CouponCheck> {
        let phone = input
            .customer_phone
            .as_deref()
            .map(Phone::parse)
            .transpose()
            .map_err(|e| ServiceError::validation(e.to_string(), json!({"field": "customerPhone"})))?;
        if input.items.is_empty() {
            return Err(ServiceError::validation("At least one item is required", json!({"field": "items"})));
        }
        let items = self.resolve_items(&input.items, true).await?;
        let subtotal = PricingEngine::subtotal(&items);

        match self.coupons.validate(&input.coupon_code, None, phone.as_ref(), subtotal, &items, Utc::now()).await {
            Ok(coupon) => {
                let discount = CouponValidator::calculate_discount(&coupon, subtotal, &items);
                Ok(CouponCheck {
                    is_valid: true,
                    coupon_details: Some(coupon_details_json(&coupon, discount)),
                    discount: Some(discount),
                    free_shipping: Some(coupon.is_free_shipping()),
                    error: None,
                })
            }
            Err(CouponError::Rejected(reason)) => {
                Ok(CouponCheck { is_valid: false, coupon_details: None, discount: None, free_shipping: None, error: Some(reason.to_string()) })
            }
            Err(CouponError::Store(e)) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_status_mapping() {
        assert_eq!("to-approve".parse::<OrderListStatus>().unwrap().statuses(), &[InternalStatus::CreatedPending, InternalStatus::NeedsManualVerification]);
        assert_eq!("issues".parse::<OrderListStatus>().unwrap(), OrderListStatus::Issues);
        assert!(matches!("shipped".parse::<OrderListStatus>(), Err(ServiceError::Validation { .. })));
    }

    #[test]
    fn test_input_validation_messages() {
        let input: CreateOrderInput = serde_json::from_value(json!({
            "orderSource": "admin_form",
            "customerInfo": {"name": "", "phone": "9876543210"},
            "shippingAddress": {"line1": "1 MG Road", "city": "Pune", "state": "MH", "pincode": "411001"},
            "items": [],
            "paymentInfo": {"method": "COD"}
        }))
        .unwrap();
        let errors = input.validate().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("items"));
        assert!(fields.contains_key("customer_info"));
    }

    #[test]
    fn test_customer_identity() {
        assert!(Identity::customer_app().is_customer());
        assert!(!Identity::new("ops", Role::Admin).is_customer());
    }
}
