//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::coupon::CouponType;
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{Dimensions, Phone, Sku};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource { AdminForm, AiAgent, CustomerApp }

impl OrderSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminForm => "admin_form",
            Self::AiAgent => "ai_agent",
            Self::CustomerApp => "customer_app",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "COD")]
    Cod,
    Prepaid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus { #[default] Pending, Completed, Failed, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus { #[default] Pending, Approved, Rejected }

/// Operational state of an order. Creation only ever produces the first
/// three; the rest belong to shipping and support workflows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalStatus {
    CreatedPending,
    NeedsManualVerification,
    Approved,
    ReadyToShip,
    Shipped,
    InTransit,
    Delivered,
    Rejected,
    Cancelled,
    Issue,
}

impl InternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedPending => "created_pending",
            Self::NeedsManualVerification => "needs_manual_verification",
            Self::Approved => "approved",
            Self::ReadyToShip => "ready_to_ship",
            Self::Shipped => "shipped",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Issue => "issue",
        }
    }

    /// Label shown to customers in their order history.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::CreatedPending | Self::NeedsManualVerification => "Order Placed",
            Self::Approved | Self::ReadyToShip => "Confirmed",
            Self::Shipped | Self::InTransit => "Shipped",
            Self::Delivered => "Delivered",
            Self::Rejected | Self::Cancelled => "Cancelled",
            Self::Issue => "On Hold",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub sku: Sku,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hsn_code: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal { self.unit_price * Decimal::from(self.quantity) }
}

/// Price breakdown. `grand_total` is always derived from the components.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInfo {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub taxes: Decimal,
    pub shipping_charges: Decimal,
    pub cod_charges: Decimal,
    pub grand_total: Decimal,
}

impl PricingInfo {
    pub fn from_components(subtotal: Decimal, discount: Decimal, taxes: Decimal, shipping_charges: Decimal, cod_charges: Decimal) -> Self {
        Self {
            subtotal,
            discount,
            taxes,
            shipping_charges,
            cod_charges,
            grand_total: subtotal - discount + taxes + shipping_charges + cod_charges,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.grand_total == self.subtotal - self.discount + self.taxes + self.shipping_charges + self.cod_charges
            && self.grand_total >= Decimal::ZERO
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponDetails {
    pub coupon_id: String,
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub discount_amount: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub status: ApprovalStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: Phone,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmark: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String { "India".to_string() }

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub order_source: OrderSource,
    pub customer_id: String,
    pub customer_info: CustomerInfo,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub pricing_info: PricingInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_details: Option<CouponDetails>,
    pub payment_info: PaymentInfo,
    pub approval: Approval,
    pub internal_status: InternalStatus,
    pub weight: Option<Decimal>,
    pub dimensions: Option<Dimensions>,
    pub needs_manual_weight_and_dimensions: bool,
    pub combination_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub created_at_ms: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<OrderEvent>,
}

impl Order {
    /// Starts a new order in its pre-decision state: approval pending,
    /// payment pending, dimensions unknown.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        order_id: impl Into<String>,
        order_source: OrderSource,
        customer_id: impl Into<String>,
        customer_info: CustomerInfo,
        shipping_address: ShippingAddress,
        items: Vec<OrderItem>,
        pricing_info: PricingInfo,
        payment_method: PaymentMethod,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() { return Err(OrderError::NoItems); }
        if !pricing_info.is_consistent() { return Err(OrderError::InconsistentPricing); }
        Ok(Self {
            order_id: order_id.into(),
            order_source,
            customer_id: customer_id.into(),
            customer_info,
            shipping_address,
            items,
            pricing_info,
            coupon_code: None,
            coupon_details: None,
            payment_info: PaymentInfo { method: payment_method, status: PaymentStatus::Pending },
            approval: Approval::default(),
            internal_status: InternalStatus::CreatedPending,
            weight: None,
            dimensions: None,
            needs_manual_weight_and_dimensions: true,
            combination_hash: String::new(),
            traffic_source: None,
            idempotency_key: None,
            created_by: created_by.into(),
            created_at: now,
            created_at_ms: now.timestamp_millis(),
            updated_at: now,
            events: vec![],
        })
    }

    pub fn item_count(&self) -> u32 { self.items.iter().fold(0u32, |n, i| n.saturating_add(i.quantity)) }
    pub fn grand_total(&self) -> Decimal { self.pricing_info.grand_total }

    pub fn apply_coupon(&mut self, details: CouponDetails) -> Result<(), OrderError> {
        if details.discount_amount != self.pricing_info.discount {
            return Err(OrderError::CouponDiscountMismatch);
        }
        self.coupon_code = Some(details.code.clone());
        self.coupon_details = Some(details);
        Ok(())
    }

    /// Records the physical parcel resolved for this order's item combination.
    pub fn apply_parcel(&mut self, combination_hash: String, parcel: Option<(Decimal, Dimensions)>) {
        self.combination_hash = combination_hash;
        match parcel {
            Some((weight, dimensions)) => {
                self.weight = Some(weight);
                self.dimensions = Some(dimensions);
                self.needs_manual_weight_and_dimensions = false;
            }
            None => {
                self.weight = None;
                self.dimensions = None;
                self.needs_manual_weight_and_dimensions = true;
            }
        }
    }

    pub fn apply_initial_status(&mut self, internal_status: InternalStatus, approval: Approval, payment_status: PaymentStatus) {
        self.internal_status = internal_status;
        self.approval = approval;
        self.payment_info.status = payment_status;
    }

    /// Marks the order as ready to persist and raises `Placed`.
    pub fn place(&mut self) {
        self.raise_event(OrderEvent::Placed {
            order_id: self.order_id.clone(),
            order_source: self.order_source,
            customer_name: self.customer_info.name.clone(),
            customer_phone: self.customer_info.phone.to_string(),
            grand_total: self.pricing_info.grand_total,
            item_count: self.item_count(),
            internal_status: self.internal_status,
        });
        if self.internal_status == InternalStatus::NeedsManualVerification {
            self.raise_event(OrderEvent::ManualVerificationRequired {
                order_id: self.order_id.clone(),
                combination_hash: self.combination_hash.clone(),
            });
        }
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems, InconsistentPricing, CouponDiscountMismatch }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "Order must contain at least one item"),
            Self::InconsistentPricing => write!(f, "Pricing components do not add up to a non-negative total"),
            Self::CouponDiscountMismatch => write!(f, "Coupon discount does not match the priced discount"),
        }
    }
}
