//! Coupon Aggregate and its usage ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Phone;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponType { Percentage, FixedAmount, FreeShipping }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType { SingleUse, MultiUse, #[default] Unlimited }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicableUsers { #[default] All, SpecificUsers, NewUsersOnly }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub coupon_id: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub coupon_type: CouponType,
    #[serde(default)]
    pub value: Decimal,
    #[serde(default)]
    pub usage_type: UsageType,
    #[serde(default)]
    pub max_usage_count: Option<u64>,
    #[serde(default)]
    pub max_usage_per_user: Option<u64>,
    #[serde(default)]
    pub applicable_users: ApplicableUsers,
    #[serde(default)]
    pub specific_phones: Vec<String>,
    #[serde(default)]
    pub specific_user_ids: Vec<String>,
    #[serde(default)]
    pub minimum_order_value: Option<Decimal>,
    #[serde(default)]
    pub maximum_discount_amount: Option<Decimal>,
    #[serde(default)]
    pub applicable_products: Vec<String>,
    #[serde(default)]
    pub excluded_products: Vec<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub current_usage_count: u64,
}

impl Coupon {
    pub fn is_free_shipping(&self) -> bool { self.coupon_type == CouponType::FreeShipping }

    pub fn is_product_scoped(&self) -> bool {
        !self.applicable_products.is_empty() || !self.excluded_products.is_empty()
    }

    /// Whether a line for `product_id` counts towards the discountable subtotal.
    pub fn covers_product(&self, product_id: &str) -> bool {
        let included = self.applicable_products.is_empty() || self.applicable_products.iter().any(|p| p == product_id);
        included && !self.excluded_products.iter().any(|p| p == product_id)
    }

    /// Allow-list check for `specific_users` coupons. Stored phones are
    /// normalised before comparison; unparseable entries never match.
    pub fn allows_customer(&self, customer_id: Option<&str>, phone: Option<&Phone>) -> bool {
        let by_id = customer_id.is_some_and(|id| self.specific_user_ids.iter().any(|u| u == id));
        let by_phone = phone.is_some_and(|phone| {
            self.specific_phones.iter().filter_map(|p| Phone::parse(p).ok()).any(|p| &p == phone)
        });
        by_id || by_phone
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.valid_until
    }
}

/// Append-only ledger entry, one per (coupon, order).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponUsage {
    pub usage_id: String,
    pub coupon_id: String,
    pub coupon_code: String,
    pub order_id: String,
    pub customer_id: Option<String>,
    pub customer_phone: Option<String>,
    pub discount_amount: Decimal,
    pub order_value: Decimal,
    pub used_at: DateTime<Utc>,
}

impl CouponUsage {
    /// Deterministic ledger key; recording the same order twice hits the same document.
    pub fn key(coupon_id: &str, order_id: &str) -> String { format!("{coupon_id}_{order_id}") }
}
