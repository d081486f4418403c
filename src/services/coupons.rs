//! Coupon validation, discount calculation and usage recording.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::aggregates::{ApplicableUsers, Coupon, CouponType, CouponUsage, Customer, OrderItem, UsageType};
use crate::domain::value_objects::Phone;
use crate::store::{collections, fetch, CounterRef, DocumentStore, Query, StoreError, StoreResult};

/// User-facing reasons a coupon cannot be applied. Checked in declaration order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    #[error("Coupon not found")]
    NotFound,
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon is not yet valid")]
    NotYetValid,
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon usage limit reached")]
    UsageLimitReached,
    #[error("You have already used this coupon the maximum number of times")]
    PerUserLimitReached,
    #[error("This coupon is only valid for new customers")]
    NewUsersOnly,
    #[error("This coupon is not available for your account")]
    NotEligible,
    #[error("Minimum order value of ₹{required} required for this coupon")]
    MinimumOrderValue { required: Decimal },
    #[error("Coupon is not applicable to items in this order")]
    NotApplicableToItems,
}

#[derive(Error, Debug)]
pub enum CouponError {
    #[error(transparent)]
    Rejected(#[from] CouponRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct CouponValidator {
    store: Arc<dyn DocumentStore>,
}

impl CouponValidator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self { Self { store } }

    /// Exact code first, then the upper-cased form admins store by convention.
    pub async fn find_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let code = code.trim();
        let mut candidates = vec![code.to_string()];
        if code.to_uppercase() != code {
            candidates.push(code.to_uppercase());
        }
        for candidate in candidates {
            let hits = self.store.query(collections::COUPONS, &Query::new().eq("code", candidate).limit(1)).await?;
            if let Some(doc) = hits.first() {
                return Ok(Some(doc.decode()?));
            }
        }
        Ok(None)
    }

    /// Runs every eligibility rule and returns the coupon record on success,
    /// so callers never need a second lookup.
    pub async fn validate(
        &self,
        code: &str,
        customer_id: Option<&str>,
        customer_phone: Option<&Phone>,
        subtotal: Decimal,
        items: &[OrderItem],
        now: DateTime<Utc>,
    ) -> Result<Coupon, CouponError> {
        let coupon = self.find_by_code(code).await?.ok_or(CouponRejection::NotFound)?;

        if !coupon.is_active {
            return Err(CouponRejection::Inactive.into());
        }
        if now < coupon.valid_from {
            return Err(CouponRejection::NotYetValid.into());
        }
        if !coupon.is_within_window(now) {
            return Err(CouponRejection::Expired.into());
        }

        let exhausted = match coupon.usage_type {
            UsageType::Unlimited => false,
            UsageType::SingleUse => coupon.current_usage_count >= 1,
            UsageType::MultiUse => coupon.max_usage_count.is_some_and(|max| coupon.current_usage_count >= max),
        };
        if exhausted {
            return Err(CouponRejection::UsageLimitReached.into());
        }

        if let Some(per_user) = coupon.max_usage_per_user {
            let used = self.prior_usages(&coupon.coupon_id, customer_id, customer_phone).await?;
            if used >= per_user {
                return Err(CouponRejection::PerUserLimitReached.into());
            }
        }

        match coupon.applicable_users {
            ApplicableUsers::All => {}
            ApplicableUsers::NewUsersOnly => {
                if self.prior_orders(customer_id, customer_phone).await? > 0 {
                    return Err(CouponRejection::NewUsersOnly.into());
                }
            }
            ApplicableUsers::SpecificUsers => {
                if !coupon.allows_customer(customer_id, customer_phone) {
                    return Err(CouponRejection::NotEligible.into());
                }
            }
        }

        if let Some(required) = coupon.minimum_order_value {
            if subtotal < required {
                return Err(CouponRejection::MinimumOrderValue { required }.into());
            }
        }

        if coupon.is_product_scoped() && !items.iter().any(|i| coupon.covers_product(&i.product_id)) {
            return Err(CouponRejection::NotApplicableToItems.into());
        }

        debug!(coupon_code = %coupon.code, "Coupon validated");
        Ok(coupon)
    }

    /// The part of the order a coupon's product scope lets it discount.
    pub fn eligible_subtotal(coupon: &Coupon, subtotal: Decimal, items: &[OrderItem]) -> Decimal {
        if !coupon.is_product_scoped() {
            return subtotal;
        }
        items.iter().filter(|i| coupon.covers_product(&i.product_id)).map(OrderItem::line_total).sum()
    }

    /// Monetary discount, never above the eligible subtotal or the coupon's
    /// cap. Free shipping is zero here; pricing waives the shipping charge.
    pub fn calculate_discount(coupon: &Coupon, subtotal: Decimal, items: &[OrderItem]) -> Decimal {
        let eligible = Self::eligible_subtotal(coupon, subtotal, items);
        let raw = match coupon.coupon_type {
            CouponType::Percentage => eligible * coupon.value / Decimal::ONE_HUNDRED,
            CouponType::FixedAmount => coupon.value.min(eligible),
            CouponType::FreeShipping => return Decimal::ZERO,
        };
        // round before clamping; bounds are floored to paise so rounding can never push past them
        let floor = |d: Decimal| d.round_dp_with_strategy(2, RoundingStrategy::ToZero);
        let rounded = raw.round_dp(2);
        let capped = coupon.maximum_discount_amount.map_or(rounded, |max| rounded.min(floor(max)));
        capped.min(floor(eligible)).max(Decimal::ZERO)
    }

    /// Appends the ledger entry and bumps `currentUsageCount` in one atomic
    /// step. The entry key is derived from coupon and order, so a retry for
    /// the same order is a no-op. Returns whether this call recorded it.
    pub async fn record_usage(&self, usage: &CouponUsage) -> StoreResult<bool> {
        let counter = CounterRef {
            collection: collections::COUPONS.to_string(),
            id: usage.coupon_id.clone(),
            field: "currentUsageCount".to_string(),
            by: 1,
        };
        let key = CouponUsage::key(&usage.coupon_id, &usage.order_id);
        let recorded = self
            .store
            .create_with_increment(collections::COUPON_USAGES, &key, serde_json::to_value(usage)?, &counter)
            .await?;
        if recorded {
            info!(coupon_code = %usage.coupon_code, order_id = %usage.order_id, "Recorded coupon usage");
        } else {
            debug!(coupon_code = %usage.coupon_code, order_id = %usage.order_id, "Coupon usage already recorded");
        }
        Ok(recorded)
    }

    async fn prior_usages(&self, coupon_id: &str, customer_id: Option<&str>, phone: Option<&Phone>) -> StoreResult<u64> {
        let mut seen = HashSet::new();
        if let Some(id) = customer_id {
            let q = Query::new().eq("couponId", coupon_id).eq("customerId", id);
            seen.extend(self.store.query(collections::COUPON_USAGES, &q).await?.into_iter().map(|d| d.id));
        }
        if let Some(phone) = phone {
            let q = Query::new().eq("couponId", coupon_id).eq("customerPhone", phone.as_str());
            seen.extend(self.store.query(collections::COUPON_USAGES, &q).await?.into_iter().map(|d| d.id));
        }
        Ok(seen.len() as u64)
    }

    /// Prior orders from the customer record; an unknown customer has none.
    async fn prior_orders(&self, customer_id: Option<&str>, phone: Option<&Phone>) -> StoreResult<u64> {
        let customer: Option<Customer> = match (phone, customer_id) {
            (Some(phone), _) => fetch(self.store.as_ref(), collections::CUSTOMERS, phone.as_str()).await?,
            (None, Some(id)) => self
                .store
                .query(collections::CUSTOMERS, &Query::new().eq("customerId", id).limit(1))
                .await?
                .first()
                .map(|d| d.decode())
                .transpose()?,
            (None, None) => None,
        };
        Ok(customer.map(|c| c.total_orders).unwrap_or(0))
    }
}

/// Serialisable outcome for the coupon check endpoint.
pub fn coupon_details_json(coupon: &Coupon, discount: Decimal) -> serde_json::Value {
    json!({
        "couponId": coupon.coupon_id,
        "code": coupon.code,
        "type": coupon.coupon_type,
        "value": coupon.value,
        "description": coupon.description,
        "discountAmount": discount,
    })
}
