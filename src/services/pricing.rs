//! Order pricing: subtotal, shipping and COD surcharge.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::domain::aggregates::{OrderItem, PricingInfo};
use crate::{Result, ServiceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricingConfig {
    /// Orders strictly above this subtotal ship free.
    pub free_shipping_threshold: Decimal,
    pub shipping_charge: Decimal,
    pub cod_charge: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self { free_shipping_threshold: Decimal::from(500), shipping_charge: Decimal::from(50), cod_charge: Decimal::from(25) }
    }
}

/// Operator-entered breakdown that replaces computed pricing on admin orders.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPricing {
    pub subtotal: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub taxes: Decimal,
    #[serde(default)]
    pub shipping_charges: Decimal,
    #[serde(default)]
    pub cod_charges: Decimal,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self { Self { config } }

    pub fn config(&self) -> &PricingConfig { &self.config }

    pub fn subtotal(items: &[OrderItem]) -> Decimal { items.iter().map(OrderItem::line_total).sum() }

    /// Taxes are always zero. `discount` is clamped to `[0, subtotal]` so the
    /// grand total can never go negative.
    pub fn compute(&self, items: &[OrderItem], discount: Decimal, free_shipping_coupon: bool, cod_surcharge: bool) -> PricingInfo {
        let subtotal = Self::subtotal(items);
        let discount = discount.max(Decimal::ZERO).min(subtotal);
        let shipping = if free_shipping_coupon || subtotal > self.config.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.config.shipping_charge
        };
        let cod = if cod_surcharge { self.config.cod_charge } else { Decimal::ZERO };
        PricingInfo::from_components(subtotal, discount, Decimal::ZERO, shipping, cod)
    }

    /// Bypasses the engine; only the grand total is recomputed.
    pub fn manual(pricing: &ManualPricing) -> Result<PricingInfo> {
        let components = [
            ("subtotal", pricing.subtotal),
            ("discount", pricing.discount),
            ("taxes", pricing.taxes),
            ("shippingCharges", pricing.shipping_charges),
            ("codCharges", pricing.cod_charges),
        ];
        if let Some((field, _)) = components.iter().find(|(_, v)| *v < Decimal::ZERO) {
            return Err(ServiceError::validation("Pricing components cannot be negative", json!({"field": format!("manualPricingInfo.{field}")})));
        }
        let info = PricingInfo::from_components(pricing.subtotal, pricing.discount, pricing.taxes, pricing.shipping_charges, pricing.cod_charges);
        if info.grand_total < Decimal::ZERO {
            return Err(ServiceError::validation("Discount exceeds the order value", json!({"field": "manualPricingInfo.discount"})));
        }
        Ok(info)
    }
}
