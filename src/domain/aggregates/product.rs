//! Catalog product as read by the order pipeline

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Dimensions, Sku};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub status: ProductStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    #[serde(default)]
    pub variation_id: Option<String>,
    pub sku: Sku,
    #[serde(default)]
    pub stock: u32,
    pub price: Decimal,
    #[serde(default)]
    pub sale_price: Option<Decimal>,
    #[serde(default)]
    pub weight: Option<Decimal>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub hsn_code: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus { Draft, #[default] Active, Archived }

impl Product {
    pub fn is_sellable(&self) -> bool { self.status == ProductStatus::Active }

    /// Resolves a variation by id first, falling back to SKU.
    pub fn find_variation(&self, variation_id: Option<&str>, sku: &Sku) -> Option<&Variation> {
        variation_id
            .and_then(|id| self.variations.iter().find(|v| v.variation_id.as_deref() == Some(id)))
            .or_else(|| self.variations.iter().find(|v| &v.sku == sku))
    }
}

impl Variation {
    /// Sale price when one is set and positive, list price otherwise.
    pub fn effective_price(&self) -> Decimal {
        self.sale_price.filter(|p| *p > Decimal::ZERO).unwrap_or(self.price)
    }

    pub fn has_stock(&self, quantity: u32) -> bool { self.stock >= quantity }
}
