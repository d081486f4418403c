//! Verified combination: operator-confirmed parcel for a multiset of SKUs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Dimensions, Sku};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationItem {
    pub sku: Sku,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCombination {
    pub combination_hash: String,
    pub items: Vec<CombinationItem>,
    pub total_items: u32,
    pub unique_products: u32,
    pub weight: Decimal,
    pub dimensions: Dimensions,
    pub verified_by: String,
    pub verified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl VerifiedCombination {
    pub fn parcel(&self) -> (Decimal, Dimensions) { (self.weight, self.dimensions) }
}
