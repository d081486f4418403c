//! Verified weight/dimension cache keyed by item-combination hash.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::aggregates::{CombinationItem, OrderItem, VerifiedCombination};
use crate::domain::value_objects::{Dimensions, Sku};
use crate::store::{collections, fetch, put, DocumentStore, FieldUpdate, StoreResult};
use crate::{Result, ServiceError};

#[derive(Clone)]
pub struct CombinationStore {
    store: Arc<dyn DocumentStore>,
}

/// Folds lines into a SKU -> total quantity multiset. Repeated SKUs are
/// summed so split lines hash like a single line.
fn multiset<'a>(pairs: impl IntoIterator<Item = (&'a Sku, u32)>) -> BTreeMap<&'a Sku, u32> {
    pairs.into_iter().fold(BTreeMap::new(), |mut acc, (sku, qty)| {
        *acc.entry(sku).or_insert(0) += qty;
        acc
    })
}

fn digest(set: &BTreeMap<&Sku, u32>) -> String {
    let canonical = set.iter().map(|(sku, qty)| format!("{sku}:{qty}")).collect::<Vec<_>>().join("|");
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

impl CombinationStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self { Self { store } }

    /// Order-independent hash over (sku, quantity) only; price and name never
    /// contribute.
    pub fn hash(items: &[OrderItem]) -> String {
        digest(&multiset(items.iter().map(|i| (&i.sku, i.quantity))))
    }

    pub fn hash_pairs(items: &[CombinationItem]) -> String {
        digest(&multiset(items.iter().map(|i| (&i.sku, i.quantity))))
    }

    /// A miss (or an inactive record) is `None`, not an error.
    pub async fn find(&self, items: &[OrderItem]) -> StoreResult<Option<VerifiedCombination>> {
        let hash = Self::hash(items);
        let found: Option<VerifiedCombination> = fetch(self.store.as_ref(), collections::COMBINATIONS, &hash).await?;
        match found {
            Some(c) if c.is_active => Ok(Some(c)),
            Some(_) => {
                debug!(combination_hash = %hash, "Combination is inactive, treating as unknown");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn save(
        &self,
        items: Vec<CombinationItem>,
        weight: Decimal,
        dimensions: Dimensions,
        verified_by: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<VerifiedCombination> {
        if items.is_empty() || items.iter().any(|i| i.quantity == 0) {
            return Err(ServiceError::validation("Combination needs at least one item with quantity >= 1", json!({"field": "items"})));
        }
        if weight <= Decimal::ZERO {
            return Err(ServiceError::validation("Weight must be greater than zero", json!({"field": "weight"})));
        }
        if !dimensions.is_positive() {
            return Err(ServiceError::validation("Each dimension must be greater than zero", json!({"field": "dimensions"})));
        }

        let set = multiset(items.iter().map(|i| (&i.sku, i.quantity)));
        let hash = digest(&set);
        let normalized: Vec<CombinationItem> = set.iter().map(|(sku, qty)| CombinationItem { sku: (*sku).clone(), quantity: *qty }).collect();
        let existing: Option<VerifiedCombination> = fetch(self.store.as_ref(), collections::COMBINATIONS, &hash).await?;

        let record = VerifiedCombination {
            combination_hash: hash.clone(),
            total_items: normalized.iter().map(|i| i.quantity).sum(),
            unique_products: normalized.len() as u32,
            items: normalized,
            weight,
            dimensions,
            verified_by: verified_by.to_string(),
            verified_at: now,
            notes,
            usage_count: existing.as_ref().map(|e| e.usage_count).unwrap_or(0),
            last_used_at: existing.as_ref().and_then(|e| e.last_used_at),
            is_active: true,
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
        };
        put(self.store.as_ref(), collections::COMBINATIONS, &hash, &record).await?;
        info!(combination_hash = %hash, verified_by, "Saved verified combination");
        Ok(record)
    }

    /// Best-effort: bumps the usage counter atomically and never fails the caller.
    pub async fn record_usage(&self, hash: &str, now: DateTime<Utc>) {
        let ops = [FieldUpdate::increment("usageCount", 1), FieldUpdate::set("lastUsedAt", json!(now))];
        if let Err(e) = self.store.update(collections::COMBINATIONS, hash, &ops).await {
            warn!(combination_hash = %hash, error = %e, "Failed to record combination usage");
        }
    }
}
