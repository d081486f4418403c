//! Customer Aggregate, keyed by normalised phone

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::order::ShippingAddress;
use crate::domain::value_objects::Phone;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier { #[default] Bronze, Silver, Gold, Platinum }

impl LoyaltyTier {
    pub fn for_spend(total_spent: Decimal) -> Self {
        match total_spent {
            s if s >= Decimal::from(50_000) => Self::Platinum,
            s if s >= Decimal::from(20_000) => Self::Gold,
            s if s >= Decimal::from(5_000) => Self::Silver,
            _ => Self::Bronze,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self { Self::Bronze => "bronze", Self::Silver => "silver", Self::Gold => "gold", Self::Platinum => "platinum" }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub customer_id: String,
    pub phone: Phone,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub addresses: Vec<ShippingAddress>,
    #[serde(default)]
    pub total_orders: u64,
    #[serde(default)]
    pub total_spent: Decimal,
    #[serde(default)]
    pub loyalty_tier: LoyaltyTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_order_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn new(customer_id: impl Into<String>, phone: Phone, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            customer_id: customer_id.into(), phone, name: name.into(), email: None, addresses: vec![],
            total_orders: 0, total_spent: Decimal::ZERO, loyalty_tier: LoyaltyTier::Bronze,
            created_at: now, updated_at: now, last_order_at: None,
        }
    }

    pub fn is_new(&self) -> bool { self.total_orders == 0 }

    /// Refreshes contact details; remembers an address the customer has not used before.
    pub fn merge_contact(&mut self, name: &str, email: Option<&str>, address: Option<&ShippingAddress>, now: DateTime<Utc>) {
        if !name.trim().is_empty() { self.name = name.trim().to_string(); }
        if let Some(email) = email { self.email = Some(email.to_string()); }
        if let Some(address) = address {
            if !self.addresses.contains(address) { self.addresses.push(address.clone()); }
        }
        self.updated_at = now;
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 { (now - self.created_at).num_days() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_loyalty_tiers() {
        assert_eq!(LoyaltyTier::for_spend(dec!(0)), LoyaltyTier::Bronze);
        assert_eq!(LoyaltyTier::for_spend(dec!(5000)), LoyaltyTier::Silver);
        assert_eq!(LoyaltyTier::for_spend(dec!(19999.99)), LoyaltyTier::Silver);
        assert_eq!(LoyaltyTier::for_spend(dec!(20000)), LoyaltyTier::Gold);
        assert_eq!(LoyaltyTier::for_spend(dec!(75000)), LoyaltyTier::Platinum);
    }

    #[test]
    fn test_merge_contact_dedupes_addresses() {
        let now = Utc::now();
        let mut c = Customer::new("C1", Phone::parse("9876543210").unwrap(), "A", now);
        let addr = ShippingAddress { line1: "1 MG Road".into(), city: "Pune".into(), state: "MH".into(), pincode: "411001".into(), ..Default::default() };
        c.merge_contact("Asha ", Some("asha@example.com"), Some(&addr), now);
        c.merge_contact("", None, Some(&addr), now);
        assert_eq!(c.name, "Asha");
        assert_eq!(c.addresses.len(), 1);
        assert!(c.is_new());
    }
}
