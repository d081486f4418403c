//! Customer registry keyed by normalised phone, plus the customer-facing
//! order projection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::{Customer, LoyaltyTier, Order, ShippingAddress};
use crate::domain::value_objects::Phone;
use crate::store::{collections, fetch, DocumentStore, FieldUpdate, StoreError, StoreResult};

#[async_trait]
pub trait CustomerRegistry: Send + Sync {
    /// Creates the customer on first sight, otherwise refreshes contact details.
    async fn upsert(
        &self,
        phone: &Phone,
        name: &str,
        email: Option<&str>,
        address: Option<&ShippingAddress>,
        now: DateTime<Utc>,
    ) -> StoreResult<Customer>;

    /// Rolls a persisted order into the customer's totals and tier.
    async fn record_order(&self, order: &Order) -> StoreResult<()>;

    /// Writes `customer_orders/{orderId}`.
    async fn project_order(&self, order: &Order) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct StoreCustomerRegistry {
    store: Arc<dyn DocumentStore>,
}

impl StoreCustomerRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self { Self { store } }

    /// Contact fields only. Order counters and tier belong to `record_order`'s
    /// atomic increments and are never written back from a read.
    async fn write_contact(&self, customer: &Customer) -> StoreResult<()> {
        let ops = [
            FieldUpdate::set("name", customer.name.as_str()),
            FieldUpdate::set("email", json!(customer.email)),
            FieldUpdate::set("addresses", serde_json::to_value(&customer.addresses)?),
            FieldUpdate::set("updatedAt", json!(customer.updated_at)),
        ];
        self.store.update(collections::CUSTOMERS, customer.phone.as_str(), &ops).await
    }
}

#[async_trait]
impl CustomerRegistry for StoreCustomerRegistry {
    async fn upsert(
        &self,
        phone: &Phone,
        name: &str,
        email: Option<&str>,
        address: Option<&ShippingAddress>,
        now: DateTime<Utc>,
    ) -> StoreResult<Customer> {
        if let Some(mut existing) = fetch::<Customer>(self.store.as_ref(), collections::CUSTOMERS, phone.as_str()).await? {
            existing.merge_contact(name, email, address, now);
            self.write_contact(&existing).await?;
            return Ok(existing);
        }

        let mut customer = Customer::new(Uuid::new_v4().to_string(), phone.clone(), name.trim(), now);
        customer.merge_contact(name, email, address, now);
        match self.store.create(collections::CUSTOMERS, phone.as_str(), serde_json::to_value(&customer)?).await {
            Ok(()) => {
                debug!(customer_id = %customer.customer_id, "Created customer");
                Ok(customer)
            }
            // lost a race with a concurrent first order from the same phone
            Err(StoreError::AlreadyExists { .. }) => {
                let mut existing: Customer = fetch(self.store.as_ref(), collections::CUSTOMERS, phone.as_str())
                    .await?
                    .ok_or_else(|| StoreError::NotFound { collection: collections::CUSTOMERS.into(), id: phone.to_string() })?;
                existing.merge_contact(name, email, address, now);
                self.write_contact(&existing).await?;
                Ok(existing)
            }
            Err(e) => Err(e),
        }
    }

    async fn record_order(&self, order: &Order) -> StoreResult<()> {
        let id = order.customer_info.phone.as_str();
        let ops = [
            FieldUpdate::increment("totalOrders", 1),
            FieldUpdate::increment("totalSpent", order.grand_total()),
            FieldUpdate::set("lastOrderAt", json!(order.created_at)),
            FieldUpdate::set("updatedAt", json!(order.created_at)),
        ];
        self.store.update(collections::CUSTOMERS, id, &ops).await?;

        // tier follows the post-increment total
        if let Some(customer) = fetch::<Customer>(self.store.as_ref(), collections::CUSTOMERS, id).await? {
            let tier = LoyaltyTier::for_spend(customer.total_spent);
            if tier != customer.loyalty_tier {
                self.store.update(collections::CUSTOMERS, id, &[FieldUpdate::set("loyaltyTier", tier.as_str())]).await?;
                debug!(customer_id = %customer.customer_id, tier = tier.as_str(), "Loyalty tier changed");
            }
        }
        Ok(())
    }

    async fn project_order(&self, order: &Order) -> StoreResult<()> {
        let doc = json!({
            "orderId": order.order_id,
            "customerId": order.customer_id,
            "phone": order.customer_info.phone,
            "status": order.internal_status.as_str(),
            "statusLabel": order.internal_status.display_name(),
            "totalAmount": order.grand_total(),
            "itemCount": order.item_count(),
            "createdAt": order.created_at,
        });
        self.store.set(collections::CUSTOMER_ORDERS, &order.order_id, doc).await
    }
}
