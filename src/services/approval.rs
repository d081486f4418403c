//! Initial approval decision and the asynchronous auto-approval pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::aggregates::{Approval, ApprovalStatus, InternalStatus, PaymentMethod, PaymentStatus};
use crate::domain::events::OrderEvent;
use crate::services::notifications::Notifier;
use crate::store::{collections, lookup, DocumentStore, FieldUpdate, StoreResult};

pub const AUTO_APPROVER_IDENTITY: &str = "system:auto-approval";

/// Status fields an order is persisted with.
#[derive(Clone, Debug, PartialEq)]
pub struct InitialStatus {
    pub internal_status: InternalStatus,
    pub approval: Approval,
    pub payment_status: PaymentStatus,
}

impl InitialStatus {
    /// Only `created_pending` orders go through auto-approval.
    pub fn needs_auto_approval(&self) -> bool { self.internal_status == InternalStatus::CreatedPending }
}

pub struct ApprovalDecider;

impl ApprovalDecider {
    /// Unknown parcel beats everything; a prepaid order with a known parcel
    /// is approved on the spot; the rest waits for auto-approval.
    pub fn decide(needs_manual_verification: bool, payment_method: PaymentMethod, actor: &str, now: DateTime<Utc>) -> InitialStatus {
        if needs_manual_verification {
            return InitialStatus {
                internal_status: InternalStatus::NeedsManualVerification,
                approval: Approval::default(),
                payment_status: PaymentStatus::Pending,
            };
        }
        match payment_method {
            PaymentMethod::Prepaid => InitialStatus {
                internal_status: InternalStatus::Approved,
                approval: Approval { status: ApprovalStatus::Approved, approved_by: Some(actor.to_string()), approved_at: Some(now) },
                payment_status: PaymentStatus::Completed,
            },
            PaymentMethod::Cod => InitialStatus {
                internal_status: InternalStatus::CreatedPending,
                approval: Approval::default(),
                payment_status: PaymentStatus::Pending,
            },
        }
    }
}

/// What the auto-approver knew at creation time.
#[derive(Clone, Debug, PartialEq)]
pub struct AutoApprovalRequest {
    pub order_id: String,
    pub grand_total: Decimal,
    pub customer_prior_orders: u64,
    pub customer_since: Option<DateTime<Utc>>,
    pub dimensions_known: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutoApprovalOutcome {
    Approved,
    Held(String),
    /// The order left `created_pending` before the pass ran.
    Skipped,
}

#[async_trait]
pub trait AutoApprover: Send + Sync {
    async fn run(&self, request: AutoApprovalRequest) -> StoreResult<AutoApprovalOutcome>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct AutoApprovalRules {
    pub enabled: bool,
    pub max_order_value: Decimal,
    pub min_customer_age_days: i64,
    pub allow_new_customers: bool,
    pub require_dimensions: bool,
}

impl Default for AutoApprovalRules {
    fn default() -> Self {
        Self {
            enabled: true,
            max_order_value: Decimal::from(5_000),
            min_customer_age_days: 0,
            allow_new_customers: true,
            require_dimensions: true,
        }
    }
}

impl AutoApprovalRules {
    /// `Err` carries the hold reason shown to operators.
    pub fn evaluate(&self, request: &AutoApprovalRequest, now: DateTime<Utc>) -> Result<(), String> {
        if !self.enabled {
            return Err("Auto-approval is disabled".to_string());
        }
        if request.grand_total > self.max_order_value {
            return Err(format!("Order value ₹{} exceeds auto-approval limit ₹{}", request.grand_total, self.max_order_value));
        }
        if self.require_dimensions && !request.dimensions_known {
            return Err("Parcel weight and dimensions are not verified".to_string());
        }
        if request.customer_prior_orders == 0 && !self.allow_new_customers {
            return Err("First orders need manual approval".to_string());
        }
        let age_days = request.customer_since.map(|since| (now - since).num_days()).unwrap_or(0);
        if age_days < self.min_customer_age_days {
            return Err(format!("Customer account is younger than {} days", self.min_customer_age_days));
        }
        Ok(())
    }
}

pub struct ThresholdAutoApprover {
    store: Arc<dyn DocumentStore>,
    rules: AutoApprovalRules,
    notifier: Arc<dyn Notifier>,
}

impl ThresholdAutoApprover {
    pub fn new(store: Arc<dyn DocumentStore>, rules: AutoApprovalRules, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, rules, notifier }
    }

    async fn still_pending(&self, order_id: &str) -> StoreResult<bool> {
        let doc = self.store.get(collections::ORDERS, order_id).await?;
        Ok(doc
            .as_ref()
            .and_then(|d| lookup(d, "internalStatus"))
            .and_then(|s| s.as_str())
            .is_some_and(|s| s == InternalStatus::CreatedPending.as_str()))
    }

    async fn announce(&self, event: OrderEvent) {
        if let Err(e) = self.notifier.publish(&event).await {
            warn!(order_id = %event.order_id(), error = %e, "Failed to publish auto-approval event");
        }
    }
}

#[async_trait]
impl AutoApprover for ThresholdAutoApprover {
    async fn run(&self, request: AutoApprovalRequest) -> StoreResult<AutoApprovalOutcome> {
        let now = Utc::now();
        // Not a compare-and-set: an operator acting between this read and the
        // update below can still be overwritten.
        if !self.still_pending(&request.order_id).await? {
            debug!(order_id = %request.order_id, "Order no longer pending, skipping auto-approval");
            return Ok(AutoApprovalOutcome::Skipped);
        }

        match self.rules.evaluate(&request, now) {
            Ok(()) => {
                let ops = [
                    FieldUpdate::set("internalStatus", InternalStatus::Approved.as_str()),
                    FieldUpdate::set("approval.status", "approved"),
                    FieldUpdate::set("approval.approvedBy", AUTO_APPROVER_IDENTITY),
                    FieldUpdate::set("approval.approvedAt", json!(now)),
                    FieldUpdate::set("autoApproval", json!({"decision": "approved", "evaluatedAt": now})),
                    FieldUpdate::set("updatedAt", json!(now)),
                ];
                self.store.update(collections::ORDERS, &request.order_id, &ops).await?;

                let projection = [
                    FieldUpdate::set("status", InternalStatus::Approved.as_str()),
                    FieldUpdate::set("statusLabel", InternalStatus::Approved.display_name()),
                ];
                if let Err(e) = self.store.update(collections::CUSTOMER_ORDERS, &request.order_id, &projection).await {
                    warn!(order_id = %request.order_id, error = %e, "Failed to refresh customer order projection");
                }

                info!(order_id = %request.order_id, "Order auto-approved");
                self.announce(OrderEvent::AutoApproved { order_id: request.order_id.clone() }).await;
                Ok(AutoApprovalOutcome::Approved)
            }
            Err(reason) => {
                let ops = [
                    FieldUpdate::set("autoApproval", json!({"decision": "held", "reason": reason, "evaluatedAt": now})),
                    FieldUpdate::set("updatedAt", json!(now)),
                ];
                self.store.update(collections::ORDERS, &request.order_id, &ops).await?;
                info!(order_id = %request.order_id, reason = %reason, "Order held for manual approval");
                self.announce(OrderEvent::AutoApprovalHeld { order_id: request.order_id.clone(), reason: reason.clone() }).await;
                Ok(AutoApprovalOutcome::Held(reason))
            }
        }
    }
}
