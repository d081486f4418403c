//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use crate::domain::aggregates::{InternalStatus, OrderSource};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    #[serde(rename_all = "camelCase")]
    Placed {
        order_id: String,
        order_source: OrderSource,
        customer_name: String,
        customer_phone: String,
        grand_total: Decimal,
        item_count: u32,
        internal_status: InternalStatus,
    },
    #[serde(rename_all = "camelCase")]
    ManualVerificationRequired { order_id: String, combination_hash: String },
    #[serde(rename_all = "camelCase")]
    AutoApproved { order_id: String },
    #[serde(rename_all = "camelCase")]
    AutoApprovalHeld { order_id: String, reason: String },
}

impl OrderEvent {
    pub fn order_id(&self) -> &str {
        match self {
            Self::Placed { order_id, .. }
            | Self::ManualVerificationRequired { order_id, .. }
            | Self::AutoApproved { order_id }
            | Self::AutoApprovalHeld { order_id, .. } => order_id,
        }
    }

    /// Subject suffix used when publishing.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "placed",
            Self::ManualVerificationRequired { .. } => "manual_verification_required",
            Self::AutoApproved { .. } => "auto_approved",
            Self::AutoApprovalHeld { .. } => "auto_approval_held",
        }
    }
}
