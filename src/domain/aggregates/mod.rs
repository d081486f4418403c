//! Aggregates module
pub mod order;
pub mod coupon;
pub mod combination;
pub mod customer;
pub mod product;

pub use order::{
    Approval, ApprovalStatus, CouponDetails, CustomerInfo, InternalStatus, Order, OrderError, OrderItem, OrderSource,
    PaymentInfo, PaymentMethod, PaymentStatus, PricingInfo, ShippingAddress,
};
pub use coupon::{ApplicableUsers, Coupon, CouponType, CouponUsage, UsageType};
pub use combination::{CombinationItem, VerifiedCombination};
pub use customer::{Customer, LoyaltyTier};
pub use product::{Product, ProductStatus, Variation};
