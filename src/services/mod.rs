//! Application services: the collaborators the order pipeline is assembled from.

pub mod approval;
pub mod catalog;
pub mod combinations;
pub mod coupons;
pub mod customers;
pub mod notifications;
pub mod order_ids;
pub mod orders;
pub mod pricing;

pub use approval::{ApprovalDecider, AutoApprovalRequest, AutoApprovalRules, AutoApprover, InitialStatus, ThresholdAutoApprover};
pub use catalog::{ProductCatalog, StoreCatalog};
pub use combinations::CombinationStore;
pub use coupons::{CouponError, CouponRejection, CouponValidator};
pub use customers::{CustomerRegistry, StoreCustomerRegistry};
pub use notifications::{LogNotifier, NatsNotifier, Notifier, NotifyError};
pub use order_ids::{DailySequence, GlobalNumeric, OrderIdAllocator, SourceRoutedAllocator};
pub use orders::{CreateOrderInput, OrderCreated, OrderService};
pub use pricing::{PricingConfig, PricingEngine};
