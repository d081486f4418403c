//! Document store port
//!
//! Every collaborator in the order pipeline reads and writes JSON documents
//! grouped into named collections. The trait below is the whole contract the
//! pipeline relies on; `memory` and `postgres` provide the two backends.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use postgres::PgDocumentStore;

pub mod collections {
    pub const ORDERS: &str = "orders";
    pub const COUPONS: &str = "coupons";
    pub const COUPON_USAGES: &str = "coupon_usages";
    pub const COMBINATIONS: &str = "verified_combinations";
    pub const CUSTOMERS: &str = "customers";
    pub const CUSTOMER_ORDERS: &str = "customer_orders";
    pub const PRODUCTS: &str = "products";
    pub const IDEMPOTENCY_KEYS: &str = "idempotency_keys";
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp { Eq, Gt, Gte, Lt, Lte, In }

#[derive(Clone, Debug)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Clone, Debug)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A filtered, ordered, bounded scan over one collection.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self { Self::default() }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter { field: field.to_string(), op, value: value.into() });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self { self.filter(field, FilterOp::Eq, value) }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(OrderBy { field: field.to_string(), descending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A single field mutation applied as part of an atomic `update`.
#[derive(Clone, Debug)]
pub enum FieldUpdate {
    Set(String, Value),
    Increment(String, Decimal),
}

impl FieldUpdate {
    pub fn set(path: &str, value: impl Into<Value>) -> Self { Self::Set(path.to_string(), value.into()) }
    pub fn increment(path: &str, by: impl Into<Decimal>) -> Self { Self::Increment(path.to_string(), by.into()) }
}

/// Counter bumped by `create_with_increment` when its document is inserted.
#[derive(Clone, Debug)]
pub struct CounterRef {
    pub collection: String,
    pub id: String,
    pub field: String,
    pub by: i64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Upserts the whole document.
    async fn set(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;

    /// Inserts the document, failing with `AlreadyExists` if the id is taken.
    async fn create(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// Applies every op to one document atomically.
    async fn update(&self, collection: &str, id: &str, ops: &[FieldUpdate]) -> StoreResult<()>;

    /// Inserts `doc` if absent and, only in that case, bumps `counter` in the
    /// same atomic step. Returns whether the insert happened.
    async fn create_with_increment(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
        counter: &CounterRef,
    ) -> StoreResult<bool>;
}

pub async fn fetch<T: DeserializeOwned>(store: &dyn DocumentStore, collection: &str, id: &str) -> StoreResult<Option<T>> {
    match store.get(collection, id).await? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

pub async fn put<T: Serialize>(store: &dyn DocumentStore, collection: &str, id: &str, doc: &T) -> StoreResult<()> {
    store.set(collection, id, serde_json::to_value(doc)?).await
}

/// Resolves a dotted path such as `approval.status` inside a document.
pub(crate) fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |cur, key| cur.get(key))
}

/// Ordering used by both backends' filter semantics: numbers numerically,
/// strings lexically, booleans false < true. Mixed kinds do not compare.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

pub(crate) fn matches(doc: &Value, filter: &Filter) -> bool {
    let Some(actual) = lookup(doc, &filter.field) else { return false };
    if filter.op == FilterOp::In {
        return filter
            .value
            .as_array()
            .map(|candidates| candidates.iter().any(|c| compare_values(actual, c) == Some(Ordering::Equal)))
            .unwrap_or(false);
    }
    let ord = compare_values(actual, &filter.value);
    match filter.op {
        FilterOp::Eq => ord == Some(Ordering::Equal),
        FilterOp::Gt => ord == Some(Ordering::Greater),
        FilterOp::Gte => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => ord == Some(Ordering::Less),
        FilterOp::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        FilterOp::In => false,
    }
}
