//! In-process document store used for local runs and tests.

use super::{compare_values, lookup, matches, CounterRef, Document, DocumentStore, FieldUpdate, Query, StoreError, StoreResult};
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// Every operation takes the single write (or read) lock for its whole
/// duration, so multi-field updates and counters are atomic.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<Collections>,
    failing: Mutex<HashSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Makes every operation on `collection` fail with `Unavailable` until
    /// `restore` is called.
    pub fn fail_collection(&self, collection: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(collection.to_string());
        }
    }

    pub fn restore(&self, collection: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(collection);
        }
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.data.read().await.get(collection).map(BTreeMap::len).unwrap_or(0)
    }

    fn check(&self, collection: &str) -> StoreResult<()> {
        let failing = self.failing.lock().map_err(|_| StoreError::Unavailable("store lock poisoned".into()))?;
        if failing.contains(collection) {
            return Err(StoreError::Unavailable(format!("collection {collection} is unavailable")));
        }
        Ok(())
    }
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut cur = doc;
    let mut parts = path.split('.').peekable();
    while let Some(key) = parts.next() {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let Value::Object(map) = cur else { return };
        if parts.peek().is_none() {
            map.insert(key.to_string(), value);
            return;
        }
        cur = map.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

fn decimal_to_json(value: Decimal) -> Value {
    let value = value.normalize();
    if value.scale() == 0 {
        if let Some(i) = value.to_i64() {
            return Value::from(i);
        }
    }
    value.to_f64().map(Value::from).unwrap_or(Value::Null)
}

fn increment_path(doc: &mut Value, path: &str, by: Decimal) {
    let current = match lookup(doc, path) {
        Some(Value::Number(n)) => n.as_i64().map(Decimal::from).or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        _ => None,
    };
    set_path(doc, path, decimal_to_json(current.unwrap_or(Decimal::ZERO) + by));
}

fn apply(doc: &mut Value, op: &FieldUpdate) {
    match op {
        FieldUpdate::Set(path, value) => set_path(doc, path, value.clone()),
        FieldUpdate::Increment(path, by) => increment_path(doc, path, *by),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        self.check(collection)?;
        Ok(self.data.read().await.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        self.check(collection)?;
        self.data.write().await.entry(collection.to_string()).or_default().insert(id.to_string(), doc);
        Ok(())
    }

    async fn create(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        self.check(collection)?;
        let mut data = self.data.write().await;
        let docs = data.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists { collection: collection.to_string(), id: id.to_string() });
        }
        docs.insert(id.to_string(), doc);
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        self.check(collection)?;
        let data = self.data.read().await;
        let mut found: Vec<Document> = data
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| query.filters.iter().all(|f| matches(doc, f)))
                    .map(|(id, doc)| Document { id: id.clone(), data: doc.clone() })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            found.sort_by(|a, b| {
                let ord = match (lookup(&a.data, &order.field), lookup(&b.data, &order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if order.descending { ord.reverse() } else { ord }
            });
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn update(&self, collection: &str, id: &str, ops: &[FieldUpdate]) -> StoreResult<()> {
        self.check(collection)?;
        let mut data = self.data.write().await;
        let doc = data
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| StoreError::NotFound { collection: collection.to_string(), id: id.to_string() })?;
        ops.iter().for_each(|op| apply(doc, op));
        Ok(())
    }

    async fn create_with_increment(&self, collection: &str, id: &str, doc: Value, counter: &CounterRef) -> StoreResult<bool> {
        self.check(collection)?;
        self.check(&counter.collection)?;
        let mut data = self.data.write().await;
        if data.get(collection).is_some_and(|c| c.contains_key(id)) {
            return Ok(false);
        }
        let target = data
            .get_mut(&counter.collection)
            .and_then(|c| c.get_mut(&counter.id))
            .ok_or_else(|| StoreError::NotFound { collection: counter.collection.clone(), id: counter.id.clone() })?;
        increment_path(target, &counter.field, Decimal::from(counter.by));
        data.entry(collection.to_string()).or_default().insert(id.to_string(), doc);
        Ok(true)
    }
}
