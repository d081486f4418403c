//! Read-only product catalog port.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::aggregates::Product;
use crate::store::{collections, fetch, DocumentStore, StoreResult};

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, product_id: &str) -> StoreResult<Option<Product>>;
}

/// Catalog backed by the `products` collection.
#[derive(Clone)]
pub struct StoreCatalog {
    store: Arc<dyn DocumentStore>,
}

impl StoreCatalog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self { Self { store } }
}

#[async_trait]
impl ProductCatalog for StoreCatalog {
    async fn get_product(&self, product_id: &str) -> StoreResult<Option<Product>> {
        fetch(self.store.as_ref(), collections::PRODUCTS, product_id).await
    }
}
