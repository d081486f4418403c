//! PostgreSQL backend: one JSONB table keyed by (collection, id).

use super::{CounterRef, Document, DocumentStore, FieldUpdate, FilterOp, Query, StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder, Row};

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

fn path_of(field: &str) -> Vec<String> {
    field.split('.').map(str::to_string).collect()
}

fn filter_operator(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => " = ",
        FilterOp::Gt => " > ",
        FilterOp::Gte => " >= ",
        FilterOp::Lt => " < ",
        FilterOp::Lte => " <= ",
        FilterOp::In => " <@ ",
    }
}

/// Pushes `jsonb_set(... jsonb_set(data, ...) ...)` for every op. Parents of
/// a dotted path must already exist; only the leaf key is created.
fn push_updates(qb: &mut QueryBuilder<'_, Postgres>, ops: &[FieldUpdate]) {
    for _ in ops {
        qb.push("jsonb_set(");
    }
    qb.push("data");
    for op in ops {
        match op {
            FieldUpdate::Set(path, value) => {
                qb.push(", ").push_bind(path_of(path)).push(", ").push_bind(value.clone()).push(", true)");
            }
            FieldUpdate::Increment(path, by) => {
                qb.push(", ")
                    .push_bind(path_of(path))
                    .push(", to_jsonb(COALESCE((data #>> ")
                    .push_bind(path_of(path))
                    .push(")::numeric, 0) + ")
                    .push_bind(by.to_string())
                    .push("::numeric), true)");
            }
        }
    }
}

impl PgDocumentStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query("SELECT data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<Value, _>("data")).transpose()?)
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO documents (collection, id, data, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (collection, id) DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()",
        )
        .bind(collection)
        .bind(id)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        let done = sqlx::query(
            "INSERT INTO documents (collection, id, data, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(collection)
        .bind(id)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists { collection: collection.to_string(), id: id.to_string() });
        }
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id, data FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        for f in &query.filters {
            // `scalar <@ array` holds when the array contains the scalar
            let value = match (f.op, &f.value) {
                (FilterOp::In, Value::Array(_)) => f.value.clone(),
                (FilterOp::In, single) => Value::Array(vec![single.clone()]),
                (_, value) => value.clone(),
            };
            qb.push(" AND (data #> ")
                .push_bind(path_of(&f.field))
                .push(")")
                .push(filter_operator(f.op))
                .push_bind(value);
        }
        if let Some(order) = &query.order_by {
            qb.push(" ORDER BY data #> ")
                .push_bind(path_of(&order.field))
                .push(if order.descending { " DESC NULLS LAST" } else { " ASC NULLS LAST" });
        }
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| -> StoreResult<Document> { Ok(Document { id: row.try_get("id")?, data: row.try_get("data")? }) })
            .collect()
    }

    async fn update(&self, collection: &str, id: &str, ops: &[FieldUpdate]) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE documents SET data = ");
        push_updates(&mut qb, ops);
        qb.push(", updated_at = NOW() WHERE collection = ")
            .push_bind(collection.to_string())
            .push(" AND id = ")
            .push_bind(id.to_string());
        let done = qb.build().execute(&self.pool).await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound { collection: collection.to_string(), id: id.to_string() });
        }
        Ok(())
    }

    async fn create_with_increment(&self, collection: &str, id: &str, doc: Value, counter: &CounterRef) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO documents (collection, id, data, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(collection)
        .bind(id)
        .bind(doc)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE documents SET data = ");
        push_updates(&mut qb, &[FieldUpdate::increment(&counter.field, counter.by)]);
        qb.push(", updated_at = NOW() WHERE collection = ")
            .push_bind(counter.collection.clone())
            .push(" AND id = ")
            .push_bind(counter.id.clone());
        let bumped = qb.build().execute(&mut *tx).await?;
        if bumped.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound { collection: counter.collection.clone(), id: counter.id.clone() });
        }
        tx.commit().await?;
        Ok(true)
    }
}
