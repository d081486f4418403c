//! Order id allocation.
//!
//! Two id shapes coexist: customer orders use a per-day `ORDddmmyy-NNNN`
//! sequence, admin and machine orders use a plain global number. Each policy
//! only scans orders of its own sources. Neither takes a lock, so two
//! concurrent requests can compute the same id; the orchestrator's `create`
//! write detects that and calls `reallocate`, which skips the scan. The
//! fallback ids are NOT guaranteed unique.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::aggregates::OrderSource;
use crate::store::{collections, DocumentStore, FilterOp, Query, StoreResult};

const DAY_MS: i64 = 86_400_000;
const RANDOM_SPAN: u32 = 95_000;
const GLOBAL_SOURCES: [&str; 2] = ["admin_form", "ai_agent"];

#[async_trait]
pub trait OrderIdAllocator: Send + Sync {
    /// Never fails: a store outage degrades to a best-effort id.
    async fn allocate(&self, source: OrderSource, now: DateTime<Utc>) -> String;

    /// Called after `allocate`'s id turned out to be taken. Repeating the
    /// scan would return the same id, so implementations should not.
    async fn reallocate(&self, source: OrderSource, now: DateTime<Utc>) -> String {
        self.allocate(source, now).await
    }
}

/// `ORD` + local `ddmmyy` + `-` + sequence, restarting at `base` each day.
#[derive(Clone)]
pub struct DailySequence {
    store: Arc<dyn DocumentStore>,
    offset: FixedOffset,
    base: u32,
    scan_window: usize,
}

impl DailySequence {
    pub fn new(store: Arc<dyn DocumentStore>, offset: FixedOffset, base: u32, scan_window: usize) -> Self {
        Self { store, offset, base, scan_window }
    }

    pub fn prefix(&self, now: DateTime<Utc>) -> String {
        format!("ORD{}-", now.with_timezone(&self.offset).format("%d%m%y"))
    }

    /// Start of the local calendar day containing `now`, in epoch millis.
    fn day_start_ms(&self, now: DateTime<Utc>) -> i64 {
        let local = now.with_timezone(&self.offset);
        let since_midnight = i64::from(local.num_seconds_from_midnight()) * 1000 + i64::from(local.timestamp_subsec_millis());
        now.timestamp_millis() - since_midnight
    }

    async fn highest_today(&self, prefix: &str, now: DateTime<Utc>) -> StoreResult<Option<u32>> {
        let start = self.day_start_ms(now);
        let query = Query::new()
            .eq("orderSource", OrderSource::CustomerApp.as_str())
            .filter("createdAtMs", FilterOp::Gte, start)
            .filter("createdAtMs", FilterOp::Lt, start + DAY_MS)
            .order_by("createdAtMs", true)
            .limit(self.scan_window);
        let docs = self.store.query(collections::ORDERS, &query).await?;
        Ok(docs.iter().filter_map(|d| d.id.strip_prefix(prefix)?.parse::<u32>().ok()).max())
    }

    fn random_sequence(&self) -> u32 {
        rand::thread_rng().gen_range(self.base..self.base + RANDOM_SPAN)
    }
}

#[async_trait]
impl OrderIdAllocator for DailySequence {
    async fn allocate(&self, _source: OrderSource, now: DateTime<Utc>) -> String {
        let prefix = self.prefix(now);
        let sequence = match self.highest_today(&prefix, now).await {
            Ok(Some(highest)) => (highest + 1).max(self.base),
            Ok(None) => self.base,
            Err(e) => {
                let fallback = self.random_sequence();
                warn!(error = %e, sequence = fallback, "Order id scan failed, using random sequence; uniqueness is not guaranteed");
                fallback
            }
        };
        debug!(order_id = %format!("{prefix}{sequence}"), "Allocated daily order id");
        format!("{prefix}{sequence}")
    }

    async fn reallocate(&self, _source: OrderSource, now: DateTime<Utc>) -> String {
        format!("{}{}", self.prefix(now), self.random_sequence())
    }
}

/// `max(numeric ids among the newest N admin and machine orders) + 1`.
/// Legacy non-numeric ids in the window are skipped.
#[derive(Clone)]
pub struct GlobalNumeric {
    store: Arc<dyn DocumentStore>,
    scan_window: usize,
}

impl GlobalNumeric {
    pub fn new(store: Arc<dyn DocumentStore>, scan_window: usize) -> Self { Self { store, scan_window } }

    async fn highest(&self) -> StoreResult<Option<u64>> {
        let query = Query::new()
            .filter("orderSource", FilterOp::In, serde_json::json!(GLOBAL_SOURCES))
            .order_by("createdAtMs", true)
            .limit(self.scan_window);
        let docs = self.store.query(collections::ORDERS, &query).await?;
        Ok(docs.iter().filter_map(|d| d.id.parse::<u64>().ok()).max())
    }
}

#[async_trait]
impl OrderIdAllocator for GlobalNumeric {
    async fn allocate(&self, _source: OrderSource, now: DateTime<Utc>) -> String {
        match self.highest().await {
            Ok(highest) => (highest.unwrap_or(0) + 1).to_string(),
            Err(e) => {
                let fallback = now.timestamp_millis().to_string();
                warn!(error = %e, order_id = %fallback, "Order id scan failed, using timestamp id; uniqueness is not guaranteed");
                fallback
            }
        }
    }

    /// Millisecond timestamp plus three random digits.
    async fn reallocate(&self, _source: OrderSource, now: DateTime<Utc>) -> String {
        format!("{}{:03}", now.timestamp_millis(), rand::thread_rng().gen_range(0..1000))
    }
}

/// Picks the id shape from the order's source.
#[derive(Clone)]
pub struct SourceRoutedAllocator {
    daily: DailySequence,
    global: GlobalNumeric,
}

impl SourceRoutedAllocator {
    pub fn new(daily: DailySequence, global: GlobalNumeric) -> Self { Self { daily, global } }
}

#[async_trait]
impl OrderIdAllocator for SourceRoutedAllocator {
    async fn allocate(&self, source: OrderSource, now: DateTime<Utc>) -> String {
        match source {
            OrderSource::CustomerApp => self.daily.allocate(source, now).await,
            OrderSource::AdminForm | OrderSource::AiAgent => self.global.allocate(source, now).await,
        }
    }

    async fn reallocate(&self, source: OrderSource, now: DateTime<Utc>) -> String {
        match source {
            OrderSource::CustomerApp => self.daily.reallocate(source, now).await,
            OrderSource::AdminForm | OrderSource::AiAgent => self.global.reallocate(source, now).await,
        }
    }
}
