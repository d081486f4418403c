//! Order event publication.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::domain::events::OrderEvent;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification timed out after {0:?}")]
    Timeout(Duration),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), NotifyError>;
}

/// Publishes each event as JSON on `{prefix}.{event name}`.
#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
    timeout: Duration,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self { client, prefix: prefix.into(), timeout }
    }

    pub fn subject(&self, event: &OrderEvent) -> String { format!("{}.{}", self.prefix, event.name()) }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(&self, event: &OrderEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(event)?;
        let subject = self.subject(event);
        tokio::time::timeout(self.timeout, self.client.publish(subject, payload.into()))
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))?
            .map_err(|e| NotifyError::Publish(e.to_string()))
    }
}

/// Used when no broker is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, event: &OrderEvent) -> Result<(), NotifyError> {
        info!(order_id = %event.order_id(), event = event.name(), payload = %serde_json::to_string(event)?, "Order event");
        Ok(())
    }
}
