//! OrderDesk - order pricing, coupon validation and approval service

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orderdesk::api::{self, AppState};
use orderdesk::config::AppConfig;
use orderdesk::services::orders::{Collaborators, OrderService};
use orderdesk::services::{LogNotifier, NatsNotifier, Notifier};
use orderdesk::store::{DocumentStore, InMemoryStore, PgDocumentStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            let pg = PgDocumentStore::connect(url, config.database_max_connections).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set, documents live in memory only");
            Arc::new(InMemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Arc::new(NatsNotifier::new(client, config.nats_subject_prefix.clone(), config.notification_timeout)),
            Err(e) => {
                warn!(error = %e, "NATS unavailable, order events will only be logged");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    };

    if config.tokens.is_empty() {
        warn!("No API tokens configured; staff endpoints will reject every request");
    }

    let orders = OrderService::new(Collaborators::from_config(store, &config, notifier));
    let app = api::router(AppState::new(orders, config.tokens.clone()));

    info!("🚀 OrderDesk listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
