//! Dropship Commerce service entry point

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropship_commerce::api::{router, AppState};
use dropship_commerce::gateway::StripeGateway;
use dropship_commerce::services::{LogChannel, NatsChannel, NotificationChannel, NotificationDispatcher, Services};
use dropship_commerce::store::{PgStore, Store};
use dropship_commerce::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let pg = PgStore::connect(&config.database_url, config.db_max_connections).await?;
    pg.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(pg);

    let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(LogChannel)];
    if let Some(url) = &config.nats_url {
        match async_nats::connect(url).await {
            Ok(client) => channels.push(Arc::new(NatsChannel::new(client))),
            Err(e) => tracing::warn!(error = %e, "NATS unavailable, notifications go to the log only"),
        }
    }
    let notifier = NotificationDispatcher::new(store.clone(), channels, config.notify_max_attempts, config.staff_email.clone());
    let gateway = Arc::new(StripeGateway::new(config.stripe.clone())?);
    let services = Services::new(store.clone(), gateway, notifier, &config);

    let port = config.port;
    let app = router(AppState { store, services, config: Arc::new(config) });
    tracing::info!("Dropship Commerce listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}
