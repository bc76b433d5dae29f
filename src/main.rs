//! billing-worker - runs the renewal scheduler against the billing store.
//!
//! Request handling (checkout, webhooks, queries) is hosted by the
//! embedding service through the library API; this binary owns the
//! time-based side of the subscription lifecycle.

use std::sync::Arc;

use billing_engine::adapters::postgres::{
    create_pool, run_migrations, PostgresPlanCatalog, PostgresSchedulerLease, PostgresSubscriptionRepository,
    PostgresTransactionRepository,
};
use billing_engine::adapters::{HttpNotifier, LoggingNotifier, ProviderRegistry};
use billing_engine::application::{RenewalScheduler, RenewalSchedulerConfig, SubscriptionLifecycle};
use billing_engine::config::{BillingConfig, RuntimeConfig};
use billing_engine::ports::Notifier;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Configuration
    let config = BillingConfig::load()?;
    config.validate()?;

    // 2. Logging
    init_tracing(&config.runtime);
    tracing::info!(environment = ?config.runtime.environment, "Starting billing worker");

    // 3. Store
    let pool = create_pool(&config.database).await?;
    if config.database.run_migrations {
        run_migrations(&pool).await?;
    }

    // 4. Providers
    let registry = ProviderRegistry::from_config(&config.payment)?;
    let available: Vec<_> = registry.available().iter().map(|p| p.as_str()).collect();
    tracing::info!(providers = ?available, "Payment providers configured");

    // 5. Notifications
    let notifier: Arc<dyn Notifier> = match HttpNotifier::from_config(&config.notify)? {
        Some(http) => Arc::new(http),
        None => {
            tracing::warn!("No notification service configured; notifications are logged only");
            Arc::new(LoggingNotifier::new())
        }
    };

    // 6. Scheduler
    let subscriptions = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let lifecycle = Arc::new(SubscriptionLifecycle::new(
        Arc::new(PostgresPlanCatalog::new(pool.clone())),
        subscriptions.clone(),
        Arc::new(PostgresTransactionRepository::new(pool.clone())),
        notifier.clone(),
    ));

    if !config.scheduler.enabled {
        tracing::warn!("Renewal scheduler disabled; nothing to do");
        return Ok(());
    }

    let scheduler = Arc::new(RenewalScheduler::new(
        lifecycle,
        subscriptions,
        Arc::new(PostgresSchedulerLease::new(pool.clone())),
        notifier,
        RenewalSchedulerConfig::from(&config.scheduler),
    ));
    scheduler.start().await?;

    // 7. Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scheduler.stop().await;
    pool.close().await;

    Ok(())
}

fn init_tracing(runtime: &RuntimeConfig) {
    let filter = EnvFilter::try_new(&runtime.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if runtime.use_json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
