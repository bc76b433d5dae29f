//! PostgreSQL adapters - sqlx implementations of the store ports.
//!
//! - `PostgresPlanCatalog` - Plan lookup
//! - `PostgresSubscriptionRepository` - Subscription rows; one live row per user
//! - `PostgresTransactionRepository` - Monetary ledger
//! - `PostgresWebhookLedger` - Idempotent webhook store
//! - `PostgresFeatureOverrideRepository` - Feature grants and denials
//! - `PostgresSchedulerLease` - Advisory lease for the renewal scheduler
//!
//! The schema lives in `migrations/` and is applied by [`run_migrations`].

mod feature_override_repository;
mod plan_catalog;
mod pool;
mod scheduler_lease;
mod subscription_repository;
mod transaction_repository;
mod webhook_ledger;

pub use feature_override_repository::PostgresFeatureOverrideRepository;
pub use plan_catalog::PostgresPlanCatalog;
pub use pool::{create_pool, run_migrations};
pub use scheduler_lease::PostgresSchedulerLease;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use transaction_repository::PostgresTransactionRepository;
pub use webhook_ledger::PostgresWebhookLedger;
