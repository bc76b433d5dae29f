//! Billing engine configuration
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `BILLING` prefix and
//! nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use billing_engine::config::BillingConfig;
//!
//! let config = BillingConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod database;
mod error;
mod notify;
mod payment;
mod runtime;
mod scheduler;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use notify::NotifyConfig;
pub use payment::{P24Credentials, PayPalCredentials, PaymentConfig, StripeCredentials};
pub use runtime::{Environment, RuntimeConfig};
pub use scheduler::SchedulerConfig;

use serde::Deserialize;

/// Root configuration for the billing worker.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// PostgreSQL connection
    pub database: DatabaseConfig,

    /// Provider credentials and checkout settings
    #[serde(default)]
    pub payment: PaymentConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

impl BillingConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` if present (development)
    /// 2. Reads variables with the `BILLING` prefix
    /// 3. Uses `__` to separate nested values
    ///
    /// - `BILLING__DATABASE__URL=...` -> `database.url = ...`
    /// - `BILLING__SCHEDULER__INTERVAL_SECS=60` -> `scheduler.interval_secs = 60`
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("BILLING")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate every section.
    ///
    /// Missing provider credentials are not an error; that provider is
    /// simply unavailable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.payment.validate()?;
        self.scheduler.validate()?;
        self.notify.validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.runtime.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Env vars are process-global; tests touching them run one at a time.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "BILLING__DATABASE__URL",
        "BILLING__RUNTIME__ENVIRONMENT",
        "BILLING__SCHEDULER__INTERVAL_SECS",
        "BILLING__PAYMENT__STRIPE_API_KEY",
        "BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET",
    ];

    fn set_minimal_env() {
        env::set_var("BILLING__DATABASE__URL", "postgresql://test@localhost/billing");
    }

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = BillingConfig::load();
        clear_env();

        let config = result.expect("config loads");
        assert_eq!(config.database.url, "postgresql://test@localhost/billing");
        assert_eq!(config.payment.default_currency, "PLN");
        assert_eq!(config.scheduler.interval_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nested_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("BILLING__RUNTIME__ENVIRONMENT", "production");
        env::set_var("BILLING__SCHEDULER__INTERVAL_SECS", "60");
        let result = BillingConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.is_production());
        assert_eq!(config.scheduler.interval_secs, 60);
    }

    #[test]
    fn test_provider_credentials_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("BILLING__PAYMENT__STRIPE_API_KEY", "sk_test_abc");
        env::set_var("BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET", "whsec_abc");
        let result = BillingConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.payment.stripe().is_some());
        assert!(config.payment.paypal().is_none());
    }

    #[test]
    fn test_missing_database_url_fails() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert!(BillingConfig::load().is_err());
    }
}
