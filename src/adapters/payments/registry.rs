//! Provider registry built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapters::paypal::{PayPalConfig, PayPalPaymentAdapter};
use crate::adapters::przelewy24::{P24Config, P24PaymentAdapter};
use crate::adapters::stripe::{StripeConfig, StripePaymentAdapter};
use crate::config::PaymentConfig;
use crate::domain::billing::{BillingError, ProviderKind};
use crate::ports::PaymentProvider;

use super::http::build_client;

/// The configured payment providers, keyed by kind.
///
/// Providers without credentials are left out; asking for one yields
/// [`BillingError::ProviderNotConfigured`] instead of a crash.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the provider for its kind.
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Builds every provider whose credentials are present.
    ///
    /// All adapters share one HTTP client bounded by `request_timeout_secs`.
    pub fn from_config(config: &PaymentConfig) -> Result<Self, BillingError> {
        let client = build_client(config.request_timeout())?;
        let mut registry = Self::new();

        if let Some(creds) = config.stripe() {
            let stripe = StripeConfig::new(creds.api_key, creds.webhook_secret)
                .with_require_livemode(config.stripe_require_livemode);
            registry.register(Arc::new(StripePaymentAdapter::new(stripe, client.clone())));
        }

        if let Some(creds) = config.paypal() {
            let plan_ids = config
                .paypal_plan_map()
                .map_err(|e| BillingError::Configuration(e.to_string()))?;
            let paypal = PayPalConfig::new(
                creds.client_id,
                creds.client_secret,
                creds.webhook_id,
                config.paypal_sandbox,
            )
            .with_plan_ids(plan_ids);
            registry.register(Arc::new(PayPalPaymentAdapter::new(paypal, client.clone())));
        }

        if let Some(creds) = config.p24() {
            let p24 = P24Config::new(
                creds.merchant_id,
                creds.pos_id,
                creds.crc,
                creds.api_key,
                config.p24_sandbox,
            )
            .with_app_url(config.app_url.clone());
            registry.register(Arc::new(P24PaymentAdapter::new(p24, client)));
        }

        Ok(registry)
    }

    /// Kinds that are registered and report themselves available.
    pub fn available(&self) -> Vec<ProviderKind> {
        self.providers
            .iter()
            .filter(|(_, provider)| provider.is_available())
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn is_available(&self, kind: ProviderKind) -> bool {
        self.providers.get(&kind).is_some_and(|p| p.is_available())
    }

    /// The provider for `kind`, if it is configured and available.
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn PaymentProvider>, BillingError> {
        match self.providers.get(&kind) {
            Some(provider) if provider.is_available() => Ok(Arc::clone(provider)),
            _ => Err(BillingError::ProviderNotConfigured(kind)),
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::payments::MockPaymentProvider;

    #[test]
    fn empty_config_builds_empty_registry() {
        let registry = ProviderRegistry::from_config(&PaymentConfig::default()).unwrap();
        assert!(registry.available().is_empty());
        assert_eq!(
            registry.get(ProviderKind::Stripe).err(),
            Some(BillingError::ProviderNotConfigured(ProviderKind::Stripe))
        );
    }

    #[test]
    fn configured_providers_are_available_in_order() {
        let config = PaymentConfig {
            stripe_api_key: Some("sk_test_1".to_string()),
            stripe_webhook_secret: Some("whsec_1".to_string()),
            p24_merchant_id: Some("1234".to_string()),
            p24_crc: Some("crc".to_string()),
            p24_api_key: Some("key".to_string()),
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.available(),
            vec![ProviderKind::Stripe, ProviderKind::Przelewy24]
        );
        assert!(registry.get(ProviderKind::Przelewy24).is_ok());
        assert!(!registry.is_available(ProviderKind::PayPal));
    }

    #[test]
    fn unavailable_provider_is_not_handed_out() {
        let mock = MockPaymentProvider::new(ProviderKind::PayPal);
        mock.set_available(false);
        let registry = ProviderRegistry::new().with(Arc::new(mock));
        assert!(registry.available().is_empty());
        assert!(registry.get(ProviderKind::PayPal).is_err());
    }
}
