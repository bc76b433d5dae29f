//! Payment configuration
//!
//! Every provider is optional. A provider whose credentials are absent is
//! simply not offered; credentials that are present but malformed fail
//! validation.

use serde::Deserialize;
use std::time::Duration;

use crate::adapters::paypal::PayPalPlanMap;

use super::error::ValidationError;

/// Payment configuration (Stripe, PayPal, Przelewy24)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Public base URL of the application, used for provider callbacks
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// ISO currency plans are priced in
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Upper bound for every provider HTTP call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    pub stripe_api_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    #[serde(default)]
    pub stripe_require_livemode: bool,

    pub paypal_client_id: Option<String>,
    pub paypal_client_secret: Option<String>,
    pub paypal_webhook_id: Option<String>,
    #[serde(default = "default_true")]
    pub paypal_sandbox: bool,
    /// `plan:cycle:P-ID` entries, comma-separated
    pub paypal_plan_ids: Option<String>,

    pub p24_merchant_id: Option<String>,
    /// Defaults to the merchant id
    pub p24_pos_id: Option<String>,
    pub p24_crc: Option<String>,
    pub p24_api_key: Option<String>,
    #[serde(default = "default_true")]
    pub p24_sandbox: bool,
}

/// Stripe credentials, present only when fully configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeCredentials {
    pub api_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayPalCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P24Credentials {
    pub merchant_id: i64,
    pub pos_id: Option<i64>,
    pub crc: String,
    pub api_key: String,
}

impl PaymentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stripe(&self) -> Option<StripeCredentials> {
        Some(StripeCredentials {
            api_key: non_empty(&self.stripe_api_key)?,
            webhook_secret: non_empty(&self.stripe_webhook_secret)?,
        })
    }

    pub fn paypal(&self) -> Option<PayPalCredentials> {
        Some(PayPalCredentials {
            client_id: non_empty(&self.paypal_client_id)?,
            client_secret: non_empty(&self.paypal_client_secret)?,
            webhook_id: non_empty(&self.paypal_webhook_id)?,
        })
    }

    /// `None` when any part is missing or an id does not parse.
    pub fn p24(&self) -> Option<P24Credentials> {
        let merchant_id = non_empty(&self.p24_merchant_id)?.parse().ok()?;
        let pos_id = match non_empty(&self.p24_pos_id) {
            Some(raw) => Some(raw.parse().ok()?),
            None => None,
        };
        Some(P24Credentials {
            merchant_id,
            pos_id,
            crc: non_empty(&self.p24_crc)?,
            api_key: non_empty(&self.p24_api_key)?,
        })
    }

    pub fn paypal_plan_map(&self) -> Result<PayPalPlanMap, ValidationError> {
        match non_empty(&self.paypal_plan_ids) {
            Some(raw) => PayPalPlanMap::parse(&raw).map_err(ValidationError::InvalidPayPalPlanIds),
            None => Ok(PayPalPlanMap::default()),
        }
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.app_url.starts_with("http://") && !self.app_url.starts_with("https://") {
            return Err(ValidationError::InvalidUrl("payment.app_url"));
        }
        let currency = self.default_currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(self.default_currency.clone()));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 120 {
            return Err(ValidationError::InvalidTimeout("payment.request_timeout_secs"));
        }

        self.validate_stripe()?;
        self.validate_paypal()?;
        self.validate_p24()?;
        Ok(())
    }

    fn validate_stripe(&self) -> Result<(), ValidationError> {
        let key = non_empty(&self.stripe_api_key);
        let secret = non_empty(&self.stripe_webhook_secret);
        match (key, secret) {
            (None, None) => Ok(()),
            (Some(key), Some(secret)) => {
                // Verify key prefixes for safety
                if !key.starts_with("sk_") && !key.starts_with("rk_") {
                    return Err(ValidationError::InvalidStripeKey);
                }
                if !secret.starts_with("whsec_") {
                    return Err(ValidationError::InvalidStripeWebhookSecret);
                }
                Ok(())
            }
            _ => Err(ValidationError::IncompleteCredentials("Stripe")),
        }
    }

    fn validate_paypal(&self) -> Result<(), ValidationError> {
        let parts = [
            non_empty(&self.paypal_client_id),
            non_empty(&self.paypal_client_secret),
            non_empty(&self.paypal_webhook_id),
        ];
        let present = parts.iter().filter(|p| p.is_some()).count();
        if present != 0 && present != parts.len() {
            return Err(ValidationError::IncompleteCredentials("PayPal"));
        }
        self.paypal_plan_map().map(|_| ())
    }

    fn validate_p24(&self) -> Result<(), ValidationError> {
        let merchant = non_empty(&self.p24_merchant_id);
        let crc = non_empty(&self.p24_crc);
        let api_key = non_empty(&self.p24_api_key);
        if merchant.is_none() && crc.is_none() && api_key.is_none() {
            return Ok(());
        }
        let Some(merchant) = merchant else {
            return Err(ValidationError::IncompleteCredentials("Przelewy24"));
        };
        if crc.is_none() || api_key.is_none() {
            return Err(ValidationError::IncompleteCredentials("Przelewy24"));
        }
        if !is_positive_id(&merchant) {
            return Err(ValidationError::InvalidP24Id("merchant id"));
        }
        if let Some(pos) = non_empty(&self.p24_pos_id) {
            if !is_positive_id(&pos) {
                return Err(ValidationError::InvalidP24Id("pos id"));
            }
        }
        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            default_currency: default_currency(),
            request_timeout_secs: default_request_timeout(),
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_require_livemode: false,
            paypal_client_id: None,
            paypal_client_secret: None,
            paypal_webhook_id: None,
            paypal_sandbox: true,
            paypal_plan_ids: None,
            p24_merchant_id: None,
            p24_pos_id: None,
            p24_crc: None,
            p24_api_key: None,
            p24_sandbox: true,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_positive_id(raw: &str) -> bool {
    raw.parse::<i64>().map(|v| v > 0).unwrap_or(false)
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_currency() -> String {
    "PLN".to_string()
}

fn default_request_timeout() -> u64 {
    20
}

fn default_true() -> bool {
    true
}
