//! Payment provider port for external payment processing.
//!
//! Each processor (card, wallet, instant bank transfer) implements the same
//! capability set: subscription checkout, one-time purchase, webhook
//! verification, event normalisation and refunds. Instant-transfer
//! processors additionally accept a payer confirmation code, wallets capture
//! approved purchases explicitly, and card processors offer a hosted billing
//! portal.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::{
    BillingCycle, BillingError, Money, NormalizedEvent, Plan, ProviderKind, TransactionType,
};
use crate::domain::foundation::UserId;

/// Port for payment provider integrations.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Which processor this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// True when credentials are configured. Unavailable providers are
    /// skipped, never fatal.
    fn is_available(&self) -> bool;

    /// Create a hosted checkout for `request.plan`.
    ///
    /// Nothing is persisted locally until this returns `Ok`.
    async fn create_checkout(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError>;

    /// Create a hosted checkout for a single payment that never renews.
    async fn create_purchase(&self, request: PurchaseRequest) -> Result<CheckoutSession, PaymentError>;

    /// Verify that `payload` was sent by the provider.
    async fn verify_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<bool, PaymentError>;

    /// Map a verified payload into a [`NormalizedEvent`].
    fn parse_webhook_event(&self, payload: &[u8]) -> Result<NormalizedEvent, PaymentError>;

    /// Refund part or all of an earlier payment.
    async fn refund(&self, request: RefundRequest) -> Result<RefundResult, PaymentError>;

    /// Submit a payer confirmation code (e.g. six-digit BLIK).
    async fn confirm_with_code(&self, token: &str, code: &str) -> Result<(), PaymentError> {
        let _ = (token, code);
        Err(PaymentError::unsupported(self.kind(), "confirmation codes"))
    }

    /// Capture a purchase the payer approved and return the provider's
    /// payment id.
    ///
    /// Processors that settle purchases on their own report them through a
    /// notification instead.
    async fn capture_purchase(&self, payment_ref: &str) -> Result<String, PaymentError> {
        let _ = payment_ref;
        Err(PaymentError::unsupported(self.kind(), "purchase capture"))
    }

    /// Hosted self-service billing page for the customer who owns
    /// `subscription_ref`.
    async fn create_portal_session(
        &self,
        subscription_ref: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError> {
        let _ = (subscription_ref, return_url);
        Err(PaymentError::unsupported(self.kind(), "a billing portal"))
    }
}

/// Payer details used to pre-fill hosted checkout pages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    /// Two-letter country code, used by bank-transfer processors.
    pub country: Option<String>,
    pub language: Option<String>,
}

/// Request to create a checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    pub customer: CustomerDetails,
    /// Merchant-side correlation id for processors that require one.
    pub correlation_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    pub fn amount(&self) -> Money {
        self.plan.price_for(self.billing_cycle)
    }
}

/// Request to create a one-time purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: UserId,
    /// Merchant-side code of what is being bought.
    pub item_code: String,
    /// Line item name shown to the payer.
    pub description: String,
    pub amount: Money,
    pub customer: CustomerDetails,
    pub correlation_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Billing portal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalSession {
    pub session_id: String,
    pub url: String,
}

/// Checkout session accepted by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session or order id.
    pub session_id: String,

    /// URL the payer is redirected to.
    pub redirect_url: Option<String>,

    /// Client secret for embedded flows.
    pub client_secret: Option<String>,

    /// Reference later webhooks carry; the pending transaction is keyed by it.
    pub payment_ref: String,

    /// Provider token needed for follow-up calls (e.g. code confirmation).
    pub provider_token: Option<String>,

    /// True when the payer must still submit a confirmation code.
    pub requires_confirmation_code: bool,

    /// When the session expires (Unix timestamp).
    pub expires_at: Option<i64>,
}

/// Case-insensitive view of the HTTP headers delivered with a webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookHeaders(BTreeMap<String, String>);

impl WebhookHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for WebhookHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = WebhookHeaders::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Request to refund an earlier payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Provider's id of the payment being refunded.
    pub provider_transaction_id: String,
    /// Positive amount to return.
    pub amount: Money,
    pub reason: Option<String>,
    /// Type of the original transaction.
    pub transaction_type: TransactionType,
    /// Metadata of the original transaction.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    /// Provider's refund id.
    pub refund_id: String,
    /// Provider's status string for the refund.
    pub status: String,
}

/// Errors from payment provider operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentError {
    /// Error code for categorization.
    pub code: PaymentErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Provider's error code (if available).
    pub provider_code: Option<String>,

    /// Whether the operation can be retried.
    pub retryable: bool,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Timeout, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::AuthenticationError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::InvalidRequest, message)
    }

    pub fn not_configured(provider: ProviderKind) -> Self {
        Self::new(
            PaymentErrorCode::NotConfigured,
            format!("{} credentials are not configured", provider),
        )
    }

    pub fn invalid_webhook(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::InvalidWebhook, message)
    }

    pub fn unsupported(provider: ProviderKind, what: &str) -> Self {
        Self::new(
            PaymentErrorCode::Unsupported,
            format!("{} does not offer {}", provider, what),
        )
    }

    /// Maps a non-success HTTP status from a provider API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let code = match status {
            401 | 403 => PaymentErrorCode::AuthenticationError,
            402 => PaymentErrorCode::CardDeclined,
            404 => PaymentErrorCode::NotFound,
            429 => PaymentErrorCode::RateLimitExceeded,
            400..=499 => PaymentErrorCode::InvalidRequest,
            _ => PaymentErrorCode::ProviderError,
        };
        Self::new(code, message).with_provider_code(status.to_string())
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for BillingError {
    fn from(err: PaymentError) -> Self {
        match err.code {
            PaymentErrorCode::InvalidWebhook => BillingError::InvalidWebhookSignature,
            PaymentErrorCode::NotConfigured => BillingError::Configuration(err.message),
            _ => BillingError::provider(err.code.to_string(), err.message, err.retryable),
        }
    }
}

/// Payment error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    /// Network connectivity issue.
    NetworkError,

    /// Provider did not answer within the request timeout.
    Timeout,

    /// API authentication failed.
    AuthenticationError,

    /// Card was declined.
    CardDeclined,

    /// Provider rejected the request parameters.
    InvalidRequest,

    /// Resource not found.
    NotFound,

    /// Rate limit exceeded.
    RateLimitExceeded,

    /// Invalid webhook signature or payload.
    InvalidWebhook,

    /// Operation not offered by this provider.
    Unsupported,

    /// Credentials missing.
    NotConfigured,

    /// Provider API error (5xx).
    ProviderError,
}

impl PaymentErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentErrorCode::NetworkError
                | PaymentErrorCode::Timeout
                | PaymentErrorCode::RateLimitExceeded
                | PaymentErrorCode::ProviderError
        )
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::Timeout => "timeout",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::CardDeclined => "card_declined",
            PaymentErrorCode::InvalidRequest => "invalid_request",
            PaymentErrorCode::NotFound => "not_found",
            PaymentErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            PaymentErrorCode::InvalidWebhook => "invalid_webhook",
            PaymentErrorCode::Unsupported => "unsupported",
            PaymentErrorCode::NotConfigured => "not_configured",
            PaymentErrorCode::ProviderError => "provider_error",
        };
        write!(f, "{}", s)
    }
}
