//! Przelewy24 payment provider adapter (instant bank transfer, BLIK).
//!
//! A checkout or one-time purchase registers a transaction restricted to
//! BLIK (method 181). The payer either completes it on the P24 page or
//! submits a six-digit code through [`PaymentProvider::confirm_with_code`].
//! P24 reports the outcome with a signed status notification to `urlStatus`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use subtle::ConstantTimeEq;

use crate::adapters::payments::http::{ensure_success, read_json, send_error};
use crate::domain::billing::{Money, NormalizedEvent, NormalizedEventKind, ProviderKind};
use crate::domain::foundation::UserId;
use crate::ports::{
    CheckoutRequest, CheckoutSession, CustomerDetails, PaymentError, PaymentProvider, PurchaseRequest,
    RefundRequest, RefundResult, WebhookHeaders,
};

const SANDBOX_BASE_URL: &str = "https://sandbox.przelewy24.pl";
const LIVE_BASE_URL: &str = "https://secure.przelewy24.pl";

/// P24 payment method id for BLIK.
const BLIK_METHOD_ID: i32 = 181;

/// Path P24 posts status notifications to, relative to the app URL.
pub const NOTIFICATION_PATH: &str = "/api/payments/webhooks/przelewy24";

/// Przelewy24 merchant configuration.
#[derive(Clone)]
pub struct P24Config {
    merchant_id: i64,
    pos_id: i64,
    crc: SecretString,
    api_key: SecretString,
    api_base_url: String,
    app_url: String,
}

impl P24Config {
    /// `pos_id` defaults to the merchant id, as it does for single-shop accounts.
    pub fn new(
        merchant_id: i64,
        pos_id: Option<i64>,
        crc: impl Into<String>,
        api_key: impl Into<String>,
        sandbox: bool,
    ) -> Self {
        Self {
            merchant_id,
            pos_id: pos_id.unwrap_or(merchant_id),
            crc: SecretString::new(crc.into()),
            api_key: SecretString::new(api_key.into()),
            api_base_url: if sandbox { SANDBOX_BASE_URL } else { LIVE_BASE_URL }.to_string(),
            app_url: "http://localhost:3000".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Public URL of this service; the notification URL hangs off it.
    pub fn with_app_url(mut self, url: impl Into<String>) -> Self {
        self.app_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn pos_id(&self) -> i64 {
        self.pos_id
    }
}

/// Hex SHA-384 of the `|`-joined fields followed by the CRC key.
pub fn p24_sign(fields: &[&str], crc: &str) -> String {
    let mut hasher = Sha384::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(crc.as_bytes());
    hex::encode(hasher.finalize())
}

/// True when `code` is exactly six ASCII digits.
pub fn is_valid_blik_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

// ════════════════════════════════════════════════════════════════════════════════
// Wire types
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    merchant_id: i64,
    pos_id: i64,
    session_id: &'a str,
    amount: i64,
    currency: &'a str,
    description: String,
    email: &'a str,
    country: &'a str,
    language: &'a str,
    method: i32,
    url_return: &'a str,
    url_status: String,
    sign: String,
}

#[derive(Debug, Deserialize)]
struct P24Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct RegisterData {
    token: String,
}

/// Status notification P24 posts to `urlStatus`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct P24Notification {
    pub session_id: String,
    pub order_id: i64,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub sign: String,
    pub error: Option<serde_json::Value>,
}

impl P24Notification {
    fn sign_fields(&self) -> [String; 4] {
        [
            self.session_id.clone(),
            self.order_id.to_string(),
            self.amount.to_string(),
            self.currency.clone(),
        ]
    }
}

/// Maps a P24 notification to the provider-neutral kind.
///
/// The notification only carries the session id; user, plan and cycle come
/// from the pending transaction registered at checkout.
pub fn map_p24_notification(notification: &P24Notification) -> NormalizedEventKind {
    match &notification.error {
        Some(error) if !error.is_null() => NormalizedEventKind::PaymentFailed {
            provider_ref: notification.session_id.clone(),
            subscription_ref: None,
            user_id: None,
            reason: Some(match error {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        },
        _ => NormalizedEventKind::CheckoutCompleted {
            provider_ref: notification.session_id.clone(),
            subscription_ref: None,
            user_id: None,
            plan_code: None,
            billing_cycle: None,
            amount: Some(Money::new(notification.amount, &notification.currency)),
            payment_id: Some(notification.order_id.to_string()),
        },
    }
}

struct Registration<'a> {
    user_id: &'a UserId,
    session_id: &'a str,
    amount: &'a Money,
    description: String,
    customer: &'a CustomerDetails,
    return_url: &'a str,
}

/// BLIK and bank transfers through Przelewy24.
pub struct P24PaymentAdapter {
    config: P24Config,
    http_client: reqwest::Client,
}

impl P24PaymentAdapter {
    pub fn new(config: P24Config, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn sign(&self, fields: &[&str]) -> String {
        p24_sign(fields, self.config.crc.expose_secret())
    }

    /// Registers a BLIK transaction and returns the session the payer
    /// continues with.
    async fn register(&self, registration: Registration<'_>) -> Result<CheckoutSession, PaymentError> {
        let Registration {
            user_id,
            session_id,
            amount,
            description,
            customer,
            return_url,
        } = registration;
        let merchant_id = self.config.merchant_id.to_string();
        let amount_str = amount.amount.to_string();
        let sign = self.sign(&[session_id, &merchant_id, &amount_str, &amount.currency]);

        let body = RegisterRequest {
            merchant_id: self.config.merchant_id,
            pos_id: self.config.pos_id,
            session_id,
            amount: amount.amount,
            currency: &amount.currency,
            description,
            email: customer.email.as_deref().unwrap_or_default(),
            country: customer.country.as_deref().unwrap_or("PL"),
            language: customer.language.as_deref().unwrap_or("pl"),
            method: BLIK_METHOD_ID,
            url_return: return_url,
            url_status: format!("{}{}", self.config.app_url, NOTIFICATION_PATH),
            sign,
        };

        let url = format!("{}/api/v1/transaction/register", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.pos_id, Some(self.config.api_key.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Przelewy24, "register", e))?;

        let registered: P24Envelope<RegisterData> =
            read_json(ProviderKind::Przelewy24, "register", response).await?;
        let token = registered.data.token;

        tracing::info!(session_id, user_id = %user_id, "Przelewy24 transaction registered");

        Ok(CheckoutSession {
            session_id: session_id.to_string(),
            redirect_url: Some(format!("{}/trnRequest/{}", self.config.api_base_url, token)),
            client_secret: None,
            payment_ref: session_id.to_string(),
            provider_token: Some(token),
            requires_confirmation_code: true,
            expires_at: None,
        })
    }

    fn parse_notification(payload: &[u8]) -> Result<P24Notification, PaymentError> {
        serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse Przelewy24 notification");
            PaymentError::invalid_webhook(format!("Invalid JSON: {}", e))
        })
    }
}

#[async_trait]
impl PaymentProvider for P24PaymentAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Przelewy24
    }

    fn is_available(&self) -> bool {
        self.config.merchant_id > 0
            && !self.config.crc.expose_secret().is_empty()
            && !self.config.api_key.expose_secret().is_empty()
    }

    async fn create_checkout(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let amount = request.amount();
        let session = self
            .register(Registration {
                user_id: &request.user_id,
                session_id: &request.correlation_id,
                amount: &amount,
                description: format!("{} ({})", request.plan.name, request.billing_cycle),
                customer: &request.customer,
                return_url: &request.success_url,
            })
            .await?;
        tracing::debug!(session_id = %session.session_id, plan = %request.plan.code, "Przelewy24 checkout ready");
        Ok(session)
    }

    async fn create_purchase(&self, request: PurchaseRequest) -> Result<CheckoutSession, PaymentError> {
        let session = self
            .register(Registration {
                user_id: &request.user_id,
                session_id: &request.correlation_id,
                amount: &request.amount,
                description: request.description.clone(),
                customer: &request.customer,
                return_url: &request.success_url,
            })
            .await?;
        tracing::debug!(session_id = %session.session_id, item = %request.item_code, "Przelewy24 purchase ready");
        Ok(session)
    }

    async fn verify_webhook(&self, payload: &[u8], _headers: &WebhookHeaders) -> Result<bool, PaymentError> {
        let Ok(notification) = Self::parse_notification(payload) else {
            return Ok(false);
        };

        let fields = notification.sign_fields();
        let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        let expected = self.sign(&field_refs);

        let matched = expected
            .as_bytes()
            .ct_eq(notification.sign.to_ascii_lowercase().as_bytes())
            .unwrap_u8()
            == 1;
        if !matched {
            tracing::warn!(session_id = %notification.session_id, "Invalid Przelewy24 notification sign");
        }
        Ok(matched)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<NormalizedEvent, PaymentError> {
        let notification = Self::parse_notification(payload)?;
        let raw_type = if notification.error.as_ref().is_some_and(|e| !e.is_null()) {
            "payment.failed"
        } else {
            "payment.completed"
        };
        // One order can be reported failed and later settled
        Ok(NormalizedEvent::new(
            ProviderKind::Przelewy24,
            format!("{}:{}", notification.order_id, raw_type),
            raw_type,
            map_p24_notification(&notification),
        ))
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundResult, PaymentError> {
        let session_id = request
            .metadata
            .get("session_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| PaymentError::invalid_request("Przelewy24 refund needs the original session id"))?;
        let order_id: i64 = request.provider_transaction_id.parse().map_err(|_| {
            PaymentError::invalid_request(format!(
                "'{}' is not a Przelewy24 order id",
                request.provider_transaction_id
            ))
        })?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "requestId": request_id,
            "refundsUuid": request_id,
            "urlStatus": format!("{}{}", self.config.app_url, NOTIFICATION_PATH),
            "refunds": [{
                "orderId": order_id,
                "sessionId": session_id,
                "amount": request.amount.amount,
                "description": request.reason.clone().unwrap_or_else(|| "Refund".to_string()),
            }]
        });

        let url = format!("{}/api/v1/transaction/refund", self.config.api_base_url);
        let response = self
            .http_client
            .put(&url)
            .basic_auth(self.config.pos_id, Some(self.config.api_key.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Przelewy24, "refund", e))?;
        ensure_success(ProviderKind::Przelewy24, "refund", response).await?;

        Ok(RefundResult {
            refund_id: request_id,
            status: "pending".to_string(),
        })
    }

    async fn confirm_with_code(&self, token: &str, code: &str) -> Result<(), PaymentError> {
        if !is_valid_blik_code(code) {
            return Err(PaymentError::invalid_request("Invalid BLIK code - must be 6 digits"));
        }

        let url = format!("{}/api/v1/paymentMethod/blik/chargeByCode", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.pos_id, Some(self.config.api_key.expose_secret()))
            .json(&serde_json::json!({ "token": token, "blikCode": code }))
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Przelewy24, "charge_by_code", e))?;
        ensure_success(ProviderKind::Przelewy24, "charge_by_code", response).await?;

        tracing::info!("BLIK code submitted, awaiting payer confirmation");
        Ok(())
    }
}
