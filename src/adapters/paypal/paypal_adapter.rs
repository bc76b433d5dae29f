//! PayPal payment provider adapter (wallet payments).
//!
//! Checkout creates a PayPal billing subscription against a plan configured
//! in the PayPal dashboard. One-time purchases are v2 orders: the buyer
//! approves the order, then the application captures it. Webhooks are
//! verified by PayPal itself through the verify-webhook-signature API, so
//! verification costs a round trip.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::adapters::payments::http::{read_json, send_error};
use crate::domain::billing::{NormalizedEvent, NormalizedEventKind, ProviderKind, TransactionType};
use crate::domain::foundation::UserId;
use crate::ports::{
    CheckoutRequest, CheckoutSession, PaymentError, PaymentErrorCode, PaymentProvider, PurchaseRequest,
    RefundRequest, RefundResult, WebhookHeaders,
};

use super::webhook_types::{
    CustomId, PayPalAccessToken, PayPalCapture, PayPalCaptureRefund, PayPalOrder, PayPalPlanMap,
    PayPalRefund, PayPalSale, PayPalSubscription, PayPalVerificationResponse, PayPalWebhookEvent,
};

const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
const LIVE_BASE_URL: &str = "https://api-m.paypal.com";

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Headers PayPal signs every webhook delivery with.
const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-auth-algo",
    "paypal-cert-url",
    "paypal-transmission-id",
    "paypal-transmission-sig",
    "paypal-transmission-time",
];

/// PayPal REST configuration.
#[derive(Clone)]
pub struct PayPalConfig {
    client_id: String,
    client_secret: SecretString,
    /// Id of the webhook registered in the PayPal dashboard.
    webhook_id: String,
    api_base_url: String,
    plan_ids: PayPalPlanMap,
}

impl PayPalConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        webhook_id: impl Into<String>,
        sandbox: bool,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            webhook_id: webhook_id.into(),
            api_base_url: if sandbox { SANDBOX_BASE_URL } else { LIVE_BASE_URL }.to_string(),
            plan_ids: PayPalPlanMap::default(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_plan_ids(mut self, plan_ids: PayPalPlanMap) -> Self {
        self.plan_ids = plan_ids;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.api_base_url
    }
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Wallet payments through PayPal subscriptions.
pub struct PayPalPaymentAdapter {
    config: PayPalConfig,
    http_client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalPaymentAdapter {
    pub fn new(config: PayPalConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
            token: Mutex::new(None),
        }
    }

    /// Client-credentials access token, cached until shortly before expiry.
    async fn access_token(&self) -> Result<String, PaymentError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/v1/oauth2/token", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(self.config.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::PayPal, "oauth_token", e))?;
        let token: PayPalAccessToken = read_json(ProviderKind::PayPal, "oauth_token", response).await?;

        let lifetime = Duration::from_secs(token.expires_in.max(0) as u64);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(token.access_token)
    }

    async fn refund_sale(&self, request: &RefundRequest, token: String) -> Result<RefundResult, PaymentError> {
        let url = format!(
            "{}/v1/payments/sale/{}/refund",
            self.config.api_base_url, request.provider_transaction_id
        );
        let mut body = serde_json::json!({
            "amount": {
                "total": request.amount.to_decimal_string(),
                "currency": request.amount.currency,
            }
        });
        if let Some(reason) = &request.reason {
            body["description"] = serde_json::Value::String(reason.clone());
        }

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::PayPal, "refund", e))?;

        let refund: PayPalRefund = read_json(ProviderKind::PayPal, "refund", response).await?;
        Ok(RefundResult {
            refund_id: refund.id,
            status: refund.state.unwrap_or_else(|| "pending".to_string()),
        })
    }

    async fn refund_capture(&self, request: &RefundRequest, token: String) -> Result<RefundResult, PaymentError> {
        let url = format!(
            "{}/v2/payments/captures/{}/refund",
            self.config.api_base_url, request.provider_transaction_id
        );
        let mut body = serde_json::json!({
            "amount": {
                "value": request.amount.to_decimal_string(),
                "currency_code": request.amount.currency,
            }
        });
        if let Some(reason) = &request.reason {
            body["note_to_payer"] = serde_json::Value::String(reason.clone());
        }

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::PayPal, "refund", e))?;

        let refund: PayPalCaptureRefund = read_json(ProviderKind::PayPal, "refund", response).await?;
        Ok(RefundResult {
            refund_id: refund.id,
            status: refund
                .status
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or_else(|| "pending".to_string()),
        })
    }

    fn parse_envelope(payload: &[u8]) -> Result<PayPalWebhookEvent, PaymentError> {
        serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse PayPal webhook payload");
            PaymentError::invalid_webhook(format!("Invalid JSON: {}", e))
        })
    }
}

/// Maps a PayPal webhook event to the provider-neutral kind.
pub fn map_paypal_event(event: &PayPalWebhookEvent) -> Result<NormalizedEventKind, PaymentError> {
    let resource = &event.resource;
    let kind = match event.event_type.as_str() {
        "BILLING.SUBSCRIPTION.ACTIVATED" => {
            let subscription: PayPalSubscription = decode(resource, "subscription")?;
            let custom = subscription.custom_id.as_deref().and_then(CustomId::decode);
            let amount = subscription
                .billing_info
                .as_ref()
                .and_then(|info| info.last_payment.as_ref())
                .map(|payment| payment.amount.to_money())
                .transpose()?;
            NormalizedEventKind::CheckoutCompleted {
                provider_ref: subscription.id.clone(),
                subscription_ref: Some(subscription.id),
                user_id: custom.as_ref().map(|c| c.user_id.clone()),
                plan_code: custom.as_ref().map(|c| c.plan_code.clone()),
                billing_cycle: custom.as_ref().map(|c| c.billing_cycle),
                amount,
                payment_id: None,
            }
        }
        "BILLING.SUBSCRIPTION.CANCELLED" | "BILLING.SUBSCRIPTION.EXPIRED" => {
            let subscription: PayPalSubscription = decode(resource, "subscription")?;
            NormalizedEventKind::SubscriptionCancelled {
                user_id: subscription
                    .custom_id
                    .as_deref()
                    .and_then(CustomId::decode)
                    .map(|c| c.user_id),
                provider_ref: subscription.id,
            }
        }
        "BILLING.SUBSCRIPTION.PAYMENT.FAILED" | "BILLING.SUBSCRIPTION.SUSPENDED" => {
            let subscription: PayPalSubscription = decode(resource, "subscription")?;
            NormalizedEventKind::PaymentFailed {
                user_id: subscription
                    .custom_id
                    .as_deref()
                    .and_then(CustomId::decode)
                    .map(|c| c.user_id),
                reason: subscription
                    .status_change_note
                    .or_else(|| event.summary.clone()),
                subscription_ref: Some(subscription.id.clone()),
                provider_ref: subscription.id,
            }
        }
        "PAYMENT.SALE.COMPLETED" => {
            let sale: PayPalSale = decode(resource, "sale")?;
            NormalizedEventKind::InvoicePaid {
                user_id: sale
                    .custom
                    .as_deref()
                    .and_then(CustomId::decode)
                    .map(|c| c.user_id),
                amount: Some(sale.amount.to_money()?),
                subscription_ref: sale.billing_agreement_id,
                provider_ref: sale.id,
            }
        }
        "PAYMENT.SALE.REFUNDED" => {
            let refund: PayPalRefund = decode(resource, "refund")?;
            let Some(sale_id) = refund.sale_id else {
                return Err(PaymentError::invalid_webhook("Refund without sale_id"));
            };
            NormalizedEventKind::Refunded {
                provider_ref: sale_id,
                refund_ref: refund.id,
                amount: refund.amount.as_ref().map(|a| a.to_money()).transpose()?,
            }
        }
        "PAYMENT.CAPTURE.COMPLETED" => {
            let capture: PayPalCapture = decode(resource, "capture")?;
            let user_id = capture.custom_id.as_deref().and_then(|raw| {
                CustomId::decode(raw)
                    .map(|c| c.user_id)
                    .or_else(|| UserId::new(raw).ok())
            });
            NormalizedEventKind::CheckoutCompleted {
                provider_ref: capture.order_id().unwrap_or(capture.id.as_str()).to_string(),
                subscription_ref: None,
                user_id,
                plan_code: None,
                billing_cycle: None,
                amount: capture.amount.as_ref().map(|a| a.to_money()).transpose()?,
                payment_id: Some(capture.id),
            }
        }
        "PAYMENT.CAPTURE.REFUNDED" => {
            let refund: PayPalCaptureRefund = decode(resource, "capture refund")?;
            let Some(capture_id) = refund.capture_id() else {
                return Err(PaymentError::invalid_webhook("Capture refund without capture link"));
            };
            NormalizedEventKind::Refunded {
                provider_ref: capture_id,
                refund_ref: refund.id,
                amount: refund.amount.as_ref().map(|a| a.to_money()).transpose()?,
            }
        }
        _ => NormalizedEventKind::Unhandled,
    };
    Ok(kind)
}

fn decode<T: serde::de::DeserializeOwned>(resource: &serde_json::Value, what: &str) -> Result<T, PaymentError> {
    serde_json::from_value(resource.clone())
        .map_err(|e| PaymentError::invalid_webhook(format!("Invalid PayPal {}: {}", what, e)))
}

#[async_trait]
impl PaymentProvider for PayPalPaymentAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PayPal
    }

    fn is_available(&self) -> bool {
        !self.config.client_id.is_empty()
            && !self.config.client_secret.expose_secret().is_empty()
            && !self.config.webhook_id.is_empty()
    }

    async fn create_checkout(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let plan_id = self
            .config
            .plan_ids
            .get(&request.plan.code, request.billing_cycle)
            .ok_or_else(|| {
                PaymentError::invalid_request(format!(
                    "No PayPal plan configured for {} ({})",
                    request.plan.code, request.billing_cycle
                ))
            })?;

        let mut body = serde_json::json!({
            "plan_id": plan_id,
            "custom_id": CustomId::encode(&request.user_id, &request.plan.code, request.billing_cycle),
            "application_context": {
                "return_url": request.success_url,
                "cancel_url": request.cancel_url,
                "user_action": "SUBSCRIBE_NOW",
                "shipping_preference": "NO_SHIPPING"
            }
        });
        if let Some(email) = &request.customer.email {
            body["subscriber"] = serde_json::json!({ "email_address": email });
        }

        let token = self.access_token().await?;
        let url = format!("{}/v1/billing/subscriptions", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header("PayPal-Request-Id", request.correlation_id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::PayPal, "create_checkout", e))?;

        let subscription: PayPalSubscription =
            read_json(ProviderKind::PayPal, "create_checkout", response).await?;
        let redirect_url = subscription.approval_url().ok_or_else(|| {
            PaymentError::invalid_request("PayPal response has no approval link")
        })?;

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %request.user_id,
            plan = %request.plan.code,
            "PayPal subscription created"
        );

        Ok(CheckoutSession {
            payment_ref: subscription.id.clone(),
            redirect_url: Some(redirect_url),
            client_secret: None,
            provider_token: None,
            requires_confirmation_code: false,
            expires_at: None,
            session_id: subscription.id,
        })
    }

    async fn create_purchase(&self, request: PurchaseRequest) -> Result<CheckoutSession, PaymentError> {
        let body = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.item_code,
                "custom_id": request.user_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.amount.currency,
                    "value": request.amount.to_decimal_string(),
                }
            }],
            "application_context": {
                "return_url": request.success_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING"
            }
        });

        let token = self.access_token().await?;
        let url = format!("{}/v2/checkout/orders", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header("PayPal-Request-Id", request.correlation_id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::PayPal, "create_purchase", e))?;

        let order: PayPalOrder = read_json(ProviderKind::PayPal, "create_purchase", response).await?;
        let redirect_url = order
            .approval_url()
            .ok_or_else(|| PaymentError::invalid_request("PayPal order has no approval link"))?;

        tracing::info!(
            order_id = %order.id,
            user_id = %request.user_id,
            item = %request.item_code,
            "PayPal order created"
        );

        Ok(CheckoutSession {
            payment_ref: order.id.clone(),
            redirect_url: Some(redirect_url),
            client_secret: None,
            provider_token: None,
            requires_confirmation_code: false,
            expires_at: None,
            session_id: order.id,
        })
    }

    async fn capture_purchase(&self, payment_ref: &str) -> Result<String, PaymentError> {
        let token = self.access_token().await?;
        let url = format!("{}/v2/checkout/orders/{}/capture", self.config.api_base_url, payment_ref);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header("PayPal-Request-Id", format!("capture-{}", payment_ref))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::PayPal, "capture_purchase", e))?;

        let order: PayPalOrder = read_json(ProviderKind::PayPal, "capture_purchase", response).await?;
        let capture = order.first_capture().ok_or_else(|| {
            PaymentError::invalid_request(format!("PayPal order {} returned no capture", order.id))
        })?;
        if capture.status.as_deref() == Some("DECLINED") {
            return Err(PaymentError::new(
                PaymentErrorCode::CardDeclined,
                format!("PayPal declined capture {}", capture.id),
            ));
        }

        tracing::info!(order_id = %order.id, capture_id = %capture.id, "PayPal order captured");
        Ok(capture.id.clone())
    }

    async fn verify_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<bool, PaymentError> {
        let mut values = Vec::with_capacity(TRANSMISSION_HEADERS.len());
        for name in TRANSMISSION_HEADERS {
            match headers.get(name) {
                Some(value) => values.push(value.to_string()),
                None => {
                    tracing::warn!(header = name, "PayPal webhook missing transmission header");
                    return Ok(false);
                }
            }
        }

        let Ok(event) = serde_json::from_slice::<serde_json::Value>(payload) else {
            tracing::warn!("PayPal webhook payload is not JSON");
            return Ok(false);
        };

        let body = serde_json::json!({
            "auth_algo": values[0],
            "cert_url": values[1],
            "transmission_id": values[2],
            "transmission_sig": values[3],
            "transmission_time": values[4],
            "webhook_id": self.config.webhook_id,
            "webhook_event": event,
        });

        let token = self.access_token().await?;
        let url = format!("{}/v1/notifications/verify-webhook-signature", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::PayPal, "verify_webhook", e))?;

        let result: PayPalVerificationResponse =
            read_json(ProviderKind::PayPal, "verify_webhook", response).await?;
        let verified = result.verification_status == "SUCCESS";
        if !verified {
            tracing::warn!(status = %result.verification_status, "PayPal webhook verification failed");
        }
        Ok(verified)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<NormalizedEvent, PaymentError> {
        let event = Self::parse_envelope(payload)?;
        let kind = map_paypal_event(&event)?;
        Ok(NormalizedEvent::new(ProviderKind::PayPal, event.id, event.event_type, kind))
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundResult, PaymentError> {
        let token = self.access_token().await?;
        match request.transaction_type {
            TransactionType::OneTime => self.refund_capture(&request, token).await,
            _ => self.refund_sale(&request, token).await,
        }
    }
}
