//! Stripe payment provider adapter (card payments).
//!
//! Subscriptions and one-time purchases both go through hosted Checkout
//! sessions; existing subscribers manage cards and invoices in the hosted
//! billing portal.
//!
//! # Security
//!
//! - HMAC-SHA256 signature verification with constant-time comparison
//! - Timestamp validation (5-minute window) for replay protection
//! - Secrets handled via `secrecy::SecretString`
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key, webhook_secret);
//! let adapter = StripePaymentAdapter::new(config, client);
//! ```

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::adapters::payments::http::{read_json, send_error};
use crate::domain::billing::{
    BillingCycle, Money, NormalizedEvent, NormalizedEventKind, ProviderKind,
};
use crate::domain::foundation::UserId;
use crate::ports::{
    CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider, PortalSession, PurchaseRequest,
    RefundRequest, RefundResult, WebhookHeaders,
};

use super::webhook_types::{
    SignatureHeader, StripeBillingPortalSession, StripeCharge, StripeCheckoutSession, StripeInvoice,
    StripeRefund, StripeSubscription, StripeWebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for webhook events (5 minutes).
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    /// Base URL for the API (default: https://api.stripe.com).
    api_base_url: String,

    /// Reject test-mode events.
    require_livemode: bool,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            webhook_secret: SecretString::new(webhook_secret.into()),
            api_base_url: "https://api.stripe.com".to_string(),
            require_livemode: false,
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }
}

/// Card payments through Stripe Checkout.
pub struct StripePaymentAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripePaymentAdapter {
    pub fn new(config: StripeConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    /// Verify webhook signature using HMAC-SHA256.
    fn verify_signature(&self, payload: &[u8], header: &SignatureHeader) -> Result<(), PaymentError> {
        let now = chrono::Utc::now().timestamp();
        let age = now - header.timestamp;

        if age > MAX_TIMESTAMP_AGE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                age_secs = age,
                "Stripe webhook too old - possible replay"
            );
            return Err(PaymentError::invalid_webhook(format!("Event too old ({} seconds)", age)));
        }

        if age < -MAX_FUTURE_TOLERANCE_SECS {
            tracing::warn!(event_timestamp = header.timestamp, "Stripe webhook timestamp in future");
            return Err(PaymentError::invalid_webhook("Event timestamp in future"));
        }

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.expose_secret().as_bytes())
            .map_err(|e| PaymentError::invalid_webhook(format!("Unusable webhook secret: {}", e)))?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| expected.as_slice().ct_eq(candidate.as_slice()).unwrap_u8() == 1);

        if !matched {
            tracing::warn!("Invalid Stripe webhook signature");
            return Err(PaymentError::invalid_webhook("Invalid signature"));
        }

        Ok(())
    }

    fn parse_envelope(&self, payload: &[u8]) -> Result<StripeWebhookEvent, PaymentError> {
        let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse Stripe webhook payload");
            PaymentError::invalid_webhook(format!("Invalid JSON: {}", e))
        })?;

        if self.config.require_livemode && !event.livemode {
            tracing::warn!(event_id = %event.id, "Rejected Stripe test mode event");
            return Err(PaymentError::invalid_webhook("Test mode events not allowed"));
        }

        Ok(event)
    }

    /// POST a Checkout Session and map it to the port's session.
    async fn create_session(
        &self,
        params: &[(&str, String)],
        correlation_id: &str,
        operation: &str,
    ) -> Result<CheckoutSession, PaymentError> {
        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), None::<&str>)
            .header("Idempotency-Key", correlation_id)
            .form(params)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Stripe, operation, e))?;

        let session: StripeCheckoutSession = read_json(ProviderKind::Stripe, operation, response).await?;
        Ok(CheckoutSession {
            payment_ref: session.id.clone(),
            redirect_url: session.url,
            client_secret: None,
            provider_token: None,
            requires_confirmation_code: false,
            expires_at: session.expires_at,
            session_id: session.id,
        })
    }

    /// Find what `/v1/refunds` accepts for a stored payment reference.
    async fn refund_target(&self, reference: &str) -> Result<(&'static str, String), PaymentError> {
        if reference.starts_with("ch_") {
            return Ok(("charge", reference.to_string()));
        }
        if !reference.starts_with("in_") {
            return Ok(("payment_intent", reference.to_string()));
        }

        let url = format!("{}/v1/invoices/{}", self.config.api_base_url, reference);
        let response = self
            .http_client
            .get(&url)
            .basic_auth(self.config.api_key.expose_secret(), None::<&str>)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Stripe, "get_invoice", e))?;
        let invoice: StripeInvoice = read_json(ProviderKind::Stripe, "get_invoice", response).await?;

        if let Some(pi) = invoice.payment_intent {
            Ok(("payment_intent", pi))
        } else if let Some(charge) = invoice.charge {
            Ok(("charge", charge))
        } else {
            Err(PaymentError::invalid_request(format!(
                "Invoice {} has no payment to refund",
                reference
            )))
        }
    }
}

/// Maps a Stripe event to the provider-neutral kind.
pub fn map_stripe_event(event: &StripeWebhookEvent) -> Result<NormalizedEventKind, PaymentError> {
    let object = &event.data.object;
    let kind = match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutSession = decode(object, "checkout session")?;
            let user_id = session
                .metadata
                .get("user_id")
                .or(session.client_reference_id.as_ref())
                .and_then(|u| UserId::new(u.as_str()).ok());
            let amount = match (session.amount_total, session.currency.as_deref()) {
                (Some(total), Some(currency)) => Some(Money::new(total, currency)),
                _ => None,
            };
            NormalizedEventKind::CheckoutCompleted {
                provider_ref: session.id,
                subscription_ref: session.subscription,
                user_id,
                plan_code: session.metadata.get("plan_code").cloned(),
                billing_cycle: session
                    .metadata
                    .get("billing_cycle")
                    .and_then(|c| c.parse::<BillingCycle>().ok()),
                amount,
                payment_id: session.invoice.or(session.payment_intent),
            }
        }
        "invoice.paid" => {
            let invoice: StripeInvoice = decode(object, "invoice")?;
            NormalizedEventKind::InvoicePaid {
                user_id: invoice
                    .metadata_value("user_id")
                    .and_then(|u| UserId::new(u).ok()),
                amount: Some(Money::new(invoice.amount_paid, &invoice.currency)),
                subscription_ref: invoice.subscription,
                provider_ref: invoice.id,
            }
        }
        "invoice.payment_failed" => {
            let invoice: StripeInvoice = decode(object, "invoice")?;
            NormalizedEventKind::PaymentFailed {
                user_id: invoice
                    .metadata_value("user_id")
                    .and_then(|u| UserId::new(u).ok()),
                reason: Some(format!(
                    "Invoice payment failed after {} attempt(s)",
                    invoice.attempt_count.max(1)
                )),
                subscription_ref: invoice.subscription,
                provider_ref: invoice.id,
            }
        }
        "customer.subscription.deleted" => {
            let subscription: StripeSubscription = decode(object, "subscription")?;
            NormalizedEventKind::SubscriptionCancelled {
                user_id: subscription
                    .metadata
                    .get("user_id")
                    .and_then(|u| UserId::new(u.as_str()).ok()),
                provider_ref: subscription.id,
            }
        }
        "charge.refunded" => {
            let charge: StripeCharge = decode(object, "charge")?;
            let (refund_ref, amount) = match charge.latest_refund() {
                Some(refund) => (refund.id.clone(), Money::new(refund.amount, &charge.currency)),
                None => (
                    format!("{}:{}", charge.id, charge.amount_refunded),
                    Money::new(charge.amount_refunded, &charge.currency),
                ),
            };
            NormalizedEventKind::Refunded {
                provider_ref: charge
                    .invoice
                    .clone()
                    .or_else(|| charge.payment_intent.clone())
                    .unwrap_or_else(|| charge.id.clone()),
                refund_ref,
                amount: Some(amount),
            }
        }
        _ => NormalizedEventKind::Unhandled,
    };
    Ok(kind)
}

fn decode<T: serde::de::DeserializeOwned>(object: &serde_json::Value, what: &str) -> Result<T, PaymentError> {
    serde_json::from_value(object.clone())
        .map_err(|e| PaymentError::invalid_webhook(format!("Invalid {}: {}", what, e)))
}

#[async_trait]
impl PaymentProvider for StripePaymentAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn is_available(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
            && !self.config.webhook_secret.expose_secret().is_empty()
    }

    async fn create_checkout(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let amount = request.amount();
        let interval = match request.billing_cycle {
            BillingCycle::Monthly => "month",
            BillingCycle::Yearly => "year",
        };

        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", request.user_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", amount.currency.to_ascii_lowercase()),
            ("line_items[0][price_data][unit_amount]", amount.amount.to_string()),
            ("line_items[0][price_data][product_data][name]", request.plan.name.clone()),
            ("line_items[0][price_data][recurring][interval]", interval.to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("metadata[plan_code]", request.plan.code.clone()),
            ("metadata[billing_cycle]", request.billing_cycle.to_string()),
            ("subscription_data[metadata][user_id]", request.user_id.to_string()),
            ("subscription_data[metadata][plan_code]", request.plan.code.clone()),
            ("subscription_data[metadata][billing_cycle]", request.billing_cycle.to_string()),
        ];

        if let Some(email) = &request.customer.email {
            params.push(("customer_email", email.clone()));
        }
        if request.plan.has_trial() {
            params.push(("subscription_data[trial_period_days]", request.plan.trial_days.to_string()));
        }

        let session = self
            .create_session(&params, &request.correlation_id, "create_checkout")
            .await?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %request.user_id,
            plan = %request.plan.code,
            "Stripe checkout session created"
        );
        Ok(session)
    }

    async fn create_purchase(&self, request: PurchaseRequest) -> Result<CheckoutSession, PaymentError> {
        let mut params = vec![
            ("mode", "payment".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", request.user_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.amount.currency.to_ascii_lowercase()),
            ("line_items[0][price_data][unit_amount]", request.amount.amount.to_string()),
            ("line_items[0][price_data][product_data][name]", request.description.clone()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("metadata[item_code]", request.item_code.clone()),
            ("payment_intent_data[metadata][user_id]", request.user_id.to_string()),
            ("payment_intent_data[metadata][item_code]", request.item_code.clone()),
        ];
        if let Some(email) = &request.customer.email {
            params.push(("customer_email", email.clone()));
        }

        let session = self
            .create_session(&params, &request.correlation_id, "create_purchase")
            .await?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %request.user_id,
            item = %request.item_code,
            "Stripe purchase session created"
        );
        Ok(session)
    }

    async fn verify_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<bool, PaymentError> {
        let Some(raw) = headers.get(SIGNATURE_HEADER) else {
            tracing::warn!("Stripe webhook without signature header");
            return Ok(false);
        };

        let header = match SignatureHeader::parse(raw) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse Stripe-Signature header");
                return Ok(false);
            }
        };

        Ok(self.verify_signature(payload, &header).is_ok())
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<NormalizedEvent, PaymentError> {
        let event = self.parse_envelope(payload)?;
        let kind = map_stripe_event(&event)?;
        Ok(NormalizedEvent::new(ProviderKind::Stripe, event.id, event.event_type, kind))
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundResult, PaymentError> {
        let (field, target) = self.refund_target(&request.provider_transaction_id).await?;
        let url = format!("{}/v1/refunds", self.config.api_base_url);

        let mut params = vec![(field, target), ("amount", request.amount.amount.to_string())];
        if let Some(reason) = &request.reason {
            params.push(("metadata[reason]", reason.clone()));
        }

        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Stripe, "refund", e))?;

        let refund: StripeRefund = read_json(ProviderKind::Stripe, "refund", response).await?;
        Ok(RefundResult {
            refund_id: refund.id,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    async fn create_portal_session(
        &self,
        subscription_ref: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError> {
        let url = format!("{}/v1/subscriptions/{}", self.config.api_base_url, subscription_ref);
        let response = self
            .http_client
            .get(&url)
            .basic_auth(self.config.api_key.expose_secret(), None::<&str>)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Stripe, "get_subscription", e))?;
        let subscription: StripeSubscription =
            read_json(ProviderKind::Stripe, "get_subscription", response).await?;
        let customer = subscription.customer.ok_or_else(|| {
            PaymentError::invalid_request(format!("Subscription {} has no customer", subscription_ref))
        })?;

        let url = format!("{}/v1/billing_portal/sessions", self.config.api_base_url);
        let params = [("customer", customer.as_str()), ("return_url", return_url)];
        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| send_error(ProviderKind::Stripe, "create_portal_session", e))?;
        let session: StripeBillingPortalSession =
            read_json(ProviderKind::Stripe, "create_portal_session", response).await?;

        tracing::info!(session_id = %session.id, customer = %customer, "Stripe billing portal session created");
        Ok(PortalSession {
            session_id: session.id,
            url: session.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn adapter() -> StripePaymentAdapter {
        StripePaymentAdapter::new(StripeConfig::new("sk_test_key", SECRET), reqwest::Client::new())
    }

    fn signature(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn headers(value: String) -> WebhookHeaders {
        WebhookHeaders::new().with("Stripe-Signature", value)
    }

    fn event(event_type: &str, object: serde_json::Value) -> StripeWebhookEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1704067200,
            "data": {"object": object},
            "livemode": false
        }))
        .unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Signature Verification
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn accepts_valid_signature() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = chrono::Utc::now().timestamp();
        let ok = adapter()
            .verify_webhook(payload.as_bytes(), &headers(signature(SECRET, now, payload)))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let payload = r#"{"id":"evt_test"}"#;
        let now = chrono::Utc::now().timestamp();
        let ok = adapter()
            .verify_webhook(payload.as_bytes(), &headers(signature("wrong", now, payload)))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_header() {
        let adapter = adapter();
        assert!(!adapter.verify_webhook(b"{}", &WebhookHeaders::new()).await.unwrap());
        assert!(!adapter
            .verify_webhook(b"{}", &headers("malformed".to_string()))
            .await
            .unwrap());
    }

    #[test]
    fn rejects_old_and_future_timestamps() {
        let adapter = adapter();
        let payload = r#"{"id":"evt_test"}"#;
        let now = chrono::Utc::now().timestamp();

        let old = SignatureHeader::parse(&signature(SECRET, now - 600, payload)).unwrap();
        let err = adapter.verify_signature(payload.as_bytes(), &old).unwrap_err();
        assert!(err.message.contains("too old"));

        let future = SignatureHeader::parse(&signature(SECRET, now + 120, payload)).unwrap();
        let err = adapter.verify_signature(payload.as_bytes(), &future).unwrap_err();
        assert!(err.message.contains("future"));

        let skewed = SignatureHeader::parse(&signature(SECRET, now + 30, payload)).unwrap();
        assert!(adapter.verify_signature(payload.as_bytes(), &skewed).is_ok());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Event Mapping
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn maps_checkout_session_completed() {
        let kind = map_stripe_event(&event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "subscription": "sub_1",
                "invoice": "in_1",
                "amount_total": 3999,
                "currency": "pln",
                "metadata": {"user_id": "u1", "plan_code": "premium", "billing_cycle": "monthly"}
            }),
        ))
        .unwrap();

        assert_eq!(
            kind,
            NormalizedEventKind::CheckoutCompleted {
                provider_ref: "cs_1".into(),
                subscription_ref: Some("sub_1".into()),
                user_id: Some(UserId::new("u1").unwrap()),
                plan_code: Some("premium".into()),
                billing_cycle: Some(BillingCycle::Monthly),
                amount: Some(Money::new(3999, "PLN")),
                payment_id: Some("in_1".into()),
            }
        );
    }

    #[test]
    fn checkout_falls_back_to_client_reference_id() {
        let kind = map_stripe_event(&event(
            "checkout.session.completed",
            serde_json::json!({"id": "cs_2", "client_reference_id": "u9"}),
        ))
        .unwrap();
        match kind {
            NormalizedEventKind::CheckoutCompleted { user_id, payment_id, .. } => {
                assert_eq!(user_id, Some(UserId::new("u9").unwrap()));
                assert!(payment_id.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn payment_mode_session_reports_the_payment_intent() {
        let kind = map_stripe_event(&event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_3",
                "mode": "payment",
                "payment_intent": "pi_3",
                "amount_total": 1500,
                "currency": "pln",
                "metadata": {"user_id": "u3", "item_code": "report"}
            }),
        ))
        .unwrap();

        match kind {
            NormalizedEventKind::CheckoutCompleted {
                provider_ref,
                subscription_ref,
                plan_code,
                payment_id,
                ..
            } => {
                assert_eq!(provider_ref, "cs_3");
                assert_eq!(subscription_ref, None);
                assert_eq!(plan_code, None);
                assert_eq!(payment_id.as_deref(), Some("pi_3"));
            }
            other => panic!("expected CheckoutCompleted, got {:?}", other),
        }
    }

    #[test]
    fn maps_invoice_paid() {
        let kind = map_stripe_event(&event(
            "invoice.paid",
            serde_json::json!({
                "id": "in_2",
                "subscription": "sub_1",
                "amount_paid": 3999,
                "currency": "pln",
                "subscription_details": {"metadata": {"user_id": "u1"}}
            }),
        ))
        .unwrap();
        assert_eq!(
            kind,
            NormalizedEventKind::InvoicePaid {
                provider_ref: "in_2".into(),
                subscription_ref: Some("sub_1".into()),
                user_id: Some(UserId::new("u1").unwrap()),
                amount: Some(Money::new(3999, "PLN")),
            }
        );
    }

    #[test]
    fn maps_invoice_payment_failed() {
        let kind = map_stripe_event(&event(
            "invoice.payment_failed",
            serde_json::json!({"id": "in_3", "subscription": "sub_1", "attempt_count": 2, "currency": "pln"}),
        ))
        .unwrap();
        match kind {
            NormalizedEventKind::PaymentFailed { provider_ref, subscription_ref, reason, .. } => {
                assert_eq!(provider_ref, "in_3");
                assert_eq!(subscription_ref.as_deref(), Some("sub_1"));
                assert!(reason.unwrap().contains("2 attempt"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn maps_subscription_deleted() {
        let kind = map_stripe_event(&event(
            "customer.subscription.deleted",
            serde_json::json!({"id": "sub_1", "status": "canceled", "metadata": {"user_id": "u1"}}),
        ))
        .unwrap();
        assert_eq!(
            kind,
            NormalizedEventKind::SubscriptionCancelled {
                provider_ref: "sub_1".into(),
                user_id: Some(UserId::new("u1").unwrap()),
            }
        );
    }

    #[test]
    fn maps_charge_refunded() {
        let kind = map_stripe_event(&event(
            "charge.refunded",
            serde_json::json!({
                "id": "ch_1",
                "invoice": "in_2",
                "payment_intent": "pi_1",
                "amount": 3999,
                "amount_refunded": 1000,
                "currency": "pln",
                "refunds": {"data": [{"id": "re_1", "amount": 1000}]}
            }),
        ))
        .unwrap();
        assert_eq!(
            kind,
            NormalizedEventKind::Refunded {
                provider_ref: "in_2".into(),
                refund_ref: "re_1".into(),
                amount: Some(Money::new(1000, "PLN")),
            }
        );
    }

    #[test]
    fn unknown_type_is_unhandled() {
        let kind = map_stripe_event(&event("customer.created", serde_json::json!({"id": "cus_1"}))).unwrap();
        assert_eq!(kind, NormalizedEventKind::Unhandled);
    }

    #[test]
    fn malformed_object_is_invalid_webhook() {
        let err = map_stripe_event(&event("invoice.paid", serde_json::json!({"amount_paid": 1}))).unwrap_err();
        assert_eq!(err.code, crate::ports::PaymentErrorCode::InvalidWebhook);
    }

    #[test]
    fn parse_keeps_event_id_and_raw_type() {
        let payload = serde_json::json!({
            "id": "evt_42",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1"}},
            "livemode": false
        })
        .to_string();
        let event = adapter().parse_webhook_event(payload.as_bytes()).unwrap();
        assert_eq!(event.provider_event_id, "evt_42");
        assert_eq!(event.raw_type, "customer.subscription.deleted");
        assert_eq!(event.event_type(), "subscription_cancelled");
    }

    #[test]
    fn parse_rejects_test_mode_when_live_required() {
        let adapter = StripePaymentAdapter::new(
            StripeConfig::new("key", "secret").with_require_livemode(true),
            reqwest::Client::new(),
        );
        let payload = r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}},"livemode":false}"#;
        let err = adapter.parse_webhook_event(payload.as_bytes()).unwrap_err();
        assert!(err.message.contains("Test mode"));
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let err = adapter().parse_webhook_event(b"not json").unwrap_err();
        assert!(err.message.contains("Invalid JSON"));
    }

    #[test]
    fn availability_requires_both_secrets() {
        assert!(adapter().is_available());
        let blank = StripePaymentAdapter::new(StripeConfig::new("", SECRET), reqwest::Client::new());
        assert!(!blank.is_available());
    }
}
