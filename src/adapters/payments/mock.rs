//! Mock payment provider for testing.
//!
//! Supports:
//! - Pre-configured checkout sessions
//! - Error injection per method
//! - Call tracking
//! - Webhook simulation: the payload is a JSON-serialised `NormalizedEvent`

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::billing::{NormalizedEvent, ProviderKind};
use crate::ports::{
    CheckoutRequest, CheckoutSession, PaymentError, PaymentErrorCode, PaymentProvider, PortalSession,
    PurchaseRequest, RefundRequest, RefundResult, WebhookHeaders,
};

/// Mock payment provider.
///
/// ```ignore
/// let mock = MockPaymentProvider::new(ProviderKind::Stripe);
/// mock.set_method_error("refund", PaymentError::timeout("slow"));
/// let payload = MockPaymentProvider::payload(&event);
/// ```
#[derive(Clone)]
pub struct MockPaymentProvider {
    kind: ProviderKind,
    inner: Arc<Mutex<MockState>>,
}

struct MockState {
    available: bool,
    accepts_codes: bool,
    reject_webhooks: bool,
    next_checkouts: VecDeque<CheckoutSession>,
    method_errors: HashMap<String, PaymentError>,
    call_log: Vec<MethodCall>,
    counter: u32,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockPaymentProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(MockState {
                available: true,
                accepts_codes: false,
                reject_webhooks: false,
                next_checkouts: VecDeque::new(),
                method_errors: HashMap::new(),
                call_log: Vec::new(),
                counter: 0,
            })),
        }
    }

    /// A mock that takes confirmation codes, like an instant-transfer processor.
    pub fn with_confirmation_codes(kind: ProviderKind) -> Self {
        let mock = Self::new(kind);
        mock.state().accepts_codes = true;
        mock
    }

    /// Serialises `event` the way [`PaymentProvider::parse_webhook_event`] expects it.
    pub fn payload(event: &NormalizedEvent) -> Vec<u8> {
        serde_json::to_vec(event).unwrap_or_default()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration
    // ════════════════════════════════════════════════════════════════════════════

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn reject_webhooks(&self) {
        self.state().reject_webhooks = true;
    }

    /// Queue the session the next `create_checkout` or `create_purchase` returns.
    pub fn push_checkout_session(&self, session: CheckoutSession) {
        self.state().next_checkouts.push_back(session);
    }

    /// Fail every call to `method` until cleared.
    pub fn set_method_error(&self, method: &str, error: PaymentError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    pub fn clear_errors(&self) {
        self.state().method_errors.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state().call_log.iter().filter(|c| c.method == method).count()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, method: &str, args: Vec<String>) -> Result<u32, PaymentError> {
        let mut state = self.state();
        state.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }
        state.counter += 1;
        Ok(state.counter)
    }

    fn next_session(&self, n: u32) -> CheckoutSession {
        let mut state = self.state();
        if let Some(queued) = state.next_checkouts.pop_front() {
            return queued;
        }
        let requires_code = state.accepts_codes;
        let session_id = format!("{}_session_{}", self.kind, n);
        CheckoutSession {
            redirect_url: Some(format!("https://pay.example/{}", session_id)),
            client_secret: None,
            payment_ref: session_id.clone(),
            provider_token: requires_code.then(|| format!("token_{}", n)),
            requires_confirmation_code: requires_code,
            expires_at: None,
            session_id,
        }
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.state().available
    }

    async fn create_checkout(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let n = self.begin(
            "create_checkout",
            vec![
                request.user_id.to_string(),
                request.plan.code.clone(),
                request.billing_cycle.to_string(),
                request.correlation_id.clone(),
            ],
        )?;

        Ok(self.next_session(n))
    }

    async fn create_purchase(&self, request: PurchaseRequest) -> Result<CheckoutSession, PaymentError> {
        let n = self.begin(
            "create_purchase",
            vec![
                request.user_id.to_string(),
                request.item_code.clone(),
                request.amount.amount.to_string(),
                request.correlation_id.clone(),
            ],
        )?;
        Ok(self.next_session(n))
    }

    async fn capture_purchase(&self, payment_ref: &str) -> Result<String, PaymentError> {
        let n = self.begin("capture_purchase", vec![payment_ref.to_string()])?;
        Ok(format!("{}_capture_{}", self.kind, n))
    }

    async fn create_portal_session(
        &self,
        subscription_ref: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError> {
        let n = self.begin(
            "create_portal_session",
            vec![subscription_ref.to_string(), return_url.to_string()],
        )?;
        let session_id = format!("{}_portal_{}", self.kind, n);
        Ok(PortalSession {
            url: format!("https://portal.example/{}", session_id),
            session_id,
        })
    }

    async fn verify_webhook(&self, payload: &[u8], _headers: &WebhookHeaders) -> Result<bool, PaymentError> {
        self.begin("verify_webhook", vec![payload.len().to_string()])?;
        Ok(!self.state().reject_webhooks)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<NormalizedEvent, PaymentError> {
        self.begin("parse_webhook_event", Vec::new())?;
        let mut event: NormalizedEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::invalid_webhook(format!("Invalid JSON: {}", e)))?;
        event.provider = self.kind;
        Ok(event)
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundResult, PaymentError> {
        let n = self.begin(
            "refund",
            vec![
                request.provider_transaction_id.clone(),
                request.amount.amount.to_string(),
                request.transaction_type.as_str().to_string(),
            ],
        )?;
        Ok(RefundResult {
            refund_id: format!("{}_refund_{}", self.kind, n),
            status: "succeeded".to_string(),
        })
    }

    async fn confirm_with_code(&self, token: &str, code: &str) -> Result<(), PaymentError> {
        self.begin("confirm_with_code", vec![token.to_string(), code.to_string()])?;
        if !self.state().accepts_codes {
            return Err(PaymentError::new(
                PaymentErrorCode::Unsupported,
                format!("{} does not accept confirmation codes", self.kind),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::NormalizedEventKind;

    #[tokio::test]
    async fn tracks_calls_and_injects_errors() {
        let mock = MockPaymentProvider::new(ProviderKind::Stripe);
        mock.set_method_error("refund", PaymentError::timeout("slow"));

        let request = RefundRequest {
            provider_transaction_id: "pi_1".into(),
            amount: crate::domain::billing::Money::new(100, "PLN"),
            reason: None,
            transaction_type: crate::domain::billing::TransactionType::Subscription,
            metadata: serde_json::Value::Null,
        };
        let err = mock.refund(request.clone()).await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::Timeout);
        assert_eq!(mock.call_count("refund"), 1);

        mock.clear_errors();
        assert!(mock.refund(request).await.is_ok());
        assert_eq!(mock.call_count("refund"), 2);
    }

    #[test]
    fn parses_serialised_events_as_own_provider() {
        let mock = MockPaymentProvider::new(ProviderKind::PayPal);
        let event = NormalizedEvent::new(ProviderKind::Stripe, "evt_1", "raw", NormalizedEventKind::Unhandled);
        let parsed = mock.parse_webhook_event(&MockPaymentProvider::payload(&event)).unwrap();
        assert_eq!(parsed.provider, ProviderKind::PayPal);
        assert_eq!(parsed.provider_event_id, "evt_1");
    }

    #[tokio::test]
    async fn codes_are_unsupported_by_default() {
        let mock = MockPaymentProvider::new(ProviderKind::Stripe);
        let err = mock.confirm_with_code("t", "123456").await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::Unsupported);

        let blik = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        assert!(blik.confirm_with_code("t", "123456").await.is_ok());
    }
}
