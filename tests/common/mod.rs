//! Shared fixtures for the integration tests.
//!
//! Everything runs against the in-memory store and mock providers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use billing_engine::adapters::{InMemoryBillingStore, InMemoryPlanCatalog, MockPaymentProvider, ProviderRegistry};
use billing_engine::application::{
    BillingPortalHandler, BillingQueries, CapturePurchaseHandler, ConfirmPaymentHandler, FeatureAccessHandler,
    HandleWebhookCommand, HandleWebhookHandler, RefundTransactionHandler, RenewalScheduler,
    RenewalSchedulerConfig, StartCheckoutHandler, StartPurchaseHandler, SubscriptionLifecycle,
};
use billing_engine::domain::billing::{
    BillingCycle, NormalizedEvent, NormalizedEventKind, ProviderKind, Subscription,
};
use billing_engine::domain::foundation::{Timestamp, UserId};
use billing_engine::ports::{Notifier, NotifyResult, PlanCatalog, SubscriptionRepository, WebhookHeaders};

// =============================================================================
// Recording notifier
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Confirmation(UserId),
    Reminder(UserId, u32),
    Expired(UserId),
    PaymentFailed(UserId),
}

/// Notifier that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    fn push(&self, sent: Sent) -> NotifyResult {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return NotifyResult::failed("mail server down");
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(sent);
        NotifyResult::ok()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_subscription_confirmation(&self, subscription: &Subscription) -> NotifyResult {
        self.push(Sent::Confirmation(subscription.user_id.clone()))
    }

    async fn send_subscription_reminder(&self, subscription: &Subscription, days_remaining: u32) -> NotifyResult {
        self.push(Sent::Reminder(subscription.user_id.clone(), days_remaining))
    }

    async fn send_subscription_expired(&self, subscription: &Subscription) -> NotifyResult {
        self.push(Sent::Expired(subscription.user_id.clone()))
    }

    async fn send_payment_failed(&self, user_id: &UserId, _reason: Option<&str>) -> NotifyResult {
        self.push(Sent::PaymentFailed(user_id.clone()))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub store: Arc<InMemoryBillingStore>,
    pub catalog: Arc<InMemoryPlanCatalog>,
    pub notifier: Arc<RecordingNotifier>,
    pub stripe: MockPaymentProvider,
    pub p24: MockPaymentProvider,
    pub paypal: MockPaymentProvider,
    pub registry: Arc<ProviderRegistry>,
    pub lifecycle: Arc<SubscriptionLifecycle>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        let catalog = Arc::new(InMemoryPlanCatalog::with_default_plans("PLN"));
        let notifier = Arc::new(RecordingNotifier::default());
        let stripe = MockPaymentProvider::new(ProviderKind::Stripe);
        let p24 = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        let paypal = MockPaymentProvider::new(ProviderKind::PayPal);
        let registry = Arc::new(
            ProviderRegistry::new()
                .with(Arc::new(stripe.clone()))
                .with(Arc::new(p24.clone()))
                .with(Arc::new(paypal.clone())),
        );
        let lifecycle = Arc::new(SubscriptionLifecycle::new(
            catalog.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
        ));
        Self {
            store,
            catalog,
            notifier,
            stripe,
            p24,
            paypal,
            registry,
            lifecycle,
        }
    }

    pub fn checkout(&self) -> StartCheckoutHandler {
        StartCheckoutHandler::new(
            self.registry.clone(),
            self.catalog.clone(),
            self.store.clone(),
            "https://app.example",
        )
    }

    pub fn purchases(&self) -> StartPurchaseHandler {
        StartPurchaseHandler::new(self.registry.clone(), self.store.clone(), "https://app.example")
    }

    pub fn captures(&self) -> CapturePurchaseHandler {
        CapturePurchaseHandler::new(self.registry.clone(), self.store.clone())
    }

    pub fn confirmations(&self) -> ConfirmPaymentHandler {
        ConfirmPaymentHandler::new(self.registry.clone(), self.store.clone())
    }

    pub fn portal(&self) -> BillingPortalHandler {
        BillingPortalHandler::new(self.registry.clone(), self.store.clone(), "https://app.example")
    }

    pub fn webhooks(&self) -> HandleWebhookHandler {
        HandleWebhookHandler::new(self.registry.clone(), self.store.clone(), self.lifecycle.clone())
    }

    pub fn refunds(&self) -> RefundTransactionHandler {
        RefundTransactionHandler::new(self.registry.clone(), self.store.clone())
    }

    pub fn queries(&self) -> BillingQueries {
        BillingQueries::new(
            self.catalog.clone(),
            self.store.clone(),
            self.store.clone(),
            self.registry.clone(),
        )
    }

    pub fn feature_access(&self) -> FeatureAccessHandler {
        FeatureAccessHandler::new(self.store.clone(), self.store.clone())
    }

    pub fn scheduler(&self, instance_id: &str) -> RenewalScheduler {
        RenewalScheduler::new(
            self.lifecycle.clone(),
            self.store.clone(),
            self.store.clone(),
            self.notifier.clone(),
            RenewalSchedulerConfig::default().with_instance_id(instance_id),
        )
    }

    /// Insert a subscription as if it had been created `days_ago` days ago.
    pub async fn subscription_started(&self, user_id: &str, plan: &str, days_ago: i64) -> Subscription {
        let plan = self.catalog.get_plan(plan).await.unwrap().unwrap();
        let started = Timestamp::now().minus_days(days_ago);
        let sub = Subscription::start(user(user_id), &plan, BillingCycle::Monthly, None, None, started);
        SubscriptionRepository::insert(self.store.as_ref(), &sub).await.unwrap();
        sub
    }
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

/// A webhook from `provider` carrying `kind`, as the mock provider expects it.
pub fn webhook(provider: ProviderKind, event_id: &str, kind: NormalizedEventKind) -> HandleWebhookCommand {
    let event = NormalizedEvent::new(provider, event_id, "test.event", kind);
    HandleWebhookCommand {
        provider,
        payload: MockPaymentProvider::payload(&event),
        headers: WebhookHeaders::new(),
    }
}

pub fn stripe_webhook(event_id: &str, kind: NormalizedEventKind) -> HandleWebhookCommand {
    webhook(ProviderKind::Stripe, event_id, kind)
}
