//! In-memory billing store.
//!
//! One `RwLock` guards every table so the store can enforce the same
//! uniqueness rules as the relational schema:
//!
//! - at most one live subscription per user
//! - (provider, event_id) unique in the webhook ledger
//! - (provider, provider_transaction_id) unique among transactions
//!
//! Intended for tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::billing::{FeatureOverride, ProviderKind, Subscription, Transaction};
use crate::domain::foundation::{
    DomainError, ErrorCode, SubscriptionId, Timestamp, TransactionId, UserId, WebhookEventId,
};
use crate::ports::{
    FeatureOverrideRepository, RecordOutcome, ReminderWindow, SchedulerLease,
    SubscriptionRepository, TransactionRepository, WebhookEventRecord, WebhookLedger,
    WebhookStatus,
};

#[derive(Default)]
struct State {
    /// Insertion order doubles as creation order.
    subscriptions: Vec<Subscription>,
    transactions: Vec<Transaction>,
    webhooks: Vec<WebhookEventRecord>,
    overrides: BTreeMap<(UserId, String), FeatureOverride>,
    leases: HashMap<String, (String, Instant)>,
}

impl State {
    fn live_row_for(&self, user_id: &UserId, except: Option<&SubscriptionId>) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.user_id == *user_id && s.is_live() && Some(&s.id) != except)
    }

    fn check_one_live(&self, subscription: &Subscription) -> Result<(), DomainError> {
        if subscription.is_live() && self.live_row_for(&subscription.user_id, Some(&subscription.id)).is_some() {
            return Err(DomainError::conflict(format!(
                "User {} already has a live subscription",
                subscription.user_id
            )));
        }
        Ok(())
    }

    fn check_provider_ref(&self, txn: &Transaction) -> Result<(), DomainError> {
        let Some(reference) = txn.provider_transaction_id.as_deref() else {
            return Ok(());
        };
        let taken = self.transactions.iter().any(|t| {
            t.id != txn.id
                && t.provider == txn.provider
                && t.provider_transaction_id.as_deref() == Some(reference)
        });
        if taken {
            return Err(DomainError::conflict(format!(
                "Transaction reference {} already recorded for {}",
                reference, txn.provider
            )));
        }
        Ok(())
    }
}

/// In-memory implementation of every store port except the plan catalog.
#[derive(Default)]
pub struct InMemoryBillingStore {
    state: RwLock<State>,
    fail_writes: AtomicBool,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subscription and transaction writes fail with a database error,
    /// simulating a store outage. The webhook ledger keeps working.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    // === Test Helpers ===

    pub async fn subscriptions_for(&self, user_id: &UserId) -> Vec<Subscription> {
        let state = self.state.read().await;
        state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect()
    }

    pub async fn live_count(&self, user_id: &UserId) -> usize {
        let state = self.state.read().await;
        state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id && s.is_live())
            .count()
    }

    pub async fn all_transactions(&self) -> Vec<Transaction> {
        self.state.read().await.transactions.clone()
    }

    pub async fn webhook_events(&self) -> Vec<WebhookEventRecord> {
        self.state.read().await.webhooks.clone()
    }

    fn check_writable(&self) -> Result<(), DomainError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::database("store unavailable"));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl SubscriptionRepository for InMemoryBillingStore {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.check_one_live(subscription)?;
        state.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.check_one_live(subscription)?;
        let row = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription not found: {}", subscription.id),
                )
            })?;
        *row = subscription.clone();
        Ok(())
    }

    async fn replace_live(
        &self,
        previous: Option<&Subscription>,
        next: &Subscription,
    ) -> Result<(), DomainError> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        // Validate everything before touching any row.
        let index = match previous {
            Some(previous) => {
                let index = state
                    .subscriptions
                    .iter()
                    .position(|s| s.id == previous.id && s.is_live())
                    .ok_or_else(|| {
                        DomainError::conflict(format!("Subscription {} is no longer live", previous.id))
                    })?;
                Some((index, previous))
            }
            None => None,
        };

        let blocking = state.subscriptions.iter().enumerate().any(|(i, s)| {
            let row_live = match index {
                Some((closing, prev)) if closing == i => prev.is_live(),
                _ => s.is_live(),
            };
            s.user_id == next.user_id && row_live
        });
        if next.is_live() && blocking {
            return Err(DomainError::conflict(format!(
                "User {} already has a live subscription",
                next.user_id
            )));
        }

        if let Some((index, previous)) = index {
            state.subscriptions[index] = previous.clone();
        }
        state.subscriptions.push(next.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        Ok(state.subscriptions.iter().find(|s| s.id == *id).cloned())
    }

    async fn find_live_by_user(&self, user_id: &UserId) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        Ok(state.live_row_for(user_id, None).cloned())
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .find(|s| {
                s.provider == Some(provider) && s.provider_subscription_ref.as_deref() == Some(provider_ref)
            })
            .cloned())
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn find_due_for_reminder(
        &self,
        now: Timestamp,
        window: ReminderWindow,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.is_due_for_reminder(now, window.min_days, window.max_days, window.cooldown_days))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_lapsed(&self, now: Timestamp, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        use crate::domain::billing::SubscriptionStatus;

        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| {
                let closable = match s.status {
                    SubscriptionStatus::Active | SubscriptionStatus::Trialing => true,
                    SubscriptionStatus::PastDue => s.cancel_at_period_end,
                    _ => false,
                };
                closable && !s.is_free()
                    && s.period_has_ended(now)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Transactions
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TransactionRepository for InMemoryBillingStore {
    async fn insert(&self, transaction: &Transaction) -> Result<(), DomainError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.check_provider_ref(transaction)?;
        state.transactions.push(transaction.clone());
        Ok(())
    }

    async fn update(&self, transaction: &Transaction) -> Result<(), DomainError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.check_provider_ref(transaction)?;
        let row = state
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction.id)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::TransactionNotFound,
                    format!("Transaction not found: {}", transaction.id),
                )
            })?;
        *row = transaction.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, DomainError> {
        let state = self.state.read().await;
        Ok(state.transactions.iter().find(|t| t.id == *id).cloned())
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_transaction_id: &str,
    ) -> Result<Option<Transaction>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .find(|t| {
                t.provider == provider
                    && t.provider_transaction_id.as_deref() == Some(provider_transaction_id)
            })
            .cloned())
    }

    async fn list_refunds_of(&self, original: &TransactionId) -> Result<Vec<Transaction>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.refunded_transaction_id.as_ref() == Some(original))
            .cloned()
            .collect())
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Transaction>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == *user_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Webhook ledger
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl WebhookLedger for InMemoryBillingStore {
    async fn record(&self, record: WebhookEventRecord) -> Result<RecordOutcome, DomainError> {
        let mut state = self.state.write().await;
        let duplicate = state
            .webhooks
            .iter()
            .any(|w| w.provider == record.provider && w.event_id == record.event_id);
        if duplicate {
            return Ok(RecordOutcome::Duplicate);
        }
        let id = record.id;
        state.webhooks.push(record);
        Ok(RecordOutcome::Inserted(id))
    }

    async fn mark_processed(&self, id: &WebhookEventId) -> Result<(), DomainError> {
        self.set_webhook_status(id, WebhookStatus::Processed, None).await
    }

    async fn mark_failed(&self, id: &WebhookEventId, error: &str) -> Result<(), DomainError> {
        self.set_webhook_status(id, WebhookStatus::Failed, Some(error.to_string()))
            .await
    }

    async fn find(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .iter()
            .find(|w| w.provider == provider && w.event_id == event_id)
            .cloned())
    }

    async fn list_failed(&self, limit: u32) -> Result<Vec<WebhookEventRecord>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .iter()
            .filter(|w| w.status == WebhookStatus::Failed)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn purge_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut state = self.state.write().await;
        let before = state.webhooks.len();
        state
            .webhooks
            .retain(|w| !(w.status == WebhookStatus::Processed && w.received_at.is_before(&cutoff)));
        Ok((before - state.webhooks.len()) as u64)
    }
}

impl InMemoryBillingStore {
    async fn set_webhook_status(
        &self,
        id: &WebhookEventId,
        status: WebhookStatus,
        error: Option<String>,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        let row = state
            .webhooks
            .iter_mut()
            .find(|w| w.id == *id)
            .ok_or_else(|| DomainError::new(ErrorCode::NotFound, format!("Webhook event not found: {}", id)))?;
        row.status = status;
        row.processing_error = error;
        row.processed_at = Some(Timestamp::now());
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Feature overrides
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl FeatureOverrideRepository for InMemoryBillingStore {
    async fn upsert(&self, feature_override: &FeatureOverride) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        state.overrides.insert(
            (feature_override.user_id.clone(), feature_override.feature_code.clone()),
            feature_override.clone(),
        );
        Ok(())
    }

    async fn remove(&self, user_id: &UserId, feature_code: &str) -> Result<bool, DomainError> {
        let mut state = self.state.write().await;
        Ok(state
            .overrides
            .remove(&(user_id.clone(), feature_code.to_string()))
            .is_some())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FeatureOverride>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .overrides
            .values()
            .filter(|o| o.user_id == *user_id)
            .cloned()
            .collect())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Scheduler lease
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl SchedulerLease for InMemoryBillingStore {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, DomainError> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let available = match state.leases.get(name) {
            Some((current, expires_at)) => current == holder || *expires_at <= now,
            None => true,
        };
        if available {
            state
                .leases
                .insert(name.to_string(), (holder.to_string(), now + ttl));
        }
        Ok(available)
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        if state.leases.get(name).map(|(h, _)| h == holder).unwrap_or(false) {
            state.leases.remove(name);
        }
        Ok(())
    }
}
