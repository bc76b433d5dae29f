//! Webhook-driven lifecycle changes.
//!
//! Events are applied idempotently by correlation: a transaction already
//! completed, a refund already recorded or a subscription already carrying
//! the provider reference are all left alone.

use tracing::{debug, info, warn};

use crate::domain::billing::{
    BillingCycle, BillingError, Money, NormalizedEvent, NormalizedEventKind, ProviderKind,
    Subscription, SubscriptionStatus, Transaction, TransactionStatus, TransactionType,
};
use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};

use super::lifecycle::{log_notify_failure, CreateSubscriptionCommand, SubscriptionLifecycle};

/// Days before period end inside which a paid invoice rolls the period.
pub const RENEWAL_WINDOW_DAYS: i64 = 4;

/// Failure code on a checkout row whose payment was already recorded from
/// an earlier invoice event.
pub const SUPERSEDED_CODE: &str = "superseded";

/// What applying one event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    /// Nothing to change; carries a short reason for logs and tests.
    NoAction(&'static str),
}

impl SubscriptionLifecycle {
    /// Apply a verified, deduplicated provider event.
    ///
    /// An error leaves the webhook marked failed for manual reconciliation.
    pub async fn apply_event(&self, event: &NormalizedEvent) -> Result<EventOutcome, BillingError> {
        let provider = event.provider;
        match &event.kind {
            NormalizedEventKind::CheckoutCompleted {
                provider_ref,
                subscription_ref,
                user_id,
                plan_code,
                billing_cycle,
                amount,
                payment_id,
            } => {
                self.checkout_completed(CheckoutCompleted {
                    provider,
                    provider_ref,
                    subscription_ref: subscription_ref.as_deref(),
                    user_id: user_id.as_ref(),
                    plan_code: plan_code.as_deref(),
                    billing_cycle: *billing_cycle,
                    amount: amount.as_ref(),
                    payment_id: payment_id.as_deref(),
                })
                .await
            }
            NormalizedEventKind::InvoicePaid {
                provider_ref,
                subscription_ref,
                user_id,
                amount,
            } => {
                self.invoice_paid(
                    provider,
                    provider_ref,
                    subscription_ref.as_deref(),
                    user_id.as_ref(),
                    amount.as_ref(),
                )
                .await
            }
            NormalizedEventKind::PaymentFailed {
                provider_ref,
                subscription_ref,
                user_id,
                reason,
            } => {
                self.payment_failed(
                    provider,
                    provider_ref,
                    subscription_ref.as_deref(),
                    user_id.as_ref(),
                    reason.as_deref(),
                )
                .await
            }
            NormalizedEventKind::SubscriptionCancelled { provider_ref, user_id } => {
                self.subscription_cancelled(provider, provider_ref, user_id.as_ref()).await
            }
            NormalizedEventKind::Refunded {
                provider_ref,
                refund_ref,
                amount,
            } => self.refunded(provider, provider_ref, refund_ref, amount.as_ref()).await,
            NormalizedEventKind::Unhandled => {
                debug!(provider = %provider, raw_type = %event.raw_type, "Ignoring unhandled event type");
                Ok(EventOutcome::NoAction("unhandled event type"))
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // checkout_completed
    // ════════════════════════════════════════════════════════════════════════════

    async fn checkout_completed(&self, e: CheckoutCompleted<'_>) -> Result<EventOutcome, BillingError> {
        let now = Timestamp::now();

        // 1. Correlate with the pending checkout row
        let txn = match self.transactions.find_by_provider_ref(e.provider, e.provider_ref).await? {
            Some(txn) => Some(txn),
            // A captured purchase is keyed by its payment id
            None => match e.payment_id {
                Some(payment_id) => self
                    .transactions
                    .find_by_provider_ref(e.provider, payment_id)
                    .await?
                    .filter(|t| t.transaction_type == TransactionType::OneTime),
                None => None,
            },
        };
        if let Some(purchase) = txn.clone().filter(|t| t.transaction_type == TransactionType::OneTime) {
            return self.purchase_completed(purchase, &e, now).await;
        }
        if !txn.as_ref().is_some_and(|t| t.status.is_open()) && self.payment_already_applied(&e).await? {
            return Ok(EventOutcome::NoAction("payment already recorded"));
        }
        let metadata = txn.as_ref().and_then(Transaction::checkout_metadata);

        // 2. Resolve who bought what
        let user_id = e
            .user_id
            .cloned()
            .or_else(|| txn.as_ref().map(|t| t.user_id.clone()))
            .ok_or_else(|| BillingError::validation("user_id", "checkout event carries no resolvable user"))?;
        let plan_code = e
            .plan_code
            .map(str::to_string)
            .or_else(|| metadata.as_ref().map(|m| m.plan_code.clone()))
            .ok_or_else(|| BillingError::validation("plan_code", "checkout event carries no resolvable plan"))?;
        let cycle = e
            .billing_cycle
            .or_else(|| metadata.as_ref().map(|m| m.billing_cycle))
            .unwrap_or(BillingCycle::Monthly);

        // 3. Reuse a row already created for this provider subscription
        let existing = match e.subscription_ref {
            Some(sub_ref) => self
                .subscriptions
                .find_by_provider_ref(e.provider, sub_ref)
                .await?
                .filter(|s| s.is_live() && s.user_id == user_id),
            None => None,
        };
        let already_subscribed = existing.is_some();
        let subscription = match existing {
            Some(sub) => sub,
            None => {
                self.create(CreateSubscriptionCommand {
                    user_id: user_id.clone(),
                    plan_code,
                    billing_cycle: cycle,
                    provider: Some(e.provider),
                    provider_subscription_ref: e.subscription_ref.map(str::to_string),
                })
                .await?
            }
        };

        // 4. Settle the checkout transaction
        match txn {
            Some(mut txn) if txn.status.is_open() => {
                txn.subscription_id = Some(subscription.id);
                if let Some(payment_id) = e.payment_id {
                    let already_recorded = payment_id != e.provider_ref
                        && self
                            .transactions
                            .find_by_provider_ref(e.provider, payment_id)
                            .await?
                            .is_some();
                    if already_recorded {
                        // The invoice arrived first and carries the money
                        txn.fail(
                            Some(SUPERSEDED_CODE.to_string()),
                            format!("payment {} recorded from invoice", payment_id),
                            now,
                        )?;
                    } else {
                        if payment_id != e.provider_ref {
                            txn.remember_session_id(e.provider_ref);
                        }
                        txn.complete(Some(payment_id.to_string()), now)?;
                    }
                }
                self.transactions.update(&txn).await?;
            }
            Some(txn) if txn.status == TransactionStatus::Failed => {
                self.record_late_payment(&txn, Some(subscription.id), &e, now).await?;
            }
            Some(_) => {}
            None => {
                if let (Some(payment_id), Some(amount)) = (e.payment_id, e.amount) {
                    if self.transactions.find_by_provider_ref(e.provider, payment_id).await?.is_none() {
                        let charge = Transaction::completed_charge(
                            user_id.clone(),
                            Some(subscription.id),
                            amount,
                            e.provider,
                            payment_id.to_string(),
                            now,
                        );
                        self.transactions.insert(&charge).await?;
                    }
                }
            }
        }

        if already_subscribed {
            return Ok(EventOutcome::NoAction("subscription already exists"));
        }

        let result = self.notifier.send_subscription_confirmation(&subscription).await;
        log_notify_failure("subscription_confirmation", &user_id, result);

        info!(
            provider = %e.provider,
            user_id = %user_id,
            subscription_id = %subscription.id,
            plan = %subscription.plan_code,
            "Checkout completed"
        );
        Ok(EventOutcome::Applied)
    }

    /// True when the event's payment is already on the ledger and attached
    /// to a live subscription.
    async fn payment_already_applied(&self, e: &CheckoutCompleted<'_>) -> Result<bool, BillingError> {
        let Some(payment_id) = e.payment_id.filter(|p| *p != e.provider_ref) else {
            return Ok(false);
        };
        let subscription_id = self
            .transactions
            .find_by_provider_ref(e.provider, payment_id)
            .await?
            .and_then(|t| t.subscription_id);
        let Some(subscription_id) = subscription_id else {
            return Ok(false);
        };
        Ok(self
            .subscriptions
            .find_by_id(&subscription_id)
            .await?
            .is_some_and(|s| s.is_live()))
    }

    async fn purchase_completed(
        &self,
        mut txn: Transaction,
        e: &CheckoutCompleted<'_>,
        now: Timestamp,
    ) -> Result<EventOutcome, BillingError> {
        if txn.status.is_open() {
            let payment_id = e.payment_id.filter(|p| *p != e.provider_ref);
            if payment_id.is_some() {
                txn.remember_session_id(e.provider_ref);
            }
            txn.complete(payment_id.map(str::to_string), now)?;
            self.transactions.update(&txn).await?;

            info!(
                provider = %e.provider,
                user_id = %txn.user_id,
                transaction_id = %txn.id,
                item = %txn.purchase_metadata().map(|m| m.item_code).unwrap_or_default(),
                "Purchase completed"
            );
            return Ok(EventOutcome::Applied);
        }

        if txn.status == TransactionStatus::Failed && self.record_late_payment(&txn, None, e, now).await? {
            return Ok(EventOutcome::Applied);
        }
        Ok(EventOutcome::NoAction("purchase already settled"))
    }

    /// Records a payment the provider confirmed after its checkout row was
    /// failed, e.g. a code submission that timed out. Returns whether a row
    /// was added.
    async fn record_late_payment(
        &self,
        failed: &Transaction,
        subscription_id: Option<SubscriptionId>,
        e: &CheckoutCompleted<'_>,
        now: Timestamp,
    ) -> Result<bool, BillingError> {
        let Some(payment_id) = e.payment_id.filter(|p| *p != e.provider_ref) else {
            warn!(
                provider = %e.provider,
                transaction_id = %failed.id,
                "Confirmed checkout for a failed transaction carries no payment id"
            );
            return Ok(false);
        };
        if self.transactions.find_by_provider_ref(e.provider, payment_id).await?.is_some() {
            return Ok(false);
        }

        let amount = e.amount.cloned().unwrap_or_else(|| failed.money());
        let mut charge = Transaction::completed_charge(
            failed.user_id.clone(),
            subscription_id,
            &amount,
            e.provider,
            payment_id.to_string(),
            now,
        )
        .with_metadata(failed.metadata.clone());
        charge.transaction_type = failed.transaction_type;
        charge.description = failed.description.clone();
        charge.remember_session_id(e.provider_ref);
        self.transactions.insert(&charge).await?;

        warn!(
            provider = %e.provider,
            user_id = %failed.user_id,
            failed_transaction_id = %failed.id,
            transaction_id = %charge.id,
            payment_id,
            "Payment confirmed after its checkout was marked failed; charge recorded"
        );
        Ok(true)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // invoice_paid
    // ════════════════════════════════════════════════════════════════════════════

    async fn invoice_paid(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        subscription_ref: Option<&str>,
        user_id: Option<&UserId>,
        amount: Option<&Money>,
    ) -> Result<EventOutcome, BillingError> {
        let now = Timestamp::now();
        let subscription = self.resolve_subscription(provider, subscription_ref, user_id).await?;

        // 1. Ledger
        let mut ledger_changed = false;
        match self.transactions.find_by_provider_ref(provider, provider_ref).await? {
            Some(mut txn) if txn.status.is_open() => {
                if txn.subscription_id.is_none() {
                    txn.subscription_id = subscription.as_ref().map(|s| s.id);
                }
                txn.complete(None, now)?;
                self.transactions.update(&txn).await?;
                ledger_changed = true;
            }
            Some(_) => return Ok(EventOutcome::NoAction("invoice already recorded")),
            None => {
                let open_checkout = match subscription_ref {
                    Some(sub_ref) => self
                        .transactions
                        .find_by_provider_ref(provider, sub_ref)
                        .await?
                        .filter(|t| t.status.is_open()),
                    None => None,
                };
                if let Some(mut txn) = open_checkout {
                    if txn.subscription_id.is_none() {
                        txn.subscription_id = subscription.as_ref().map(|s| s.id);
                    }
                    txn.complete(Some(provider_ref.to_string()), now)?;
                    self.transactions.update(&txn).await?;
                    ledger_changed = true;
                } else if let Some(amount) = amount {
                    let owner = subscription
                        .as_ref()
                        .map(|s| s.user_id.clone())
                        .or_else(|| user_id.cloned());
                    match owner {
                        Some(owner) => {
                            let charge = Transaction::completed_charge(
                                owner,
                                subscription.as_ref().map(|s| s.id),
                                amount,
                                provider,
                                provider_ref.to_string(),
                                now,
                            );
                            self.transactions.insert(&charge).await?;
                            ledger_changed = true;
                        }
                        None => warn!(provider = %provider, provider_ref, "Paid invoice has no resolvable user"),
                    }
                }
            }
        }

        // 2. Subscription period
        let Some(mut subscription) = subscription.filter(Subscription::is_live) else {
            return Ok(if ledger_changed {
                EventOutcome::Applied
            } else {
                EventOutcome::NoAction("no live subscription")
            });
        };
        subscription.record_payment(RENEWAL_WINDOW_DAYS, now)?;
        self.subscriptions.update(&subscription).await?;

        info!(
            provider = %provider,
            user_id = %subscription.user_id,
            subscription_id = %subscription.id,
            period_end = %subscription.current_period_end,
            "Invoice paid"
        );
        Ok(EventOutcome::Applied)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // payment_failed
    // ════════════════════════════════════════════════════════════════════════════

    async fn payment_failed(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        subscription_ref: Option<&str>,
        user_id: Option<&UserId>,
        reason: Option<&str>,
    ) -> Result<EventOutcome, BillingError> {
        let now = Timestamp::now();
        let message = reason.unwrap_or("payment failed");

        // 1. Fail the correlated open transaction
        let mut txn = self.transactions.find_by_provider_ref(provider, provider_ref).await?;
        if txn.is_none() {
            if let Some(sub_ref) = subscription_ref {
                txn = self.transactions.find_by_provider_ref(provider, sub_ref).await?;
            }
        }
        let mut failed_owner = None;
        if let Some(mut txn) = txn.filter(|t| t.status.is_open()) {
            txn.fail(Some("payment_failed".to_string()), message, now)?;
            self.transactions.update(&txn).await?;
            failed_owner = Some(txn.user_id);
        }

        // 2. Move the live row to past_due
        let subscription = self
            .resolve_subscription(provider, subscription_ref, user_id)
            .await?
            .filter(Subscription::is_live);
        let mut marked = None;
        if let Some(mut sub) = subscription {
            if sub.status != SubscriptionStatus::PastDue {
                sub.mark_past_due(now)?;
                self.subscriptions.update(&sub).await?;
                marked = Some(sub.user_id);
            }
        }

        let Some(owner) = marked.clone().or(failed_owner) else {
            return Ok(EventOutcome::NoAction("no live subscription or open transaction"));
        };

        let result = self.notifier.send_payment_failed(&owner, reason).await;
        log_notify_failure("payment_failed", &owner, result);

        warn!(
            provider = %provider,
            user_id = %owner,
            past_due = marked.is_some(),
            reason = message,
            "Payment failed"
        );
        Ok(EventOutcome::Applied)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // subscription_cancelled
    // ════════════════════════════════════════════════════════════════════════════

    async fn subscription_cancelled(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        user_id: Option<&UserId>,
    ) -> Result<EventOutcome, BillingError> {
        let subscription = self
            .resolve_subscription(provider, Some(provider_ref), user_id)
            .await?
            .filter(|s| s.is_live() && s.provider == Some(provider));

        let Some(mut sub) = subscription else {
            return Ok(EventOutcome::NoAction("no live subscription"));
        };
        sub.cancel_now(Some(format!("cancelled by {}", provider.display_name())), Timestamp::now())?;
        self.subscriptions.update(&sub).await?;

        info!(provider = %provider, user_id = %sub.user_id, subscription_id = %sub.id, "Subscription cancelled by provider");
        Ok(EventOutcome::Applied)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // refunded
    // ════════════════════════════════════════════════════════════════════════════

    async fn refunded(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        refund_ref: &str,
        amount: Option<&Money>,
    ) -> Result<EventOutcome, BillingError> {
        if self.transactions.find_by_provider_ref(provider, refund_ref).await?.is_some() {
            return Ok(EventOutcome::NoAction("refund already recorded"));
        }

        let Some(mut original) = self.transactions.find_by_provider_ref(provider, provider_ref).await? else {
            warn!(provider = %provider, provider_ref, refund_ref, "Refund for unknown payment");
            return Ok(EventOutcome::NoAction("original payment not found"));
        };
        if original.status != TransactionStatus::Completed {
            warn!(
                provider = %provider,
                transaction_id = %original.id,
                status = %original.status,
                "Refund for payment that is not completed"
            );
            return Ok(EventOutcome::NoAction("original payment not completed"));
        }

        let now = Timestamp::now();
        let refund_amount = amount.map(|m| m.amount.abs()).unwrap_or(original.amount);

        // A refund started here whose provider call never answered
        let open = self
            .transactions
            .list_refunds_of(&original.id)
            .await?
            .into_iter()
            .find(|r| r.status.is_open() && r.amount == -refund_amount);
        let refund = match open {
            Some(mut refund) => {
                refund.complete(Some(refund_ref.to_string()), now)?;
                self.transactions.update(&refund).await?;
                refund
            }
            None => {
                let mut refund = Transaction::refund_of(&original, refund_amount, now)?;
                refund.complete(Some(refund_ref.to_string()), now)?;
                self.transactions.insert(&refund).await?;
                refund
            }
        };

        original.mark_refunded()?;
        self.transactions.update(&original).await?;

        info!(
            provider = %provider,
            user_id = %original.user_id,
            transaction_id = %original.id,
            refund_id = %refund.id,
            amount = refund_amount,
            "Provider refund recorded"
        );
        Ok(EventOutcome::Applied)
    }

    /// Row by provider subscription reference, else the user's live paid
    /// row billed through the same provider.
    async fn resolve_subscription(
        &self,
        provider: ProviderKind,
        subscription_ref: Option<&str>,
        user_id: Option<&UserId>,
    ) -> Result<Option<Subscription>, BillingError> {
        if let Some(sub_ref) = subscription_ref {
            if let Some(sub) = self.subscriptions.find_by_provider_ref(provider, sub_ref).await? {
                return Ok(Some(sub));
            }
        }
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        Ok(self
            .subscriptions
            .find_live_by_user(user_id)
            .await?
            .filter(|s| s.provider == Some(provider) && !s.is_free()))
    }
}

struct CheckoutCompleted<'a> {
    provider: ProviderKind,
    provider_ref: &'a str,
    subscription_ref: Option<&'a str>,
    user_id: Option<&'a UserId>,
    plan_code: Option<&'a str>,
    billing_cycle: Option<BillingCycle>,
    amount: Option<&'a Money>,
    payment_id: Option<&'a str>,
}
