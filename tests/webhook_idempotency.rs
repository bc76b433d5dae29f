//! Checkout to webhook flows, redelivery and out-of-order events.

mod common;

use billing_engine::application::handlers::SUPERSEDED_CODE;
use billing_engine::application::{
    ConfirmPaymentCommand, EventOutcome, HandleWebhookResult, StartCheckoutCommand, WebhookMaintenanceHandler,
};
use billing_engine::domain::billing::{
    BillingCycle, BillingError, Money, NormalizedEventKind, ProviderKind, SubscriptionStatus, TransactionStatus,
};
use billing_engine::domain::foundation::UserId;
use billing_engine::ports::{CustomerDetails, PaymentError, SubscriptionRepository, WebhookStatus};

use common::{stripe_webhook, user, webhook, Harness, Sent};

fn checkout_command(user_id: UserId, plan: &str) -> StartCheckoutCommand {
    StartCheckoutCommand {
        user_id,
        plan_code: plan.to_string(),
        billing_cycle: BillingCycle::Monthly,
        provider: ProviderKind::Stripe,
        customer: CustomerDetails::default(),
        success_url: None,
        cancel_url: None,
    }
}

fn checkout_completed(session: &str, sub_ref: &str, payment_id: Option<&str>) -> NormalizedEventKind {
    NormalizedEventKind::CheckoutCompleted {
        provider_ref: session.to_string(),
        subscription_ref: Some(sub_ref.to_string()),
        user_id: None,
        plan_code: None,
        billing_cycle: None,
        amount: None,
        payment_id: payment_id.map(str::to_string),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Happy path
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn checkout_webhook_creates_subscription_and_completes_payment() {
    let h = Harness::new();
    let alice = user("alice");

    let started = h.checkout().handle(checkout_command(alice.clone(), "basic")).await.unwrap();
    let session = started.session.session_id.clone();

    let result = h
        .webhooks()
        .handle(stripe_webhook("evt_1", checkout_completed(&session, "sub_1", Some("in_1"))))
        .await
        .unwrap();
    assert!(matches!(
        result,
        HandleWebhookResult::Processed {
            outcome: EventOutcome::Applied,
            ..
        }
    ));

    let live = h.lifecycle.current(&alice).await.unwrap().unwrap();
    assert_eq!(live.plan_code, "basic");
    assert_eq!(live.provider, Some(ProviderKind::Stripe));
    assert_eq!(live.provider_subscription_ref.as_deref(), Some("sub_1"));

    let txns = h.store.all_transactions().await;
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].status, TransactionStatus::Completed);
    assert_eq!(txns[0].provider_transaction_id.as_deref(), Some("in_1"));
    assert_eq!(txns[0].subscription_id, Some(live.id));
    assert_eq!(h.notifier.sent(), vec![Sent::Confirmation(alice)]);
}

#[tokio::test]
async fn redelivered_event_is_a_duplicate_and_applies_once() {
    let h = Harness::new();
    let bob = user("bob");
    let started = h.checkout().handle(checkout_command(bob.clone(), "premium")).await.unwrap();
    let event = checkout_completed(&started.session.session_id, "sub_2", Some("in_2"));

    let handler = h.webhooks();
    handler.handle(stripe_webhook("evt_2", event.clone())).await.unwrap();
    let again = handler.handle(stripe_webhook("evt_2", event)).await.unwrap();

    assert_eq!(
        again,
        HandleWebhookResult::Duplicate {
            event_id: "evt_2".to_string()
        }
    );
    assert_eq!(h.store.subscriptions_for(&bob).await.len(), 1);
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.store.webhook_events().await.len(), 1);
}

#[tokio::test]
async fn a_new_event_for_the_same_subscription_reuses_the_row() {
    let h = Harness::new();
    let carol = user("carol");
    let started = h.checkout().handle(checkout_command(carol.clone(), "basic")).await.unwrap();
    let event = checkout_completed(&started.session.session_id, "sub_3", Some("in_3"));

    let handler = h.webhooks();
    handler.handle(stripe_webhook("evt_3a", event.clone())).await.unwrap();
    let second = handler.handle(stripe_webhook("evt_3b", event)).await.unwrap();

    assert!(matches!(
        second,
        HandleWebhookResult::Processed {
            outcome: EventOutcome::NoAction(_),
            ..
        }
    ));
    assert_eq!(h.store.subscriptions_for(&carol).await.len(), 1);
}

// ════════════════════════════════════════════════════════════════════════════════
// Out of order
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn invoice_before_checkout_records_the_payment_once() {
    let h = Harness::new();
    let dave = user("dave");
    let started = h.checkout().handle(checkout_command(dave.clone(), "basic")).await.unwrap();
    let checkout_txn = started.transaction_id;

    let handler = h.webhooks();
    handler
        .handle(stripe_webhook(
            "evt_inv",
            NormalizedEventKind::InvoicePaid {
                provider_ref: "in_4".to_string(),
                subscription_ref: Some("sub_4".to_string()),
                user_id: Some(dave.clone()),
                amount: Some(Money::new(1999, "PLN")),
            },
        ))
        .await
        .unwrap();
    handler
        .handle(stripe_webhook(
            "evt_chk",
            checkout_completed(&started.session.session_id, "sub_4", Some("in_4")),
        ))
        .await
        .unwrap();

    let txns = h.store.all_transactions().await;
    let completed: Vec<_> = txns.iter().filter(|t| t.status == TransactionStatus::Completed).collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].provider_transaction_id.as_deref(), Some("in_4"));

    let superseded = txns.iter().find(|t| t.id == checkout_txn).unwrap();
    assert_eq!(superseded.status, TransactionStatus::Failed);
    assert_eq!(superseded.failure_code.as_deref(), Some(SUPERSEDED_CODE));

    assert_eq!(h.store.live_count(&dave).await, 1);
}

#[tokio::test]
async fn payment_failure_then_invoice_restores_the_subscription() {
    let h = Harness::new();
    let erin = user("erin");
    let started = h.checkout().handle(checkout_command(erin.clone(), "basic")).await.unwrap();
    let handler = h.webhooks();
    handler
        .handle(stripe_webhook(
            "evt_5a",
            checkout_completed(&started.session.session_id, "sub_5", Some("in_5")),
        ))
        .await
        .unwrap();

    handler
        .handle(stripe_webhook(
            "evt_5b",
            NormalizedEventKind::PaymentFailed {
                provider_ref: "in_6".to_string(),
                subscription_ref: Some("sub_5".to_string()),
                user_id: None,
                reason: Some("card expired".to_string()),
            },
        ))
        .await
        .unwrap();
    let past_due = h.lifecycle.current(&erin).await.unwrap().unwrap();
    assert_eq!(past_due.status, SubscriptionStatus::PastDue);

    handler
        .handle(stripe_webhook(
            "evt_5c",
            NormalizedEventKind::InvoicePaid {
                provider_ref: "in_6".to_string(),
                subscription_ref: Some("sub_5".to_string()),
                user_id: None,
                amount: Some(Money::new(1999, "PLN")),
            },
        ))
        .await
        .unwrap();
    let active = h.lifecycle.current(&erin).await.unwrap().unwrap();
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert!(h.notifier.sent().contains(&Sent::PaymentFailed(erin)));
}

#[tokio::test]
async fn unmatched_payment_events_leave_the_free_row_alone() {
    let h = Harness::new();
    let frank = user("frank");
    let free = h.lifecycle.activate_free(&frank).await.unwrap();

    let handler = h.webhooks();
    let failed = handler
        .handle(stripe_webhook(
            "evt_6a",
            NormalizedEventKind::PaymentFailed {
                provider_ref: "in_unknown".to_string(),
                subscription_ref: Some("sub_unknown".to_string()),
                user_id: Some(frank.clone()),
                reason: Some("card declined".to_string()),
            },
        ))
        .await
        .unwrap();
    assert!(matches!(
        failed,
        HandleWebhookResult::Processed {
            outcome: EventOutcome::NoAction(_),
            ..
        }
    ));

    handler
        .handle(stripe_webhook(
            "evt_6b",
            NormalizedEventKind::InvoicePaid {
                provider_ref: "in_other".to_string(),
                subscription_ref: Some("sub_unknown".to_string()),
                user_id: Some(frank.clone()),
                amount: Some(Money::new(1999, "PLN")),
            },
        ))
        .await
        .unwrap();

    let live = h.lifecycle.current(&frank).await.unwrap().unwrap();
    assert_eq!(live.id, free.id);
    assert_eq!(live.status, SubscriptionStatus::Active);
    assert_eq!(live.current_period_end, free.current_period_end);
    assert!(h.notifier.sent().is_empty());

    // The money is still on the ledger, just not attached to the free row
    let charge = h
        .store
        .all_transactions()
        .await
        .into_iter()
        .find(|t| t.provider_transaction_id.as_deref() == Some("in_other"))
        .unwrap();
    assert_eq!(charge.subscription_id, None);
}

// ════════════════════════════════════════════════════════════════════════════════
// Failures
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failed_application_is_listed_for_reconciliation() {
    let h = Harness::new();
    let frank = user("frank");
    let started = h.checkout().handle(checkout_command(frank.clone(), "basic")).await.unwrap();

    h.store.set_fail_writes(true);
    let err = h
        .webhooks()
        .handle(stripe_webhook(
            "evt_7",
            checkout_completed(&started.session.session_id, "sub_7", Some("in_7")),
        ))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    h.store.set_fail_writes(false);

    let failed = WebhookMaintenanceHandler::new(h.store.clone()).list_failed(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].event_id, "evt_7");
    assert_eq!(failed[0].status, WebhookStatus::Failed);
    assert!(h.store.find_live_by_user(&frank).await.unwrap().is_none());
}

#[tokio::test]
async fn rejected_signature_records_nothing() {
    let h = Harness::new();
    h.stripe.reject_webhooks();

    let err = h
        .webhooks()
        .handle(stripe_webhook("evt_8", NormalizedEventKind::Unhandled))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::InvalidWebhookSignature));
    assert!(h.store.webhook_events().await.is_empty());
}

// ════════════════════════════════════════════════════════════════════════════════
// BLIK confirmation
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn timed_out_code_submission_is_settled_by_the_notification() {
    let h = Harness::new();
    let gina = user("gina");

    let mut command = checkout_command(gina.clone(), "basic");
    command.provider = ProviderKind::Przelewy24;
    let started = h.checkout().handle(command).await.unwrap();
    assert!(started.session.requires_confirmation_code);

    // The bank took the code but the answer never came back
    h.p24
        .set_method_error("confirm_with_code", PaymentError::timeout("gateway timeout"));
    let err = h
        .confirmations()
        .handle(ConfirmPaymentCommand {
            user_id: gina.clone(),
            transaction_id: started.transaction_id,
            code: "777123".to_string(),
        })
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let txns = h.store.all_transactions().await;
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].status, TransactionStatus::Pending);

    let result = h
        .webhooks()
        .handle(webhook(
            ProviderKind::Przelewy24,
            "p24_evt_1",
            NormalizedEventKind::CheckoutCompleted {
                provider_ref: started.session.session_id.clone(),
                subscription_ref: None,
                user_id: Some(gina.clone()),
                plan_code: None,
                billing_cycle: None,
                amount: Some(Money::new(1999, "PLN")),
                payment_id: Some("p24_order_1".to_string()),
            },
        ))
        .await
        .unwrap();
    assert!(matches!(
        result,
        HandleWebhookResult::Processed {
            outcome: EventOutcome::Applied,
            ..
        }
    ));

    let live = h.lifecycle.current(&gina).await.unwrap().unwrap();
    assert_eq!(live.plan_code, "basic");
    let txns = h.store.all_transactions().await;
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].id, started.transaction_id);
    assert_eq!(txns[0].status, TransactionStatus::Completed);
    assert_eq!(txns[0].provider_transaction_id.as_deref(), Some("p24_order_1"));
    assert_eq!(txns[0].subscription_id, Some(live.id));
}
