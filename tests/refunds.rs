//! Operator and provider refunds share one ledger.

mod common;

use billing_engine::application::{
    EventOutcome, HandleWebhookResult, RefundTransactionCommand, StartCheckoutCommand,
};
use billing_engine::domain::billing::{
    BillingCycle, Money, NormalizedEventKind, ProviderKind, Transaction, TransactionStatus, TransactionType,
};
use billing_engine::ports::{CustomerDetails, PaymentError};

use common::{stripe_webhook, user, Harness};

/// Runs a Stripe checkout through to a completed payment `payment_id`.
async fn paid_checkout(h: &Harness, user_id: &str, payment_id: &str) -> Transaction {
    let started = h
        .checkout()
        .handle(StartCheckoutCommand {
            user_id: user(user_id),
            plan_code: "premium".to_string(),
            billing_cycle: BillingCycle::Monthly,
            provider: ProviderKind::Stripe,
            customer: CustomerDetails::default(),
            success_url: None,
            cancel_url: None,
        })
        .await
        .unwrap();
    h.webhooks()
        .handle(stripe_webhook(
            &format!("evt_{}", payment_id),
            NormalizedEventKind::CheckoutCompleted {
                provider_ref: started.session.session_id.clone(),
                subscription_ref: Some(format!("sub_{}", user_id)),
                user_id: None,
                plan_code: None,
                billing_cycle: None,
                amount: None,
                payment_id: Some(payment_id.to_string()),
            },
        ))
        .await
        .unwrap();

    h.store
        .all_transactions()
        .await
        .into_iter()
        .find(|t| t.id == started.transaction_id)
        .unwrap()
}

fn refunds_of(txns: &[Transaction], original: &Transaction) -> usize {
    txns.iter()
        .filter(|t| t.transaction_type == TransactionType::Refund && t.refunded_transaction_id == Some(original.id))
        .count()
}

// ════════════════════════════════════════════════════════════════════════════════
// Operator refunds
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn operator_refund_then_provider_echo_records_one_refund() {
    let h = Harness::new();
    let payment = paid_checkout(&h, "alice", "in_1").await;
    assert_eq!(payment.status, TransactionStatus::Completed);

    let result = h
        .refunds()
        .handle(RefundTransactionCommand {
            transaction_id: payment.id,
            amount: None,
            reason: Some("requested by customer".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(result.refund.status, TransactionStatus::Completed);
    assert_eq!(result.refund.amount, -payment.amount);
    assert_eq!(result.original.status, TransactionStatus::Refunded);
    let refund_ref = result.refund.provider_transaction_id.clone().unwrap();

    let echo = h
        .webhooks()
        .handle(stripe_webhook(
            "evt_refund",
            NormalizedEventKind::Refunded {
                provider_ref: "in_1".to_string(),
                refund_ref,
                amount: Some(Money::new(payment.amount, "PLN")),
            },
        ))
        .await
        .unwrap();
    assert!(matches!(
        echo,
        HandleWebhookResult::Processed {
            outcome: EventOutcome::NoAction(_),
            ..
        }
    ));

    let txns = h.store.all_transactions().await;
    assert_eq!(refunds_of(&txns, &payment), 1);
}

#[tokio::test]
async fn provider_outage_leaves_refund_pending_until_the_echo() {
    let h = Harness::new();
    let payment = paid_checkout(&h, "bob", "in_2").await;
    h.stripe.set_method_error("refund", PaymentError::timeout("gateway timeout"));

    let err = h
        .refunds()
        .handle(RefundTransactionCommand {
            transaction_id: payment.id,
            amount: Some(500),
            reason: None,
        })
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let txns = h.store.all_transactions().await;
    let pending = txns
        .iter()
        .find(|t| t.transaction_type == TransactionType::Refund)
        .unwrap()
        .clone();
    assert_eq!(pending.status, TransactionStatus::Pending);
    let original = txns.iter().find(|t| t.id == payment.id).unwrap();
    assert_eq!(original.status, TransactionStatus::Completed);

    // Stripe did refund; its notification settles the same row
    let echo = h
        .webhooks()
        .handle(stripe_webhook(
            "evt_re_late",
            NormalizedEventKind::Refunded {
                provider_ref: "in_2".to_string(),
                refund_ref: "re_late".to_string(),
                amount: Some(Money::new(500, "PLN")),
            },
        ))
        .await
        .unwrap();
    assert!(matches!(
        echo,
        HandleWebhookResult::Processed {
            outcome: EventOutcome::Applied,
            ..
        }
    ));

    let txns = h.store.all_transactions().await;
    assert_eq!(refunds_of(&txns, &payment), 1);
    let settled = txns.iter().find(|t| t.id == pending.id).unwrap();
    assert_eq!(settled.status, TransactionStatus::Completed);
    assert_eq!(settled.provider_transaction_id.as_deref(), Some("re_late"));
}

#[tokio::test]
async fn provider_rejection_leaves_a_failed_refund_row() {
    let h = Harness::new();
    let payment = paid_checkout(&h, "bert", "in_4").await;
    h.stripe
        .set_method_error("refund", PaymentError::invalid_request("charge already refunded"));

    let err = h
        .refunds()
        .handle(RefundTransactionCommand {
            transaction_id: payment.id,
            amount: Some(500),
            reason: None,
        })
        .await
        .unwrap_err();
    assert!(!err.is_retryable());

    let txns = h.store.all_transactions().await;
    let refund = txns
        .iter()
        .find(|t| t.transaction_type == TransactionType::Refund)
        .unwrap();
    assert_eq!(refund.status, TransactionStatus::Failed);
    let original = txns.iter().find(|t| t.id == payment.id).unwrap();
    assert_eq!(original.status, TransactionStatus::Completed);
}

// ════════════════════════════════════════════════════════════════════════════════
// Provider refunds
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn provider_initiated_partial_refund_is_recorded() {
    let h = Harness::new();
    let payment = paid_checkout(&h, "carol", "in_3").await;

    let result = h
        .webhooks()
        .handle(stripe_webhook(
            "evt_re_1",
            NormalizedEventKind::Refunded {
                provider_ref: "in_3".to_string(),
                refund_ref: "re_1".to_string(),
                amount: Some(Money::new(1000, "PLN")),
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

    let txns = h.store.all_transactions().await;
    let refund = txns
        .iter()
        .find(|t| t.provider_transaction_id.as_deref() == Some("re_1"))
        .unwrap();
    assert_eq!(refund.amount, -1000);
    assert_eq!(refund.refunded_transaction_id, Some(payment.id));
    assert!(!h.stripe.was_called("refund"));
}

#[tokio::test]
async fn refund_for_unknown_payment_is_ignored() {
    let h = Harness::new();

    let result = h
        .webhooks()
        .handle(stripe_webhook(
            "evt_re_2",
            NormalizedEventKind::Refunded {
                provider_ref: "in_missing".to_string(),
                refund_ref: "re_2".to_string(),
                amount: None,
            },
        ))
        .await
        .unwrap();

    assert!(matches!(
        result,
        HandleWebhookResult::Processed {
            outcome: EventOutcome::NoAction(_),
            ..
        }
    ));
    assert!(h.store.all_transactions().await.is_empty());
}
