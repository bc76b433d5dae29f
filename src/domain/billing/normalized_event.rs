//! Provider-neutral webhook events.
//!
//! Each payment adapter maps its raw payloads into [`NormalizedEvent`]; the
//! lifecycle code only ever matches on [`NormalizedEventKind`].

use serde::{Deserialize, Serialize};

use crate::domain::foundation::UserId;

use super::{BillingCycle, Money, ProviderKind};

/// A verified webhook, reduced to what the billing engine acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub provider: ProviderKind,
    /// Unique per provider; the ledger deduplicates on it.
    pub provider_event_id: String,
    /// Provider's own event type string, kept for logs and the ledger.
    pub raw_type: String,
    pub kind: NormalizedEventKind,
}

impl NormalizedEvent {
    pub fn new(
        provider: ProviderKind,
        provider_event_id: impl Into<String>,
        raw_type: impl Into<String>,
        kind: NormalizedEventKind,
    ) -> Self {
        Self {
            provider,
            provider_event_id: provider_event_id.into(),
            raw_type: raw_type.into(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// User carried by the event itself, if any.
    pub fn user_id(&self) -> Option<&UserId> {
        match &self.kind {
            NormalizedEventKind::CheckoutCompleted { user_id, .. }
            | NormalizedEventKind::InvoicePaid { user_id, .. }
            | NormalizedEventKind::PaymentFailed { user_id, .. }
            | NormalizedEventKind::SubscriptionCancelled { user_id, .. } => user_id.as_ref(),
            NormalizedEventKind::Refunded { .. } | NormalizedEventKind::Unhandled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEventKind {
    /// Payer finished checkout; a subscription should now exist.
    CheckoutCompleted {
        /// Correlates with the pending checkout transaction.
        provider_ref: String,
        /// Recurring subscription id at the provider, if it has one.
        subscription_ref: Option<String>,
        user_id: Option<UserId>,
        plan_code: Option<String>,
        billing_cycle: Option<BillingCycle>,
        amount: Option<Money>,
        /// Provider payment id once money actually moved. When absent the
        /// checkout transaction stays open until the first invoice settles.
        payment_id: Option<String>,
    },

    /// Recurring charge settled.
    InvoicePaid {
        /// Payment identifier; becomes the transaction reference.
        provider_ref: String,
        subscription_ref: Option<String>,
        user_id: Option<UserId>,
        amount: Option<Money>,
    },

    PaymentFailed {
        provider_ref: String,
        subscription_ref: Option<String>,
        user_id: Option<UserId>,
        reason: Option<String>,
    },

    SubscriptionCancelled {
        /// Provider subscription reference.
        provider_ref: String,
        user_id: Option<UserId>,
    },

    /// Provider-initiated refund of an earlier payment.
    Refunded {
        /// Reference of the original payment.
        provider_ref: String,
        refund_ref: String,
        amount: Option<Money>,
    },

    /// Provider type the engine does not act on.
    Unhandled,
}

impl NormalizedEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            NormalizedEventKind::CheckoutCompleted { .. } => "checkout_completed",
            NormalizedEventKind::InvoicePaid { .. } => "invoice_paid",
            NormalizedEventKind::PaymentFailed { .. } => "payment_failed",
            NormalizedEventKind::SubscriptionCancelled { .. } => "subscription_cancelled",
            NormalizedEventKind::Refunded { .. } => "refunded",
            NormalizedEventKind::Unhandled => "unhandled",
        }
    }
}
