//! Monetary transactions.
//!
//! Transactions are append-only: a row is created `pending` and moves once
//! to a terminal status. A refund is its own row with a negative amount,
//! linked to the original through `refunded_transaction_id`.

use crate::domain::foundation::{
    DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp, TransactionId, UserId,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{BillingCycle, Money, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Subscription,
    OneTime,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Subscription => "subscription",
            TransactionType::OneTime => "one_time",
            TransactionType::Refund => "refund",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(TransactionType::Subscription),
            "one_time" => Ok(TransactionType::OneTime),
            "refund" => Ok(TransactionType::Refund),
            other => Err(ValidationError::invalid_format(
                "transaction_type",
                format!("unknown type '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    /// Payer confirmed (e.g. a BLIK code) and the provider is settling.
    Processing,
    Completed,
    Failed,
    /// A completed payment that has since been refunded.
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    /// Pending and processing rows are still waiting on the provider.
    pub fn is_open(&self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::Processing)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(ValidationError::invalid_format(
                "transaction_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

impl StateMachine for TransactionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use TransactionStatus::*;
        match self {
            Pending => vec![Processing, Completed, Failed],
            Processing => vec![Completed, Failed],
            Completed => vec![Refunded],
            Failed | Refunded => vec![],
        }
    }
}

/// What a checkout needs to remember until the provider confirms it.
///
/// Stored in the pending transaction's metadata so a webhook that carries
/// only the provider reference can still resolve plan and cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Provider session id, kept once the payment id replaces it as the
    /// transaction reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CheckoutMetadata {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// What a one-time purchase remembers until the provider settles it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseMetadata {
    pub item_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl PurchaseMetadata {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// One row of the monetary ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    /// Signed minor units; refunds are negative.
    pub amount: i64,
    pub currency: String,
    pub provider: ProviderKind,
    pub provider_transaction_id: Option<String>,
    pub refunded_transaction_id: Option<TransactionId>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Transaction {
    /// A pending charge awaiting provider confirmation.
    pub fn pending(
        user_id: UserId,
        transaction_type: TransactionType,
        amount: &Money,
        provider: ProviderKind,
        provider_transaction_id: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            subscription_id: None,
            transaction_type,
            status: TransactionStatus::Pending,
            amount: amount.amount,
            currency: amount.currency.clone(),
            provider,
            provider_transaction_id,
            refunded_transaction_id: None,
            description: None,
            metadata: serde_json::Value::Null,
            failure_code: None,
            failure_message: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// A charge the provider already settled (recurring invoice).
    pub fn completed_charge(
        user_id: UserId,
        subscription_id: Option<SubscriptionId>,
        amount: &Money,
        provider: ProviderKind,
        provider_transaction_id: String,
        now: Timestamp,
    ) -> Self {
        let mut txn = Self::pending(
            user_id,
            TransactionType::Subscription,
            amount,
            provider,
            Some(provider_transaction_id),
            now,
        );
        txn.subscription_id = subscription_id;
        txn.status = TransactionStatus::Completed;
        txn.completed_at = Some(now);
        txn
    }

    /// A one-time purchase the provider already settled.
    pub fn completed_purchase(
        user_id: UserId,
        amount: &Money,
        provider: ProviderKind,
        provider_transaction_id: String,
        now: Timestamp,
    ) -> Self {
        let mut txn = Self::completed_charge(user_id, None, amount, provider, provider_transaction_id, now);
        txn.transaction_type = TransactionType::OneTime;
        txn
    }

    /// A pending refund row against `original`. The stored amount is negative.
    pub fn refund_of(original: &Transaction, amount: i64, now: Timestamp) -> Result<Self, DomainError> {
        if original.status != TransactionStatus::Completed {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Cannot refund a {} transaction", original.status),
            )
            .with_detail("transaction_id", original.id.to_string()));
        }
        if original.transaction_type == TransactionType::Refund {
            return Err(DomainError::validation("transaction_id", "Cannot refund a refund"));
        }
        if amount <= 0 || amount > original.amount {
            return Err(ValidationError::out_of_range("amount", 1, original.amount, amount).into());
        }

        Ok(Self {
            id: TransactionId::new(),
            user_id: original.user_id.clone(),
            subscription_id: original.subscription_id,
            transaction_type: TransactionType::Refund,
            status: TransactionStatus::Pending,
            amount: -amount,
            currency: original.currency.clone(),
            provider: original.provider,
            provider_transaction_id: None,
            refunded_transaction_id: Some(original.id),
            description: Some(format!("Refund of {}", original.id)),
            metadata: serde_json::Value::Null,
            failure_code: None,
            failure_message: None,
            created_at: now,
            completed_at: None,
        })
    }

    pub fn money(&self) -> Money {
        Money::new(self.amount, &self.currency)
    }

    pub fn checkout_metadata(&self) -> Option<CheckoutMetadata> {
        CheckoutMetadata::from_value(&self.metadata)
    }

    pub fn purchase_metadata(&self) -> Option<PurchaseMetadata> {
        PurchaseMetadata::from_value(&self.metadata)
    }

    /// Provider token for follow-up calls, recorded at checkout.
    pub fn confirmation_token(&self) -> Option<&str> {
        self.metadata.get("token").and_then(serde_json::Value::as_str)
    }

    /// Provider session id, once a payment id has replaced it as the
    /// transaction reference.
    pub fn session_id(&self) -> Option<&str> {
        self.metadata.get("session_id").and_then(serde_json::Value::as_str)
    }

    /// Remember the provider session id in the metadata.
    pub fn remember_session_id(&mut self, session_id: &str) {
        if self.metadata.is_null() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let serde_json::Value::Object(map) = &mut self.metadata {
            map.insert("session_id".to_string(), serde_json::Value::String(session_id.to_string()));
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mark_processing(&mut self) -> Result<(), DomainError> {
        self.transition_to(TransactionStatus::Processing)
    }

    pub fn complete(
        &mut self,
        provider_transaction_id: Option<String>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.transition_to(TransactionStatus::Completed)?;
        if provider_transaction_id.is_some() {
            self.provider_transaction_id = provider_transaction_id;
        }
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        code: Option<String>,
        message: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.transition_to(TransactionStatus::Failed)?;
        self.failure_code = code;
        self.failure_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn mark_refunded(&mut self) -> Result<(), DomainError> {
        self.transition_to(TransactionStatus::Refunded)
    }

    fn transition_to(&mut self, target: TransactionStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Cannot move transaction from {} to {}", self.status, target),
            )
            .with_detail("transaction_id", self.id.to_string())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(amount: i64) -> Transaction {
        let mut txn = Transaction::pending(
            UserId::new("u1").unwrap(),
            TransactionType::Subscription,
            &Money::new(amount, "PLN"),
            ProviderKind::Stripe,
            Some("cs_1".into()),
            Timestamp::now(),
        );
        txn.complete(Some("pi_1".into()), Timestamp::now()).unwrap();
        txn
    }

    #[test]
    fn pending_moves_once_to_terminal() {
        let mut txn = Transaction::pending(
            UserId::new("u1").unwrap(),
            TransactionType::OneTime,
            &Money::new(500, "pln"),
            ProviderKind::Przelewy24,
            None,
            Timestamp::now(),
        );
        txn.mark_processing().unwrap();
        txn.fail(Some("declined".into()), "BLIK code rejected", Timestamp::now())
            .unwrap();

        assert_eq!(txn.status, TransactionStatus::Failed);
        assert!(txn.complete(None, Timestamp::now()).is_err());
    }

    #[test]
    fn complete_keeps_existing_ref_when_none_given() {
        let mut txn = Transaction::pending(
            UserId::new("u1").unwrap(),
            TransactionType::Subscription,
            &Money::new(1999, "PLN"),
            ProviderKind::PayPal,
            Some("I-SUB".into()),
            Timestamp::now(),
        );
        txn.complete(None, Timestamp::now()).unwrap();
        assert_eq!(txn.provider_transaction_id.as_deref(), Some("I-SUB"));
        assert!(txn.completed_at.is_some());
    }

    #[test]
    fn refund_is_negative_and_linked() {
        let original = charge(3999);
        let refund = Transaction::refund_of(&original, 1000, Timestamp::now()).unwrap();

        assert_eq!(refund.amount, -1000);
        assert_eq!(refund.transaction_type, TransactionType::Refund);
        assert_eq!(refund.refunded_transaction_id, Some(original.id));
        assert_eq!(refund.status, TransactionStatus::Pending);
    }

    #[test]
    fn refund_amount_is_bounded_by_original() {
        let original = charge(3999);
        assert!(Transaction::refund_of(&original, 0, Timestamp::now()).is_err());
        assert!(Transaction::refund_of(&original, 4000, Timestamp::now()).is_err());
        assert!(Transaction::refund_of(&original, 3999, Timestamp::now()).is_ok());
    }

    #[test]
    fn only_completed_can_be_refunded() {
        let mut original = charge(100);
        original.mark_refunded().unwrap();
        let err = Transaction::refund_of(&original, 100, Timestamp::now()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidStateTransition);
    }

    #[test]
    fn checkout_metadata_round_trips_through_json() {
        let meta = CheckoutMetadata {
            plan_code: "premium".into(),
            billing_cycle: BillingCycle::Yearly,
            token: Some("tok".into()),
            session_id: None,
        };
        let txn = charge(1).with_metadata(serde_json::to_value(&meta).unwrap());
        assert_eq!(txn.checkout_metadata(), Some(meta));
        assert_eq!(txn.confirmation_token(), Some("tok"));
    }

    #[test]
    fn purchase_metadata_is_not_checkout_metadata() {
        let meta = PurchaseMetadata {
            item_code: "course-101".into(),
            token: None,
            session_id: None,
        };
        let mut txn = charge(1).with_metadata(serde_json::to_value(&meta).unwrap());
        assert_eq!(txn.checkout_metadata(), None);
        assert_eq!(txn.purchase_metadata(), Some(meta));

        txn.remember_session_id("cs_9");
        assert_eq!(txn.session_id(), Some("cs_9"));
        assert_eq!(txn.purchase_metadata().unwrap().session_id.as_deref(), Some("cs_9"));
    }

    #[test]
    fn completed_purchase_is_one_time() {
        let txn = Transaction::completed_purchase(
            UserId::new("u1").unwrap(),
            &Money::new(4900, "PLN"),
            ProviderKind::PayPal,
            "CAP-1".into(),
            Timestamp::now(),
        );
        assert_eq!(txn.transaction_type, TransactionType::OneTime);
        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.subscription_id, None);
    }
}
