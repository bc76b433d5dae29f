//! ConfirmPaymentHandler - submits a one-time confirmation code (BLIK).
//!
//! Success only means the bank accepted the code; the transaction moves to
//! `processing` and is completed later by the provider's notification. A
//! definitive rejection fails the transaction. A timeout or transport error
//! leaves it `pending`, since the bank may have taken the code anyway.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::{BillingError, TransactionStatus};
use crate::domain::foundation::{Timestamp, TransactionId, UserId};
use crate::ports::TransactionRepository;

#[derive(Debug, Clone)]
pub struct ConfirmPaymentCommand {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPaymentResult {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
}

pub struct ConfirmPaymentHandler {
    registry: Arc<ProviderRegistry>,
    transactions: Arc<dyn TransactionRepository>,
}

impl ConfirmPaymentHandler {
    pub fn new(registry: Arc<ProviderRegistry>, transactions: Arc<dyn TransactionRepository>) -> Self {
        Self {
            registry,
            transactions,
        }
    }

    pub async fn handle(&self, cmd: ConfirmPaymentCommand) -> Result<ConfirmPaymentResult, BillingError> {
        // 1. Validate code
        let code = cmd.code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(BillingError::validation("code", "must be 6 digits"));
        }

        // 2. Load the user's pending transaction
        let mut txn = self
            .transactions
            .find_by_id(&cmd.transaction_id)
            .await?
            .filter(|t| t.user_id == cmd.user_id)
            .ok_or_else(|| BillingError::TransactionNotFound(cmd.transaction_id.to_string()))?;
        if txn.status != TransactionStatus::Pending {
            return Err(BillingError::InvalidState(format!(
                "transaction {} is {}, expected pending",
                txn.id, txn.status
            )));
        }
        let token = txn
            .confirmation_token()
            .map(str::to_string)
            .ok_or_else(|| BillingError::validation("transaction_id", "transaction has no confirmation token"))?;

        // 3. Submit the code
        let provider = self.registry.get(txn.provider)?;
        if let Err(e) = provider.confirm_with_code(&token, code).await {
            if e.retryable {
                warn!(
                    user_id = %cmd.user_id,
                    transaction_id = %txn.id,
                    provider = %txn.provider,
                    error = %e,
                    "Confirmation outcome unknown; transaction left pending"
                );
                return Err(e.into());
            }
            warn!(
                user_id = %cmd.user_id,
                transaction_id = %txn.id,
                provider = %txn.provider,
                error = %e,
                "Confirmation code rejected"
            );
            txn.fail(Some(e.code.to_string()), e.message.clone(), Timestamp::now())?;
            self.transactions.update(&txn).await?;
            return Err(e.into());
        }

        // 4. Await the provider's notification
        txn.mark_processing()?;
        self.transactions.update(&txn).await?;

        info!(user_id = %cmd.user_id, transaction_id = %txn.id, "Confirmation code accepted");
        Ok(ConfirmPaymentResult {
            transaction_id: txn.id,
            status: txn.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::payments::MockPaymentProvider;
    use crate::domain::billing::{
        BillingCycle, CheckoutMetadata, Money, ProviderKind, Transaction, TransactionType,
    };
    use crate::ports::{PaymentError, PaymentErrorCode};

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    async fn setup(mock: MockPaymentProvider) -> (ConfirmPaymentHandler, Arc<InMemoryBillingStore>, Transaction) {
        let store = Arc::new(InMemoryBillingStore::new());
        let meta = CheckoutMetadata {
            plan_code: "basic".into(),
            billing_cycle: BillingCycle::Monthly,
            token: Some("tok_1".into()),
            session_id: None,
        };
        let txn = Transaction::pending(
            user(),
            TransactionType::Subscription,
            &Money::new(1999, "PLN"),
            ProviderKind::Przelewy24,
            Some("session_1".into()),
            Timestamp::now(),
        )
        .with_metadata(serde_json::to_value(meta).unwrap());
        TransactionRepository::insert(store.as_ref(), &txn).await.unwrap();

        let registry = ProviderRegistry::new().with(Arc::new(mock));
        (ConfirmPaymentHandler::new(Arc::new(registry), store.clone()), store, txn)
    }

    fn command(txn: &Transaction, code: &str) -> ConfirmPaymentCommand {
        ConfirmPaymentCommand {
            user_id: user(),
            transaction_id: txn.id,
            code: code.to_string(),
        }
    }

    #[tokio::test]
    async fn accepted_code_moves_to_processing() {
        let mock = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        let (handler, store, txn) = setup(mock.clone()).await;

        let result = handler.handle(command(&txn, "123456")).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Processing);
        assert_eq!(mock.calls()[0].args, vec!["tok_1".to_string(), "123456".to_string()]);

        let stored = TransactionRepository::find_by_id(store.as_ref(), &txn.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn malformed_code_never_reaches_provider() {
        let mock = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        let (handler, _, txn) = setup(mock.clone()).await;

        for code in ["12345", "12345a", "1234567"] {
            let err = handler.handle(command(&txn, code)).await.unwrap_err();
            assert!(matches!(err, BillingError::Validation { .. }));
        }
        assert!(!mock.was_called("confirm_with_code"));
    }

    #[tokio::test]
    async fn rejected_code_fails_transaction() {
        let mock = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        mock.set_method_error(
            "confirm_with_code",
            PaymentError::new(PaymentErrorCode::CardDeclined, "code expired"),
        );
        let (handler, store, txn) = setup(mock).await;

        let err = handler.handle(command(&txn, "123456")).await.unwrap_err();
        assert!(matches!(err, BillingError::Provider { .. }));

        let stored = TransactionRepository::find_by_id(store.as_ref(), &txn.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.failure_message.as_deref(), Some("code expired"));
    }

    #[tokio::test]
    async fn timeout_leaves_transaction_pending() {
        let mock = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        mock.set_method_error("confirm_with_code", PaymentError::timeout("bank did not answer"));
        let (handler, store, txn) = setup(mock.clone()).await;

        let err = handler.handle(command(&txn, "123456")).await.unwrap_err();
        assert!(err.is_retryable());

        let stored = TransactionRepository::find_by_id(store.as_ref(), &txn.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert_eq!(stored.failure_code, None);

        // The payer can submit again once the bank answers
        mock.clear_errors();
        let result = handler.handle(command(&txn, "123456")).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn other_users_transaction_is_not_found() {
        let mock = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        let (handler, _, txn) = setup(mock).await;

        let mut cmd = command(&txn, "123456");
        cmd.user_id = UserId::new("u2").unwrap();
        let err = handler.handle(cmd).await.unwrap_err();
        assert!(matches!(err, BillingError::TransactionNotFound(_)));
    }
}
