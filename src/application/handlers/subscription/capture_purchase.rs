//! CapturePurchaseHandler - captures an approved one-time payment.
//!
//! Only processors that split approval from capture (PayPal orders) need
//! this step. Capture errors follow the code-confirmation rules: a definitive
//! rejection fails the row, while a timeout leaves it open for the provider's
//! webhook or a retry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::{BillingError, TransactionStatus, TransactionType};
use crate::domain::foundation::{Timestamp, TransactionId, UserId};
use crate::ports::{PaymentErrorCode, TransactionRepository};

#[derive(Debug, Clone)]
pub struct CapturePurchaseCommand {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePurchaseResult {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    /// Provider payment id the row now references.
    pub payment_ref: Option<String>,
}

pub struct CapturePurchaseHandler {
    registry: Arc<ProviderRegistry>,
    transactions: Arc<dyn TransactionRepository>,
}

impl CapturePurchaseHandler {
    pub fn new(registry: Arc<ProviderRegistry>, transactions: Arc<dyn TransactionRepository>) -> Self {
        Self {
            registry,
            transactions,
        }
    }

    pub async fn handle(&self, cmd: CapturePurchaseCommand) -> Result<CapturePurchaseResult, BillingError> {
        // 1. Load the user's purchase
        let mut txn = self
            .transactions
            .find_by_id(&cmd.transaction_id)
            .await?
            .filter(|t| t.user_id == cmd.user_id)
            .ok_or_else(|| BillingError::TransactionNotFound(cmd.transaction_id.to_string()))?;
        if txn.transaction_type != TransactionType::OneTime {
            return Err(BillingError::validation("transaction_id", "not a one-time purchase"));
        }

        // Webhook got there first
        if txn.status == TransactionStatus::Completed {
            return Ok(CapturePurchaseResult {
                transaction_id: txn.id,
                status: txn.status,
                payment_ref: txn.provider_transaction_id,
            });
        }
        if !txn.status.is_open() {
            return Err(BillingError::InvalidState(format!(
                "transaction {} is {}, expected pending",
                txn.id, txn.status
            )));
        }
        let order_ref = txn
            .provider_transaction_id
            .clone()
            .ok_or_else(|| BillingError::validation("transaction_id", "transaction has no provider reference"))?;

        // 2. Capture
        let provider = self.registry.get(txn.provider)?;
        let capture_id = match provider.capture_purchase(&order_ref).await {
            Ok(capture_id) => capture_id,
            Err(e) if e.retryable || e.code == PaymentErrorCode::Unsupported => {
                warn!(
                    user_id = %cmd.user_id,
                    transaction_id = %txn.id,
                    provider = %txn.provider,
                    error = %e,
                    "Capture not completed; purchase left pending"
                );
                return Err(e.into());
            }
            Err(e) => {
                warn!(
                    user_id = %cmd.user_id,
                    transaction_id = %txn.id,
                    provider = %txn.provider,
                    error = %e,
                    "Capture rejected"
                );
                txn.fail(Some(e.code.to_string()), e.message.clone(), Timestamp::now())?;
                self.transactions.update(&txn).await?;
                return Err(e.into());
            }
        };

        // 3. Settle
        txn.remember_session_id(&order_ref);
        txn.complete(Some(capture_id.clone()), Timestamp::now())?;
        self.transactions.update(&txn).await?;

        info!(
            user_id = %cmd.user_id,
            transaction_id = %txn.id,
            provider = %txn.provider,
            capture_id = %capture_id,
            "Purchase captured"
        );
        Ok(CapturePurchaseResult {
            transaction_id: txn.id,
            status: txn.status,
            payment_ref: Some(capture_id),
        })
    }
}
