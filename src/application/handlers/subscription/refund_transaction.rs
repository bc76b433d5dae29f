//! RefundTransactionHandler - operator-initiated refunds.
//!
//! The refund row is written `pending` before the provider is called and
//! finalized from the provider's answer, so an interrupted call leaves a
//! visible row instead of a silent gap. Only a definitive rejection fails
//! the row; after a timeout it stays `pending` until the provider's refund
//! notification completes it.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::{BillingError, Transaction};
use crate::domain::foundation::{Timestamp, TransactionId};
use crate::ports::{RefundRequest, TransactionRepository};

#[derive(Debug, Clone)]
pub struct RefundTransactionCommand {
    pub transaction_id: TransactionId,
    /// Minor units; defaults to the full original amount.
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundTransactionResult {
    pub refund: Transaction,
    pub original: Transaction,
}

pub struct RefundTransactionHandler {
    registry: Arc<ProviderRegistry>,
    transactions: Arc<dyn TransactionRepository>,
}

impl RefundTransactionHandler {
    pub fn new(registry: Arc<ProviderRegistry>, transactions: Arc<dyn TransactionRepository>) -> Self {
        Self {
            registry,
            transactions,
        }
    }

    pub async fn handle(&self, cmd: RefundTransactionCommand) -> Result<RefundTransactionResult, BillingError> {
        // 1. Load and check the original
        let mut original = self
            .transactions
            .find_by_id(&cmd.transaction_id)
            .await?
            .ok_or_else(|| BillingError::TransactionNotFound(cmd.transaction_id.to_string()))?;
        let provider_ref = original.provider_transaction_id.clone().ok_or_else(|| {
            BillingError::validation("transaction_id", "transaction has no provider reference")
        })?;
        let provider = self.registry.get(original.provider)?;

        let now = Timestamp::now();
        let amount = cmd.amount.unwrap_or(original.amount);
        let mut refund = Transaction::refund_of(&original, amount, now)?;
        if let Some(reason) = &cmd.reason {
            refund = refund.with_description(reason.clone());
        }

        // 2. Pending refund row
        self.transactions.insert(&refund).await?;

        // 3. Provider call
        let request = RefundRequest {
            provider_transaction_id: provider_ref,
            amount: refund.money().negated(),
            reason: cmd.reason.clone(),
            transaction_type: original.transaction_type,
            metadata: refund_metadata(&original, &refund),
        };
        let result = match provider.refund(request).await {
            Ok(result) => result,
            Err(e) if e.retryable => {
                warn!(
                    provider = %original.provider,
                    transaction_id = %original.id,
                    refund_id = %refund.id,
                    error = %e,
                    "Refund outcome unknown; refund left pending"
                );
                return Err(e.into());
            }
            Err(e) => {
                error!(
                    provider = %original.provider,
                    transaction_id = %original.id,
                    refund_id = %refund.id,
                    error = %e,
                    "Provider refund failed"
                );
                refund.fail(Some(e.code.to_string()), e.message.clone(), Timestamp::now())?;
                self.transactions.update(&refund).await?;
                return Err(e.into());
            }
        };

        // 4. Finalize
        refund.complete(Some(result.refund_id.clone()), Timestamp::now())?;
        self.transactions.update(&refund).await?;
        original.mark_refunded()?;
        self.transactions.update(&original).await?;

        info!(
            provider = %original.provider,
            user_id = %original.user_id,
            transaction_id = %original.id,
            refund_id = %refund.id,
            provider_refund_id = %result.refund_id,
            amount,
            "Refund completed"
        );
        Ok(RefundTransactionResult { refund, original })
    }
}

/// The original's metadata plus the local ids, so adapters can find what
/// they recorded at checkout (e.g. a session id).
fn refund_metadata(original: &Transaction, refund: &Transaction) -> serde_json::Value {
    let mut metadata = match &original.metadata {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    metadata.insert("transaction_id".to_string(), original.id.to_string().into());
    metadata.insert("refund_id".to_string(), refund.id.to_string().into());
    serde_json::Value::Object(metadata)
}
