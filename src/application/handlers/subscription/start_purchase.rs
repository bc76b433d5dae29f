//! StartPurchaseHandler - opens a hosted checkout for a one-time payment.
//!
//! Purchases are not tied to a subscription. The pending `one_time` row is
//! settled by the provider's checkout webhook or, for processors that need
//! an explicit capture, by [`CapturePurchaseHandler`](super::CapturePurchaseHandler).

use std::sync::Arc;

use tracing::info;

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::{
    BillingError, Money, ProviderKind, PurchaseMetadata, Transaction, TransactionType,
};
use crate::domain::foundation::{Timestamp, TransactionId, UserId};
use crate::ports::{CheckoutSession, CustomerDetails, PurchaseRequest, TransactionRepository};

/// Command to start a one-time payment.
#[derive(Debug, Clone)]
pub struct StartPurchaseCommand {
    pub user_id: UserId,
    pub item_code: String,
    /// Shown to the payer; defaults to the item code.
    pub description: Option<String>,
    pub amount: Money,
    pub provider: ProviderKind,
    pub customer: CustomerDetails,
    /// Defaults to `{app_url}/purchase/success`.
    pub success_url: Option<String>,
    /// Defaults to `{app_url}/purchase/cancel`.
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StartPurchaseResult {
    pub transaction_id: TransactionId,
    pub session: CheckoutSession,
}

pub struct StartPurchaseHandler {
    registry: Arc<ProviderRegistry>,
    transactions: Arc<dyn TransactionRepository>,
    app_url: String,
}

impl StartPurchaseHandler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transactions: Arc<dyn TransactionRepository>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            transactions,
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn handle(&self, cmd: StartPurchaseCommand) -> Result<StartPurchaseResult, BillingError> {
        // 1. Validate
        let item_code = cmd.item_code.trim().to_string();
        if item_code.is_empty() {
            return Err(BillingError::validation("item_code", "must not be empty"));
        }
        if !cmd.amount.is_positive() {
            return Err(BillingError::validation("amount", "must be positive"));
        }
        if cmd.amount.currency.len() != 3 || !cmd.amount.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BillingError::validation("currency", "must be a 3-letter code"));
        }
        let description = cmd
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| item_code.clone());

        // 2. Ask the provider for a session
        let provider = self.registry.get(cmd.provider)?;
        let request = PurchaseRequest {
            user_id: cmd.user_id.clone(),
            item_code: item_code.clone(),
            description: description.clone(),
            amount: cmd.amount.clone(),
            customer: cmd.customer,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            success_url: cmd
                .success_url
                .unwrap_or_else(|| format!("{}/purchase/success", self.app_url)),
            cancel_url: cmd
                .cancel_url
                .unwrap_or_else(|| format!("{}/purchase/cancel", self.app_url)),
        };
        let session = provider.create_purchase(request).await?;

        // 3. Record the pending charge
        let metadata = PurchaseMetadata {
            item_code: item_code.clone(),
            token: session.provider_token.clone(),
            session_id: (session.session_id != session.payment_ref).then(|| session.session_id.clone()),
        };
        let txn = Transaction::pending(
            cmd.user_id.clone(),
            TransactionType::OneTime,
            &cmd.amount,
            cmd.provider,
            Some(session.payment_ref.clone()),
            Timestamp::now(),
        )
        .with_description(description)
        .with_metadata(serde_json::to_value(&metadata).unwrap_or_default());
        self.transactions.insert(&txn).await?;

        info!(
            user_id = %cmd.user_id,
            provider = %cmd.provider,
            item = %item_code,
            amount = cmd.amount.amount,
            transaction_id = %txn.id,
            "Purchase started"
        );

        Ok(StartPurchaseResult {
            transaction_id: txn.id,
            session,
        })
    }
}
