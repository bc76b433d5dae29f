//! StartCheckoutHandler - opens a hosted checkout at a payment provider.
//!
//! The pending transaction is written only after the provider accepted the
//! request, so a provider failure leaves no local trace.

use std::sync::Arc;

use tracing::info;

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::{
    BillingCycle, BillingError, CheckoutMetadata, ProviderKind, Transaction, TransactionType,
};
use crate::domain::foundation::{Timestamp, TransactionId, UserId};
use crate::ports::{CheckoutRequest, CheckoutSession, CustomerDetails, PlanCatalog, TransactionRepository};

/// Command to start a paid checkout.
#[derive(Debug, Clone)]
pub struct StartCheckoutCommand {
    pub user_id: UserId,
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
    pub provider: ProviderKind,
    pub customer: CustomerDetails,
    /// Defaults to `{app_url}/subscription/success`.
    pub success_url: Option<String>,
    /// Defaults to `{app_url}/subscription/cancel`.
    pub cancel_url: Option<String>,
}

/// Result of starting a checkout.
#[derive(Debug, Clone)]
pub struct StartCheckoutResult {
    pub transaction_id: TransactionId,
    pub session: CheckoutSession,
}

/// Handler for opening checkouts.
pub struct StartCheckoutHandler {
    registry: Arc<ProviderRegistry>,
    catalog: Arc<dyn PlanCatalog>,
    transactions: Arc<dyn TransactionRepository>,
    app_url: String,
}

impl StartCheckoutHandler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        catalog: Arc<dyn PlanCatalog>,
        transactions: Arc<dyn TransactionRepository>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            catalog,
            transactions,
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn handle(&self, cmd: StartCheckoutCommand) -> Result<StartCheckoutResult, BillingError> {
        // 1. Resolve plan
        let plan = self
            .catalog
            .get_plan(&cmd.plan_code)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(cmd.plan_code.clone()))?;
        if plan.is_free() {
            return Err(BillingError::validation("plan_code", "the free plan needs no checkout"));
        }

        // 2. Resolve provider
        let provider = self.registry.get(cmd.provider)?;

        // 3. Ask the provider for a session
        let amount = plan.price_for(cmd.billing_cycle);
        let request = CheckoutRequest {
            user_id: cmd.user_id.clone(),
            plan: plan.clone(),
            billing_cycle: cmd.billing_cycle,
            customer: cmd.customer,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            success_url: cmd
                .success_url
                .unwrap_or_else(|| format!("{}/subscription/success", self.app_url)),
            cancel_url: cmd
                .cancel_url
                .unwrap_or_else(|| format!("{}/subscription/cancel", self.app_url)),
        };
        let session = provider.create_checkout(request).await?;

        // 4. Record the pending charge
        let metadata = CheckoutMetadata {
            plan_code: plan.code.clone(),
            billing_cycle: cmd.billing_cycle,
            token: session.provider_token.clone(),
            session_id: (session.session_id != session.payment_ref).then(|| session.session_id.clone()),
        };
        let txn = Transaction::pending(
            cmd.user_id.clone(),
            TransactionType::Subscription,
            &amount,
            cmd.provider,
            Some(session.payment_ref.clone()),
            Timestamp::now(),
        )
        .with_description(format!("{} ({})", plan.name, cmd.billing_cycle))
        .with_metadata(serde_json::to_value(&metadata).unwrap_or_default());
        self.transactions.insert(&txn).await?;

        info!(
            user_id = %cmd.user_id,
            provider = %cmd.provider,
            plan = %plan.code,
            amount = amount.amount,
            transaction_id = %txn.id,
            "Checkout started"
        );

        Ok(StartCheckoutResult {
            transaction_id: txn.id,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBillingStore, InMemoryPlanCatalog};
    use crate::adapters::payments::MockPaymentProvider;
    use crate::domain::billing::TransactionStatus;
    use crate::ports::PaymentError;

    fn setup(mock: MockPaymentProvider) -> (StartCheckoutHandler, Arc<InMemoryBillingStore>) {
        let store = Arc::new(InMemoryBillingStore::new());
        let registry = ProviderRegistry::new().with(Arc::new(mock));
        let handler = StartCheckoutHandler::new(
            Arc::new(registry),
            Arc::new(InMemoryPlanCatalog::with_default_plans("PLN")),
            store.clone(),
            "https://app.example/",
        );
        (handler, store)
    }

    fn command(plan: &str, provider: ProviderKind) -> StartCheckoutCommand {
        StartCheckoutCommand {
            user_id: UserId::new("u1").unwrap(),
            plan_code: plan.to_string(),
            billing_cycle: BillingCycle::Monthly,
            provider,
            customer: CustomerDetails::default(),
            success_url: None,
            cancel_url: None,
        }
    }

    #[tokio::test]
    async fn records_pending_transaction_with_checkout_metadata() {
        let mock = MockPaymentProvider::new(ProviderKind::Stripe);
        let (handler, store) = setup(mock.clone());

        let result = handler.handle(command("premium", ProviderKind::Stripe)).await.unwrap();

        let rows = store.all_transactions().await;
        assert_eq!(rows.len(), 1);
        let txn = &rows[0];
        assert_eq!(txn.id, result.transaction_id);
        assert_eq!(txn.status, TransactionStatus::Pending);
        assert_eq!(txn.amount, 3999);
        assert_eq!(txn.provider_transaction_id.as_deref(), Some(result.session.payment_ref.as_str()));
        let meta = txn.checkout_metadata().unwrap();
        assert_eq!(meta.plan_code, "premium");
        assert_eq!(meta.billing_cycle, BillingCycle::Monthly);

        let call = &mock.calls()[0];
        assert_eq!(call.method, "create_checkout");
        assert_eq!(call.args[1], "premium");
    }

    #[tokio::test]
    async fn provider_failure_leaves_no_transaction() {
        let mock = MockPaymentProvider::new(ProviderKind::Stripe);
        mock.set_method_error("create_checkout", PaymentError::timeout("slow"));
        let (handler, store) = setup(mock);

        let err = handler.handle(command("basic", ProviderKind::Stripe)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.all_transactions().await.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_provider_is_rejected() {
        let (handler, _) = setup(MockPaymentProvider::new(ProviderKind::Stripe));
        let err = handler.handle(command("basic", ProviderKind::PayPal)).await.unwrap_err();
        assert_eq!(err, BillingError::ProviderNotConfigured(ProviderKind::PayPal));
    }

    #[tokio::test]
    async fn free_plan_has_no_checkout() {
        let (handler, _) = setup(MockPaymentProvider::new(ProviderKind::Stripe));
        let err = handler.handle(command("free", ProviderKind::Stripe)).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
    }

    #[tokio::test]
    async fn blik_checkout_keeps_token() {
        let mock = MockPaymentProvider::with_confirmation_codes(ProviderKind::Przelewy24);
        let (handler, store) = setup(mock);

        let result = handler.handle(command("basic", ProviderKind::Przelewy24)).await.unwrap();
        assert!(result.session.requires_confirmation_code);

        let txn = &store.all_transactions().await[0];
        assert_eq!(txn.checkout_metadata().unwrap().token, result.session.provider_token);
    }
}
