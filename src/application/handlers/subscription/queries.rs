//! Read-side views: plans, current subscription, history, providers.

use std::sync::Arc;

use serde::Serialize;

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::{BillingError, Plan, ProviderKind, Subscription, Transaction, FREE_PLAN_CODE};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{PlanCatalog, SubscriptionRepository, TransactionRepository};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Current plan as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummary {
    pub plan: Plan,
    /// `None` when the user has never subscribed or everything lapsed.
    pub subscription: Option<Subscription>,
    pub days_remaining: Option<u32>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone)]
pub struct ListTransactionsQuery {
    pub user_id: UserId,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Handler for every billing read model.
pub struct BillingQueries {
    catalog: Arc<dyn PlanCatalog>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    transactions: Arc<dyn TransactionRepository>,
    registry: Arc<ProviderRegistry>,
}

impl BillingQueries {
    pub fn new(
        catalog: Arc<dyn PlanCatalog>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        transactions: Arc<dyn TransactionRepository>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            catalog,
            subscriptions,
            transactions,
            registry,
        }
    }

    /// Active plans ordered for display.
    pub async fn list_plans(&self) -> Result<Vec<Plan>, BillingError> {
        Ok(self.catalog.list_active().await?)
    }

    /// Live row plus its plan; users without one see the free plan.
    pub async fn current_subscription(&self, user_id: &UserId) -> Result<SubscriptionSummary, BillingError> {
        let live = self.subscriptions.find_live_by_user(user_id).await?;
        let plan_code = live.as_ref().map_or(FREE_PLAN_CODE, |s| s.plan_code.as_str());
        let plan = self
            .catalog
            .get_plan(plan_code)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(plan_code.to_string()))?;

        let now = Timestamp::now();
        Ok(SubscriptionSummary {
            days_remaining: live.as_ref().filter(|s| !s.is_free()).map(|s| s.days_remaining(now)),
            cancel_at_period_end: live.as_ref().is_some_and(|s| s.cancel_at_period_end),
            subscription: live,
            plan,
        })
    }

    pub async fn subscription_history(&self, user_id: &UserId) -> Result<Vec<Subscription>, BillingError> {
        Ok(self.subscriptions.list_by_user(user_id).await?)
    }

    /// Newest first. `limit` defaults to 50 and is capped at 100.
    pub async fn list_transactions(&self, query: ListTransactionsQuery) -> Result<Vec<Transaction>, BillingError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self
            .transactions
            .list_by_user(&query.user_id, limit, query.offset)
            .await?)
    }

    pub fn available_providers(&self) -> Vec<ProviderKind> {
        self.registry.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBillingStore, InMemoryPlanCatalog};
    use crate::adapters::payments::MockPaymentProvider;
    use crate::domain::billing::{BillingCycle, Money};

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    fn setup() -> (BillingQueries, Arc<InMemoryBillingStore>, Arc<InMemoryPlanCatalog>) {
        let store = Arc::new(InMemoryBillingStore::new());
        let catalog = Arc::new(InMemoryPlanCatalog::with_default_plans("PLN"));
        let paypal = MockPaymentProvider::new(ProviderKind::PayPal);
        paypal.set_available(false);
        let registry = ProviderRegistry::new()
            .with(Arc::new(MockPaymentProvider::new(ProviderKind::Stripe)))
            .with(Arc::new(paypal));
        let queries = BillingQueries::new(catalog.clone(), store.clone(), store.clone(), Arc::new(registry));
        (queries, store, catalog)
    }

    #[tokio::test]
    async fn summary_without_subscription_shows_free_plan() {
        let (queries, _, _) = setup();
        let summary = queries.current_subscription(&user()).await.unwrap();

        assert_eq!(summary.plan.code, FREE_PLAN_CODE);
        assert!(summary.subscription.is_none());
        assert_eq!(summary.days_remaining, None);
    }

    #[tokio::test]
    async fn summary_reports_days_remaining() {
        let (queries, store, catalog) = setup();
        let plan = catalog.get_plan("pro").await.unwrap().unwrap();
        let sub = Subscription::start(user(), &plan, BillingCycle::Yearly, None, None, Timestamp::now());
        SubscriptionRepository::insert(store.as_ref(), &sub).await.unwrap();

        let summary = queries.current_subscription(&user()).await.unwrap();
        assert_eq!(summary.plan.code, "pro");
        let days = summary.days_remaining.unwrap();
        assert!((364..=365).contains(&days));
    }

    #[tokio::test]
    async fn transaction_limit_is_capped() {
        let (queries, store, _) = setup();
        for i in 0..120 {
            let txn = Transaction::completed_charge(
                user(),
                None,
                &Money::new(100, "PLN"),
                ProviderKind::Stripe,
                format!("pi_{}", i),
                Timestamp::now(),
            );
            TransactionRepository::insert(store.as_ref(), &txn).await.unwrap();
        }

        let query = |limit| ListTransactionsQuery {
            user_id: user(),
            limit,
            offset: 0,
        };
        assert_eq!(queries.list_transactions(query(None)).await.unwrap().len(), 50);
        assert_eq!(queries.list_transactions(query(Some(500))).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn only_available_providers_are_listed() {
        let (queries, _, _) = setup();
        assert_eq!(queries.available_providers(), vec![ProviderKind::Stripe]);
    }

    #[tokio::test]
    async fn plans_are_listed_in_display_order() {
        let (queries, _, _) = setup();
        let codes: Vec<_> = queries.list_plans().await.unwrap().into_iter().map(|p| p.code).collect();
        assert_eq!(codes, vec!["free", "basic", "premium", "pro", "enterprise"]);
    }
}
