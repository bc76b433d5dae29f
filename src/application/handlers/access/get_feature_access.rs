//! Feature-access queries.
//!
//! A user without a live subscription is evaluated as `free`. Past-due rows
//! keep their plan's access while the provider retries.

use std::sync::Arc;

use crate::domain::billing::{BillingError, FeatureAccessEvaluator, FeatureAccessMap, FREE_PLAN_CODE};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{FeatureOverrideRepository, SubscriptionRepository};

#[derive(Debug, Clone)]
pub struct GetFeatureAccessQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct CheckFeatureAccessQuery {
    pub user_id: UserId,
    pub feature_code: String,
}

/// Handler for both feature-access queries.
///
/// Plan and overrides are read once per call.
pub struct FeatureAccessHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    overrides: Arc<dyn FeatureOverrideRepository>,
    evaluator: FeatureAccessEvaluator,
}

impl FeatureAccessHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        overrides: Arc<dyn FeatureOverrideRepository>,
    ) -> Self {
        Self::with_evaluator(subscriptions, overrides, FeatureAccessEvaluator::default())
    }

    pub fn with_evaluator(
        subscriptions: Arc<dyn SubscriptionRepository>,
        overrides: Arc<dyn FeatureOverrideRepository>,
        evaluator: FeatureAccessEvaluator,
    ) -> Self {
        Self {
            subscriptions,
            overrides,
            evaluator,
        }
    }

    pub async fn feature_map(&self, query: GetFeatureAccessQuery) -> Result<FeatureAccessMap, BillingError> {
        let plan_code = self.plan_code(&query.user_id).await?;
        let overrides = self.overrides.list_for_user(&query.user_id).await?;
        Ok(self.evaluator.feature_map(&plan_code, &overrides, Timestamp::now()))
    }

    pub async fn check(&self, query: CheckFeatureAccessQuery) -> Result<bool, BillingError> {
        let plan_code = self.plan_code(&query.user_id).await?;
        let overrides = self.overrides.list_for_user(&query.user_id).await?;
        Ok(self
            .evaluator
            .is_feature_allowed(&plan_code, &query.feature_code, &overrides, Timestamp::now()))
    }

    async fn plan_code(&self, user_id: &UserId) -> Result<String, BillingError> {
        Ok(self
            .subscriptions
            .find_live_by_user(user_id)
            .await?
            .map(|s| s.plan_code)
            .unwrap_or_else(|| FREE_PLAN_CODE.to_string()))
    }
}
