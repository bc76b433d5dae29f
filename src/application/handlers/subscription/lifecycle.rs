//! SubscriptionLifecycle - owns every write to a user's subscription rows.
//!
//! Commands arrive from request handlers (create, change plan, cancel,
//! resume), from webhooks (see `apply_event`) and from the renewal
//! scheduler (`close_lapsed`). Every path that retires a live row and
//! starts another goes through `SubscriptionRepository::replace_live`, so
//! the one-live-row rule holds at every commit.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::billing::{
    BillingCycle, BillingError, Plan, ProviderKind, Subscription, SubscriptionStatus, FREE_PLAN_CODE,
};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{Notifier, NotifyResult, PlanCatalog, SubscriptionRepository, TransactionRepository};

/// Reason stamped on a row closed because the user started another one.
pub const REPLACED_REASON: &str = "replaced by new subscription";

/// Command to start a new subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub user_id: UserId,
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
    pub provider: Option<ProviderKind>,
    pub provider_subscription_ref: Option<String>,
}

impl CreateSubscriptionCommand {
    /// A subscription with no payment provider behind it.
    pub fn manual(user_id: UserId, plan_code: impl Into<String>, billing_cycle: BillingCycle) -> Self {
        Self {
            user_id,
            plan_code: plan_code.into(),
            billing_cycle,
            provider: None,
            provider_subscription_ref: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangePlanCommand {
    pub user_id: UserId,
    pub new_plan_code: String,
    /// Deferred changes are not scheduled; the current row is returned as is.
    pub immediate: bool,
}

#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
    pub immediate: bool,
    pub reason: Option<String>,
}

/// What the scheduler did with one lapsed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapseOutcome {
    /// `Expired` or `Cancelled`.
    pub closed_as: SubscriptionStatus,
    pub closed: Subscription,
    pub free: Subscription,
}

/// The subscription lifecycle manager.
pub struct SubscriptionLifecycle {
    pub(super) catalog: Arc<dyn PlanCatalog>,
    pub(super) subscriptions: Arc<dyn SubscriptionRepository>,
    pub(super) transactions: Arc<dyn TransactionRepository>,
    pub(super) notifier: Arc<dyn Notifier>,
}

impl SubscriptionLifecycle {
    pub fn new(
        catalog: Arc<dyn PlanCatalog>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        transactions: Arc<dyn TransactionRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            catalog,
            subscriptions,
            transactions,
            notifier,
        }
    }

    /// Start a subscription, cancelling any live row in the same store
    /// transaction.
    ///
    /// A concurrent create of the same plan that wins the race is returned
    /// instead of an error.
    pub async fn create(&self, cmd: CreateSubscriptionCommand) -> Result<Subscription, BillingError> {
        let plan = self.plan(&cmd.plan_code).await?;
        let now = Timestamp::now();

        let previous = self.subscriptions.find_live_by_user(&cmd.user_id).await?;
        let next = Subscription::start(
            cmd.user_id.clone(),
            &plan,
            cmd.billing_cycle,
            cmd.provider,
            cmd.provider_subscription_ref,
            now,
        );

        let closed = match previous {
            Some(mut previous) => {
                previous.cancel_now(Some(REPLACED_REASON.to_string()), now)?;
                Some(previous)
            }
            None => None,
        };

        match self.subscriptions.replace_live(closed.as_ref(), &next).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                if let Some(live) = self.subscriptions.find_live_by_user(&cmd.user_id).await? {
                    if live.plan_code == plan.code {
                        debug!(user_id = %cmd.user_id, plan = %plan.code, "Concurrent create already applied");
                        return Ok(live);
                    }
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            user_id = %next.user_id,
            subscription_id = %next.id,
            plan = %next.plan_code,
            status = %next.status,
            cycle = %next.billing_cycle,
            "Subscription created"
        );
        Ok(next)
    }

    /// In-place plan swap with no proration. Without a live row this is a
    /// monthly `create`.
    pub async fn change_plan(&self, cmd: ChangePlanCommand) -> Result<Subscription, BillingError> {
        let plan = self.plan(&cmd.new_plan_code).await?;

        let Some(mut current) = self.subscriptions.find_live_by_user(&cmd.user_id).await? else {
            return self
                .create(CreateSubscriptionCommand::manual(
                    cmd.user_id,
                    cmd.new_plan_code,
                    BillingCycle::Monthly,
                ))
                .await;
        };

        if !cmd.immediate {
            debug!(user_id = %cmd.user_id, plan = %plan.code, "Deferred plan change requested; keeping current plan");
            return Ok(current);
        }

        let from = current.plan_code.clone();
        current.change_plan(&plan, Timestamp::now())?;
        self.subscriptions.update(&current).await?;

        info!(user_id = %current.user_id, from = %from, to = %plan.code, "Subscription plan changed");
        Ok(current)
    }

    pub async fn cancel(&self, cmd: CancelSubscriptionCommand) -> Result<Subscription, BillingError> {
        let mut current = self.live(&cmd.user_id).await?;
        let now = Timestamp::now();

        if cmd.immediate {
            current.cancel_now(cmd.reason, now)?;
        } else {
            current.schedule_cancellation(cmd.reason, now)?;
        }
        self.subscriptions.update(&current).await?;

        info!(
            user_id = %current.user_id,
            subscription_id = %current.id,
            immediate = cmd.immediate,
            "Subscription cancelled"
        );
        Ok(current)
    }

    /// Undo a deferred cancellation.
    pub async fn resume(&self, user_id: &UserId) -> Result<Subscription, BillingError> {
        let mut current = self.live(user_id).await?;
        current.resume(Timestamp::now())?;
        self.subscriptions.update(&current).await?;

        info!(user_id = %user_id, subscription_id = %current.id, "Subscription resumed");
        Ok(current)
    }

    /// Make sure the user has a live row, starting a free one if not.
    ///
    /// An existing live row of any plan is left untouched.
    pub async fn activate_free(&self, user_id: &UserId) -> Result<Subscription, BillingError> {
        if let Some(live) = self.subscriptions.find_live_by_user(user_id).await? {
            return Ok(live);
        }
        let plan = self.plan(FREE_PLAN_CODE).await?;
        let free = Subscription::start(user_id.clone(), &plan, BillingCycle::Monthly, None, None, Timestamp::now());

        match self.subscriptions.insert(&free).await {
            Ok(()) => Ok(free),
            Err(e) if e.is_conflict() => self.live(user_id).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Close a row whose period has passed and start the user's free row
    /// in one store transaction.
    ///
    /// Rows flagged `cancel_at_period_end` become `cancelled`, all others
    /// `expired`.
    pub async fn close_lapsed(
        &self,
        lapsed: &Subscription,
        free_plan: &Plan,
        now: Timestamp,
    ) -> Result<LapseOutcome, BillingError> {
        let mut closed = lapsed.clone();
        let closed_as = closed.close_at_period_end(now)?;
        let free = Subscription::start(
            lapsed.user_id.clone(),
            free_plan,
            BillingCycle::Monthly,
            None,
            None,
            now,
        );

        self.subscriptions.replace_live(Some(&closed), &free).await?;

        info!(
            user_id = %closed.user_id,
            subscription_id = %closed.id,
            plan = %closed.plan_code,
            status = %closed_as,
            "Subscription closed at period end; downgraded to free"
        );
        Ok(LapseOutcome {
            closed_as,
            closed,
            free,
        })
    }

    pub async fn current(&self, user_id: &UserId) -> Result<Option<Subscription>, BillingError> {
        Ok(self.subscriptions.find_live_by_user(user_id).await?)
    }

    pub(crate) async fn plan(&self, code: &str) -> Result<Plan, BillingError> {
        self.catalog
            .get_plan(code)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(code.to_string()))
    }

    async fn live(&self, user_id: &UserId) -> Result<Subscription, BillingError> {
        self.subscriptions
            .find_live_by_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NoLiveSubscription(user_id.clone()))
    }
}

/// Notifications never fail the operation that triggered them.
pub(crate) fn log_notify_failure(kind: &str, user_id: &UserId, result: NotifyResult) {
    if !result.success {
        warn!(
            notification = kind,
            user_id = %user_id,
            error = result.error.as_deref().unwrap_or("unknown"),
            "Notification failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBillingStore, InMemoryPlanCatalog};
    use crate::adapters::notify::LoggingNotifier;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn setup() -> (SubscriptionLifecycle, Arc<InMemoryBillingStore>) {
        let store = Arc::new(InMemoryBillingStore::new());
        let lifecycle = SubscriptionLifecycle::new(
            Arc::new(InMemoryPlanCatalog::with_default_plans("PLN")),
            store.clone(),
            store.clone(),
            Arc::new(LoggingNotifier::new()),
        );
        (lifecycle, store)
    }

    fn create(user_id: &str, plan: &str) -> CreateSubscriptionCommand {
        CreateSubscriptionCommand::manual(user(user_id), plan, BillingCycle::Monthly)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // create
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn premium_starts_trialing_with_fixed_period() {
        let (lifecycle, _) = setup();
        let before = Timestamp::now();
        let sub = lifecycle.create(create("u1", "premium")).await.unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        let trial_end = sub.trial_ends_at.unwrap();
        assert!(!trial_end.is_before(&before.add_days(14)));
        assert!(!sub.current_period_end.is_before(&before.add_days(30)));
        assert!(sub.current_period_end.is_before(&before.add_days(31)));
    }

    #[tokio::test]
    async fn create_replaces_live_row() {
        let (lifecycle, store) = setup();
        let first = lifecycle.create(create("u1", "basic")).await.unwrap();
        let second = lifecycle.create(create("u1", "pro")).await.unwrap();

        assert_eq!(store.live_count(&user("u1")).await, 1);
        let rows = store.subscriptions_for(&user("u1")).await;
        let old = rows.iter().find(|s| s.id == first.id).unwrap();
        assert_eq!(old.status, SubscriptionStatus::Cancelled);
        assert_eq!(old.cancellation_reason.as_deref(), Some(REPLACED_REASON));
        assert_eq!(lifecycle.current(&user("u1")).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn unknown_plan_is_plan_not_found() {
        let (lifecycle, store) = setup();
        let err = lifecycle.create(create("u1", "platinum")).await.unwrap_err();
        assert_eq!(err, BillingError::PlanNotFound("platinum".into()));
        assert!(store.subscriptions_for(&user("u1")).await.is_empty());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // change_plan / cancel / resume
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn change_plan_swaps_in_place() {
        let (lifecycle, store) = setup();
        let sub = lifecycle.create(create("u1", "basic")).await.unwrap();
        let changed = lifecycle
            .change_plan(ChangePlanCommand {
                user_id: user("u1"),
                new_plan_code: "pro".into(),
                immediate: true,
            })
            .await
            .unwrap();

        assert_eq!(changed.id, sub.id);
        assert_eq!(changed.plan_code, "pro");
        assert_eq!(changed.current_period_end, sub.current_period_end);
        assert_eq!(store.subscriptions_for(&user("u1")).await.len(), 1);
    }

    #[tokio::test]
    async fn change_plan_without_live_row_creates() {
        let (lifecycle, _) = setup();
        let sub = lifecycle
            .change_plan(ChangePlanCommand {
                user_id: user("u2"),
                new_plan_code: "basic".into(),
                immediate: true,
            })
            .await
            .unwrap();
        assert_eq!(sub.plan_code, "basic");
        assert_eq!(sub.billing_cycle, BillingCycle::Monthly);
    }

    #[tokio::test]
    async fn deferred_change_keeps_plan() {
        let (lifecycle, _) = setup();
        lifecycle.create(create("u1", "basic")).await.unwrap();
        let sub = lifecycle
            .change_plan(ChangePlanCommand {
                user_id: user("u1"),
                new_plan_code: "pro".into(),
                immediate: false,
            })
            .await
            .unwrap();
        assert_eq!(sub.plan_code, "basic");
    }

    #[tokio::test]
    async fn deferred_cancel_then_resume() {
        let (lifecycle, _) = setup();
        lifecycle.create(create("u1", "basic")).await.unwrap();

        let cancelled = lifecycle
            .cancel(CancelSubscriptionCommand {
                user_id: user("u1"),
                immediate: false,
                reason: Some("moving on".into()),
            })
            .await
            .unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Active);
        assert!(cancelled.cancel_at_period_end);

        let resumed = lifecycle.resume(&user("u1")).await.unwrap();
        assert!(!resumed.cancel_at_period_end);
        assert!(resumed.cancellation_reason.is_none());
    }

    #[tokio::test]
    async fn cancel_without_live_row_fails() {
        let (lifecycle, _) = setup();
        let err = lifecycle
            .cancel(CancelSubscriptionCommand {
                user_id: user("nobody"),
                immediate: true,
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NoLiveSubscription(_)));
    }

    #[tokio::test]
    async fn resume_requires_pending_cancellation() {
        let (lifecycle, _) = setup();
        lifecycle.create(create("u1", "basic")).await.unwrap();
        let err = lifecycle.resume(&user("u1")).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidState(_)));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // activate_free / close_lapsed
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn activate_free_is_idempotent() {
        let (lifecycle, store) = setup();
        let first = lifecycle.activate_free(&user("u1")).await.unwrap();
        let second = lifecycle.activate_free(&user("u1")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.is_free());
        assert_eq!(store.subscriptions_for(&user("u1")).await.len(), 1);
    }

    #[tokio::test]
    async fn close_lapsed_downgrades_in_one_step() {
        let (lifecycle, store) = setup();
        let sub = lifecycle.create(create("u1", "basic")).await.unwrap();
        let free_plan = lifecycle.plan(FREE_PLAN_CODE).await.unwrap();

        let outcome = lifecycle
            .close_lapsed(&sub, &free_plan, sub.current_period_end.plus_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.closed_as, SubscriptionStatus::Expired);
        let live = store.find_live_by_user(&user("u1")).await.unwrap().unwrap();
        assert_eq!(live.id, outcome.free.id);
        assert!(live.is_free());
        assert_eq!(store.live_count(&user("u1")).await, 1);
    }
}
