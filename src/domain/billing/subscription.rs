//! Subscription aggregate.
//!
//! A user has at most one live subscription (active, trialing or past_due).
//! Rows are never deleted: history is kept through terminal statuses, and a
//! new plan always means a new row.

use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, StateMachine, SubscriptionId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

use super::{BillingCycle, Plan, ProviderKind, SubscriptionStatus, FREE_PLAN_CODE, FREE_PLAN_PERIOD_DAYS};

/// Subscription aggregate - one row of a user's subscription history.
///
/// # Invariants
///
/// - `current_period_start <= current_period_end`
/// - Status transitions follow [`SubscriptionStatus`] rules
/// - `cancel_at_period_end` is only meaningful while live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    /// Code of the referenced plan, kept alongside the id for access checks.
    pub plan_code: String,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub trial_ends_at: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<Timestamp>,
    pub cancellation_reason: Option<String>,
    pub provider: Option<ProviderKind>,
    pub provider_subscription_ref: Option<String>,
    pub reminder_sent_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Starts a new subscription row for `plan`.
    ///
    /// Plans with trial days start `trialing`; everything else starts
    /// `active`. The period is a fixed 30/365 day offset from `now`.
    pub fn start(
        user_id: UserId,
        plan: &Plan,
        cycle: BillingCycle,
        provider: Option<ProviderKind>,
        provider_subscription_ref: Option<String>,
        now: Timestamp,
    ) -> Self {
        let (status, trial_ends_at, period_days) = if plan.is_free() {
            (SubscriptionStatus::Active, None, FREE_PLAN_PERIOD_DAYS)
        } else if plan.has_trial() {
            (
                SubscriptionStatus::Trialing,
                Some(now.add_days(i64::from(plan.trial_days))),
                cycle.period_days(),
            )
        } else {
            (SubscriptionStatus::Active, None, cycle.period_days())
        };

        Self {
            id: SubscriptionId::new(),
            user_id,
            plan_id: plan.id,
            plan_code: plan.code.clone(),
            status,
            billing_cycle: cycle,
            current_period_start: now,
            current_period_end: now.add_days(period_days),
            trial_ends_at,
            cancel_at_period_end: false,
            cancelled_at: None,
            cancellation_reason: None,
            provider,
            provider_subscription_ref,
            reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn is_free(&self) -> bool {
        self.plan_code == FREE_PLAN_CODE
    }

    /// True once the current period end has been reached.
    pub fn period_has_ended(&self, now: Timestamp) -> bool {
        !self.current_period_end.is_after(&now)
    }

    /// Whole days left in the current period, 0 once it has ended.
    pub fn days_remaining(&self, now: Timestamp) -> u32 {
        if self.period_has_ended(now) {
            return 0;
        }
        self.current_period_end.duration_since(&now).num_days().max(0) as u32
    }

    /// Reminder eligibility: non-free, active, period end inside
    /// `[now + min_days, now + max_days]`, and not reminded within
    /// `cooldown_days`.
    pub fn is_due_for_reminder(
        &self,
        now: Timestamp,
        min_days: i64,
        max_days: i64,
        cooldown_days: i64,
    ) -> bool {
        if self.status != SubscriptionStatus::Active || self.is_free() {
            return false;
        }
        let window_start = now.add_days(min_days);
        let window_end = now.add_days(max_days);
        if self.current_period_end.is_before(&window_start)
            || self.current_period_end.is_after(&window_end)
        {
            return false;
        }
        match self.reminder_sent_at {
            None => true,
            Some(sent) => sent.is_before(&now.minus_days(cooldown_days)),
        }
    }

    /// Immediate cancellation.
    pub fn cancel_now(&mut self, reason: Option<String>, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Cancelled)?;
        self.cancelled_at = Some(now);
        self.cancel_at_period_end = false;
        if reason.is_some() {
            self.cancellation_reason = reason;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Deferred cancellation; status is unchanged until the period ends.
    pub fn schedule_cancellation(
        &mut self,
        reason: Option<String>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if !self.is_live() {
            return Err(self.invalid_state("schedule cancellation"));
        }
        self.cancel_at_period_end = true;
        self.cancellation_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    /// Undoes a deferred cancellation. Only valid while active.
    pub fn resume(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if self.status != SubscriptionStatus::Active || !self.cancel_at_period_end {
            return Err(self.invalid_state("resume"));
        }
        self.cancel_at_period_end = false;
        self.cancellation_reason = None;
        self.updated_at = now;
        Ok(())
    }

    /// In-place plan swap with no proration.
    pub fn change_plan(&mut self, plan: &Plan, now: Timestamp) -> Result<(), DomainError> {
        if !self.is_live() {
            return Err(self.invalid_state("change plan"));
        }
        self.plan_id = plan.id;
        self.plan_code = plan.code.clone();
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_past_due(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::PastDue)?;
        self.updated_at = now;
        Ok(())
    }

    /// Applies a successful recurring payment.
    ///
    /// Trialing and past_due rows become active. When the period ends
    /// within `renewal_window_days`, it rolls forward by one cycle from the
    /// later of `now` and the current end.
    pub fn record_payment(&mut self, renewal_window_days: i64, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Active)?;
        self.trial_ends_at = self.trial_ends_at.filter(|t| t.is_after(&now));

        if !self.current_period_end.is_after(&now.add_days(renewal_window_days)) {
            let start = if self.current_period_end.is_after(&now) {
                self.current_period_end
            } else {
                now
            };
            self.current_period_start = start;
            self.current_period_end = start.add_days(self.billing_cycle.period_days());
            self.reminder_sent_at = None;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn expire(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Expired)?;
        self.updated_at = now;
        Ok(())
    }

    /// Closes a row whose period has ended: `cancelled` when a deferred
    /// cancellation was requested, `expired` otherwise.
    pub fn close_at_period_end(&mut self, now: Timestamp) -> Result<SubscriptionStatus, DomainError> {
        if self.cancel_at_period_end {
            let reason = self.cancellation_reason.clone();
            self.cancel_now(reason, now)?;
        } else {
            self.expire(now)?;
        }
        Ok(self.status)
    }

    pub fn mark_reminded(&mut self, now: Timestamp) {
        self.reminder_sent_at = Some(now);
        self.updated_at = now;
    }

    fn transition_to(&mut self, target: SubscriptionStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!(
                    "Cannot transition subscription from {} to {}",
                    self.status, target
                ),
            )
        })?;
        Ok(())
    }

    fn invalid_state(&self, action: &str) -> DomainError {
        DomainError::new(
            ErrorCode::InvalidStateTransition,
            format!(
                "Cannot {} a {} subscription{}",
                action,
                self.status,
                if self.cancel_at_period_end { " (cancelling at period end)" } else { "" }
            ),
        )
        .with_detail("subscription_id", self.id.to_string())
    }
}
