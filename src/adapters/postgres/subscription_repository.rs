//! PostgreSQL implementation of SubscriptionRepository.
//!
//! The one-live-row rule is enforced by the partial unique index
//! `subscriptions_one_live_per_user`; hitting it surfaces as a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::domain::billing::{ProviderKind, Subscription};
use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, SubscriptionId, Timestamp, UserId,
};
use crate::ports::{ReminderWindow, SubscriptionRepository};

use super::pool::{corrupt, map_write_error, read_error};

const ONE_LIVE_PER_USER: &str = "subscriptions_one_live_per_user";

/// PostgreSQL implementation of the SubscriptionRepository port.
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan_id: Uuid,
    plan_code: String,
    status: String,
    billing_cycle: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    trial_ends_at: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    provider: Option<String>,
    provider_subscription_ref: Option<String>,
    reminder_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let provider = row
            .provider
            .as_deref()
            .map(str::parse::<ProviderKind>)
            .transpose()
            .map_err(|e| corrupt("provider", e))?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| corrupt("user_id", e))?,
            plan_id: PlanId::from_uuid(row.plan_id),
            plan_code: row.plan_code,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            billing_cycle: row.billing_cycle.parse().map_err(|e| corrupt("billing_cycle", e))?,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            trial_ends_at: row.trial_ends_at.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            cancelled_at: row.cancelled_at.map(Timestamp::from_datetime),
            cancellation_reason: row.cancellation_reason,
            provider,
            provider_subscription_ref: row.provider_subscription_ref,
            reminder_sent_at: row.reminder_sent_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

const SELECT_SUBSCRIPTION: &str = r#"
    SELECT id, user_id, plan_id, plan_code, status, billing_cycle,
           current_period_start, current_period_end, trial_ends_at,
           cancel_at_period_end, cancelled_at, cancellation_reason,
           provider, provider_subscription_ref, reminder_sent_at,
           created_at, updated_at
    FROM subscriptions
"#;

const LIVE_STATUSES: &str = "('active', 'trialing', 'past_due')";

fn insert_query(s: &Subscription) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO subscriptions (
            id, user_id, plan_id, plan_code, status, billing_cycle,
            current_period_start, current_period_end, trial_ends_at,
            cancel_at_period_end, cancelled_at, cancellation_reason,
            provider, provider_subscription_ref, reminder_sent_at,
            created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(s.id.as_uuid())
    .bind(s.user_id.as_str())
    .bind(s.plan_id.as_uuid())
    .bind(&s.plan_code)
    .bind(s.status.as_str())
    .bind(s.billing_cycle.as_str())
    .bind(s.current_period_start.as_datetime())
    .bind(s.current_period_end.as_datetime())
    .bind(s.trial_ends_at.as_ref().map(Timestamp::as_datetime))
    .bind(s.cancel_at_period_end)
    .bind(s.cancelled_at.as_ref().map(Timestamp::as_datetime))
    .bind(&s.cancellation_reason)
    .bind(s.provider.map(|p| p.as_str()))
    .bind(&s.provider_subscription_ref)
    .bind(s.reminder_sent_at.as_ref().map(Timestamp::as_datetime))
    .bind(s.created_at.as_datetime())
    .bind(s.updated_at.as_datetime())
}

/// With `only_live` the update matches nothing once the row has left the
/// live statuses.
fn update_query(s: &Subscription, only_live: bool) -> Query<'_, Postgres, PgArguments> {
    let sql = if only_live { UPDATE_LIVE_BY_ID } else { UPDATE_BY_ID };
    sqlx::query(sql)
        .bind(s.id.as_uuid())
        .bind(s.plan_id.as_uuid())
        .bind(&s.plan_code)
        .bind(s.status.as_str())
        .bind(s.billing_cycle.as_str())
        .bind(s.current_period_start.as_datetime())
        .bind(s.current_period_end.as_datetime())
        .bind(s.trial_ends_at.as_ref().map(Timestamp::as_datetime))
        .bind(s.cancel_at_period_end)
        .bind(s.cancelled_at.as_ref().map(Timestamp::as_datetime))
        .bind(&s.cancellation_reason)
        .bind(s.provider.map(|p| p.as_str()))
        .bind(&s.provider_subscription_ref)
        .bind(s.reminder_sent_at.as_ref().map(Timestamp::as_datetime))
        .bind(s.updated_at.as_datetime())
}

const UPDATE_BY_ID: &str = r#"
    UPDATE subscriptions SET
        plan_id = $2, plan_code = $3, status = $4, billing_cycle = $5,
        current_period_start = $6, current_period_end = $7, trial_ends_at = $8,
        cancel_at_period_end = $9, cancelled_at = $10, cancellation_reason = $11,
        provider = $12, provider_subscription_ref = $13, reminder_sent_at = $14,
        updated_at = $15
    WHERE id = $1
"#;

const UPDATE_LIVE_BY_ID: &str = r#"
    UPDATE subscriptions SET
        plan_id = $2, plan_code = $3, status = $4, billing_cycle = $5,
        current_period_start = $6, current_period_end = $7, trial_ends_at = $8,
        cancel_at_period_end = $9, cancelled_at = $10, cancellation_reason = $11,
        provider = $12, provider_subscription_ref = $13, reminder_sent_at = $14,
        updated_at = $15
    WHERE id = $1 AND status IN ('active', 'trialing', 'past_due')
"#;

fn not_found(id: &SubscriptionId) -> DomainError {
    DomainError::new(
        ErrorCode::SubscriptionNotFound,
        format!("Subscription not found: {}", id),
    )
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        insert_query(subscription)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, ONE_LIVE_PER_USER, "insert subscription"))?;
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let result = update_query(subscription, false)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, ONE_LIVE_PER_USER, "update subscription"))?;

        if result.rows_affected() == 0 {
            return Err(not_found(&subscription.id));
        }
        Ok(())
    }

    async fn replace_live(
        &self,
        previous: Option<&Subscription>,
        next: &Subscription,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| read_error(e, "begin transaction"))?;

        if let Some(previous) = previous {
            let result = update_query(previous, true)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_write_error(e, ONE_LIVE_PER_USER, "close subscription"))?;

            if result.rows_affected() == 0 {
                // Dropping `tx` rolls back.
                return Err(DomainError::conflict(format!(
                    "Subscription {} is no longer live",
                    previous.id
                ))
                .with_detail("subscription_id", previous.id.to_string()));
            }
        }

        insert_query(next)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, ONE_LIVE_PER_USER, "insert subscription"))?;

        tx.commit()
            .await
            .map_err(|e| read_error(e, "commit subscription replacement"))?;
        Ok(())
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE id = $1", SELECT_SUBSCRIPTION))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| read_error(e, "fetch subscription"))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_live_by_user(&self, user_id: &UserId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE user_id = $1 AND status IN {}",
            SELECT_SUBSCRIPTION, LIVE_STATUSES
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| read_error(e, "fetch live subscription"))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE provider = $1 AND provider_subscription_ref = $2 ORDER BY created_at DESC LIMIT 1",
            SELECT_SUBSCRIPTION
        ))
        .bind(provider.as_str())
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| read_error(e, "fetch subscription by provider ref"))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE user_id = $1 ORDER BY created_at DESC",
            SELECT_SUBSCRIPTION
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "list subscriptions"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn find_due_for_reminder(
        &self,
        now: Timestamp,
        window: ReminderWindow,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"{}
            WHERE status = 'active'
              AND plan_code <> 'free'
              AND current_period_end BETWEEN $1 AND $2
              AND (reminder_sent_at IS NULL OR reminder_sent_at < $3)
            ORDER BY current_period_end
            LIMIT $4"#,
            SELECT_SUBSCRIPTION
        ))
        .bind(now.add_days(window.min_days).as_datetime())
        .bind(now.add_days(window.max_days).as_datetime())
        .bind(now.minus_days(window.cooldown_days).as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "select reminder candidates"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn find_lapsed(&self, now: Timestamp, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"{}
            WHERE (status IN ('active', 'trialing')
                   OR (status = 'past_due' AND cancel_at_period_end))
              AND plan_code <> 'free'
              AND current_period_end <= $1
            ORDER BY current_period_end
            LIMIT $2"#,
            SELECT_SUBSCRIPTION
        ))
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "select lapsed subscriptions"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }
}
