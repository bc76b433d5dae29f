//! PostgreSQL implementation of SchedulerLease.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::DomainError;
use crate::ports::SchedulerLease;

use super::pool::read_error;

/// Lease rows in `scheduler_leases`, taken with a conditional upsert.
pub struct PostgresSchedulerLease {
    pool: PgPool,
}

impl PostgresSchedulerLease {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchedulerLease for PostgresSchedulerLease {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, DomainError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        // The update branch only fires when the current lease is ours or stale.
        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_leases (name, holder, expires_at)
            VALUES ($1, $2, NOW() + $3 * INTERVAL '1 millisecond')
            ON CONFLICT (name) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE scheduler_leases.expires_at < NOW()
               OR scheduler_leases.holder = EXCLUDED.holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| read_error(e, "acquire scheduler lease"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM scheduler_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(|e| read_error(e, "release scheduler lease"))?;

        Ok(())
    }
}
