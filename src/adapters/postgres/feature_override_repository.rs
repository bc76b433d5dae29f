//! PostgreSQL implementation of FeatureOverrideRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::billing::{FeatureOverride, OverrideAccess};
use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::ports::FeatureOverrideRepository;

use super::pool::{corrupt, read_error};

pub struct PostgresFeatureOverrideRepository {
    pool: PgPool,
}

impl PostgresFeatureOverrideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OverrideRow {
    user_id: String,
    feature_code: String,
    access_type: String,
    expires_at: Option<DateTime<Utc>>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OverrideRow> for FeatureOverride {
    type Error = DomainError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        let access_type = match row.access_type.as_str() {
            "grant" => OverrideAccess::Grant,
            "deny" => OverrideAccess::Deny,
            other => return Err(corrupt("access_type", other)),
        };
        Ok(FeatureOverride {
            user_id: UserId::new(row.user_id).map_err(|e| corrupt("user_id", e))?,
            feature_code: row.feature_code,
            access_type,
            expires_at: row.expires_at.map(Timestamp::from_datetime),
            reason: row.reason,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl FeatureOverrideRepository for PostgresFeatureOverrideRepository {
    async fn upsert(&self, feature_override: &FeatureOverride) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO feature_overrides (
                user_id, feature_code, access_type, expires_at, reason, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, feature_code) DO UPDATE SET
                access_type = EXCLUDED.access_type,
                expires_at = EXCLUDED.expires_at,
                reason = EXCLUDED.reason,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(feature_override.user_id.as_str())
        .bind(&feature_override.feature_code)
        .bind(feature_override.access_type.as_str())
        .bind(feature_override.expires_at.as_ref().map(Timestamp::as_datetime))
        .bind(&feature_override.reason)
        .bind(feature_override.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| read_error(e, "upsert feature override"))?;

        Ok(())
    }

    async fn remove(&self, user_id: &UserId, feature_code: &str) -> Result<bool, DomainError> {
        let result =
            sqlx::query("DELETE FROM feature_overrides WHERE user_id = $1 AND feature_code = $2")
                .bind(user_id.as_str())
                .bind(feature_code)
                .execute(&self.pool)
                .await
                .map_err(|e| read_error(e, "remove feature override"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FeatureOverride>, DomainError> {
        let rows: Vec<OverrideRow> = sqlx::query_as(
            r#"
            SELECT user_id, feature_code, access_type, expires_at, reason, created_at
            FROM feature_overrides
            WHERE user_id = $1
            ORDER BY feature_code
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "list feature overrides"))?;

        rows.into_iter().map(FeatureOverride::try_from).collect()
    }
}
