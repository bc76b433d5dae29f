//! PostgreSQL implementation of PlanCatalog.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::Plan;
use crate::domain::foundation::{DomainError, PlanId};
use crate::ports::PlanCatalog;

use super::pool::{corrupt, read_error};

pub struct PostgresPlanCatalog {
    pool: PgPool,
}

impl PostgresPlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    code: String,
    name: String,
    description: Option<String>,
    price_monthly: i64,
    price_yearly: i64,
    currency: String,
    trial_days: i32,
    features: serde_json::Value,
    is_active: bool,
    is_featured: bool,
    sort_order: i32,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let features: Vec<String> =
            serde_json::from_value(row.features).map_err(|e| corrupt("features", e))?;
        Ok(Plan {
            id: PlanId::from_uuid(row.id),
            code: row.code,
            name: row.name,
            description: row.description,
            price_monthly: row.price_monthly,
            price_yearly: row.price_yearly,
            currency: row.currency.trim().to_string(),
            trial_days: u32::try_from(row.trial_days).map_err(|e| corrupt("trial_days", e))?,
            features,
            is_active: row.is_active,
            is_featured: row.is_featured,
            sort_order: row.sort_order,
        })
    }
}

const PLAN_COLUMNS: &str = r#"
    id, code, name, description, price_monthly, price_yearly, currency,
    trial_days, features, is_active, is_featured, sort_order
"#;

#[async_trait]
impl PlanCatalog for PostgresPlanCatalog {
    async fn get_plan(&self, code: &str) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE code = $1 AND is_active",
            PLAN_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| read_error(e, "fetch plan"))?;

        row.map(Plan::try_from).transpose()
    }

    async fn find_by_id(&self, id: &PlanId) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> =
            sqlx::query_as(&format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| read_error(e, "fetch plan"))?;

        row.map(Plan::try_from).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Plan>, DomainError> {
        let rows: Vec<PlanRow> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE is_active ORDER BY sort_order, code",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "list plans"))?;

        rows.into_iter().map(Plan::try_from).collect()
    }
}
