//! Plan catalog port (read side).

use async_trait::async_trait;

use crate::domain::billing::Plan;
use crate::domain::foundation::{DomainError, PlanId};

/// Registry of purchasable plans.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    /// Find an active plan by code. Returns `None` for unknown codes.
    async fn get_plan(&self, code: &str) -> Result<Option<Plan>, DomainError>;

    /// Find a plan by id, including inactive ones still referenced by rows.
    async fn find_by_id(&self, id: &PlanId) -> Result<Option<Plan>, DomainError>;

    /// Active plans ordered by `sort_order`.
    async fn list_active(&self) -> Result<Vec<Plan>, DomainError>;
}
