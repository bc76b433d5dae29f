//! In-memory plan catalog seeded from the built-in plan table.

use async_trait::async_trait;

use crate::domain::billing::{default_plans, Plan};
use crate::domain::foundation::{DomainError, PlanId};
use crate::ports::PlanCatalog;

#[derive(Debug, Clone)]
pub struct InMemoryPlanCatalog {
    plans: Vec<Plan>,
}

impl InMemoryPlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        let mut plans = plans;
        plans.sort_by_key(|p| p.sort_order);
        Self { plans }
    }

    /// free, basic, premium, pro and enterprise priced in `currency`.
    pub fn with_default_plans(currency: &str) -> Self {
        Self::new(default_plans(currency))
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn get_plan(&self, code: &str) -> Result<Option<Plan>, DomainError> {
        Ok(self
            .plans
            .iter()
            .find(|p| p.code == code && p.is_active)
            .cloned())
    }

    async fn find_by_id(&self, id: &PlanId) -> Result<Option<Plan>, DomainError> {
        Ok(self.plans.iter().find(|p| p.id == *id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Plan>, DomainError> {
        Ok(self.plans.iter().filter(|p| p.is_active).cloned().collect())
    }
}
