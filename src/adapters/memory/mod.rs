//! In-memory adapters for tests and local development.

mod plan_catalog;
mod store;

pub use plan_catalog::InMemoryPlanCatalog;
pub use store::InMemoryBillingStore;
