//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing domain to external systems:
//! - `stripe`, `paypal`, `przelewy24` - payment processors
//! - `payments` - provider registry, shared HTTP plumbing, mock provider
//! - `postgres` - sqlx-backed store ports
//! - `memory` - in-memory store ports for tests and development
//! - `notify` - lifecycle notifications

pub mod memory;
pub mod notify;
pub mod payments;
pub mod paypal;
pub mod postgres;
pub mod przelewy24;
pub mod stripe;

pub use memory::{InMemoryBillingStore, InMemoryPlanCatalog};
pub use notify::{HttpNotifier, LoggingNotifier};
pub use payments::{MockPaymentProvider, ProviderRegistry};
