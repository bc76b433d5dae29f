//! Billing domain - plans, subscriptions, transactions and feature access.
//!
//! # Module Structure
//!
//! - `money` - Minor-unit amounts and exact decimal parsing
//! - `plan` - Plan tiers, levels and billing cycles
//! - `features` - Feature-access evaluation with overrides
//! - `status` - Subscription state machine
//! - `subscription` - Subscription aggregate
//! - `transaction` - Append-only monetary ledger rows
//! - `provider` - Payment provider identity
//! - `normalized_event` - Provider-neutral webhook events
//! - `errors` - Billing error taxonomy

mod errors;
mod features;
mod money;
mod normalized_event;
mod plan;
mod provider;
mod status;
mod subscription;
mod transaction;

pub use errors::{BillingError, ErrorCategory};
pub use features::{
    FeatureAccessEvaluator, FeatureAccessMap, FeatureDecision, FeatureOverride, OverrideAccess,
};
pub use money::{format_minor_units, parse_decimal_minor, Money};
pub use normalized_event::{NormalizedEvent, NormalizedEventKind};
pub use plan::{default_plans, BillingCycle, Plan, PlanLevel, FREE_PLAN_CODE, FREE_PLAN_PERIOD_DAYS};
pub use provider::ProviderKind;
pub use status::SubscriptionStatus;
pub use subscription::Subscription;
pub use transaction::{
    CheckoutMetadata, PurchaseMetadata, Transaction, TransactionStatus, TransactionType,
};
