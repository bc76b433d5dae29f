//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the billing domain and the outside world. Adapters implement these ports.
//!
//! ## Store Ports
//!
//! - `PlanCatalog` - Plan lookup
//! - `SubscriptionRepository` - Subscription rows with the one-live-row constraint
//! - `TransactionRepository` - Append-only monetary ledger
//! - `FeatureOverrideRepository` - Per-user feature grants and denials
//! - `WebhookLedger` - Webhook idempotency keyed by (provider, event_id)
//! - `SchedulerLease` - Advisory lease for the renewal scheduler
//!
//! ## External Service Ports
//!
//! - `PaymentProvider` - Card, wallet and instant transfer processors
//! - `Notifier` - Subscription emails and messages

mod feature_override_repository;
mod notifier;
mod payment_provider;
mod plan_catalog;
mod scheduler_lease;
mod subscription_repository;
mod transaction_repository;
mod webhook_ledger;

pub use feature_override_repository::FeatureOverrideRepository;
pub use notifier::{Notifier, NotifyResult};
pub use payment_provider::{
    CheckoutRequest, CheckoutSession, CustomerDetails, PaymentError, PaymentErrorCode,
    PaymentProvider, PortalSession, PurchaseRequest, RefundRequest, RefundResult, WebhookHeaders,
};
pub use plan_catalog::PlanCatalog;
pub use scheduler_lease::SchedulerLease;
pub use subscription_repository::{ReminderWindow, SubscriptionRepository};
pub use transaction_repository::TransactionRepository;
pub use webhook_ledger::{RecordOutcome, WebhookEventRecord, WebhookLedger, WebhookStatus};
