//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Command handlers own writes; `BillingQueries` and the feature-access
//! handler serve reads. The renewal scheduler drives time-based transitions.

pub mod handlers;
pub mod scheduler;

pub use handlers::{
    // Feature access
    CheckFeatureAccessQuery, FeatureAccessHandler, FeatureOverrideHandler, GetFeatureAccessQuery,
    RemoveFeatureOverrideCommand, SetFeatureOverrideCommand,
    // Subscription lifecycle
    CancelSubscriptionCommand, ChangePlanCommand, CreateSubscriptionCommand, EventOutcome,
    SubscriptionLifecycle,
    // Payments
    BillingPortalCommand, BillingPortalHandler, CapturePurchaseCommand, CapturePurchaseHandler,
    CapturePurchaseResult, ConfirmPaymentCommand, ConfirmPaymentHandler, ConfirmPaymentResult,
    HandleWebhookCommand, HandleWebhookHandler, HandleWebhookResult, RefundTransactionCommand,
    RefundTransactionHandler, RefundTransactionResult, StartCheckoutCommand, StartCheckoutHandler,
    StartCheckoutResult, StartPurchaseCommand, StartPurchaseHandler, StartPurchaseResult,
    WebhookMaintenanceHandler,
    // Queries
    BillingQueries, ListTransactionsQuery, SubscriptionSummary,
};
pub use scheduler::{RenewalScheduler, RenewalSchedulerConfig, SchedulerStats, TickReport};
