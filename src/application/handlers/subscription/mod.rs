//! Subscription handlers.
//!
//! ## Commands
//! - Creating, changing, cancelling and resuming subscriptions
//! - Starting provider checkouts and confirming BLIK codes
//! - One-time purchases and their capture
//! - Billing portal links for paid subscribers
//! - Processing payment webhooks
//! - Refunding transactions
//!
//! ## Queries
//! - Plan list, current subscription summary, transaction history
//! - Failed webhooks awaiting reconciliation

mod apply_event;
mod billing_portal;
mod capture_purchase;
mod confirm_payment;
mod handle_webhook;
mod lifecycle;
mod queries;
mod refund_transaction;
mod start_checkout;
mod start_purchase;
mod webhook_maintenance;

// Commands
pub use apply_event::{EventOutcome, RENEWAL_WINDOW_DAYS, SUPERSEDED_CODE};
pub use billing_portal::{BillingPortalCommand, BillingPortalHandler};
pub use capture_purchase::{CapturePurchaseCommand, CapturePurchaseHandler, CapturePurchaseResult};
pub use confirm_payment::{ConfirmPaymentCommand, ConfirmPaymentHandler, ConfirmPaymentResult};
pub use handle_webhook::{HandleWebhookCommand, HandleWebhookHandler, HandleWebhookResult};
pub use lifecycle::{
    CancelSubscriptionCommand, ChangePlanCommand, CreateSubscriptionCommand, LapseOutcome,
    SubscriptionLifecycle, REPLACED_REASON,
};
pub use refund_transaction::{RefundTransactionCommand, RefundTransactionHandler, RefundTransactionResult};
pub use start_checkout::{StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult};
pub use start_purchase::{StartPurchaseCommand, StartPurchaseHandler, StartPurchaseResult};
pub use webhook_maintenance::WebhookMaintenanceHandler;

// Queries
pub use queries::{
    BillingQueries, ListTransactionsQuery, SubscriptionSummary, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};
