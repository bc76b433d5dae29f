//! PayPal payment provider adapter (wallet).
//!
//! - Billing subscriptions against dashboard-configured plans
//! - Webhook verification through PayPal's verification API
//! - Event normalisation
//! - Sale refunds

mod paypal_adapter;
mod webhook_types;

pub use paypal_adapter::{map_paypal_event, PayPalConfig, PayPalPaymentAdapter};
pub use webhook_types::{CustomId, PayPalPlanMap, PayPalWebhookEvent};
