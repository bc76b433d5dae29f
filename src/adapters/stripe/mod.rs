//! Stripe payment provider adapter (card).
//!
//! Implements the `PaymentProvider` port for Stripe:
//! - Checkout Sessions in subscription mode with inline prices
//! - Webhook signature verification
//! - Event normalisation
//! - Refunds
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`

mod stripe_adapter;
mod webhook_types;

pub use stripe_adapter::{map_stripe_event, StripeConfig, StripePaymentAdapter, SIGNATURE_HEADER};
pub use webhook_types::{SignatureHeader, SignatureParseError, StripeWebhookEvent};
