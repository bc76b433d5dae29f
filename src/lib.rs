//! Billing Engine - subscriptions, payments and feature gating for a SaaS
//! platform.
//!
//! Plans, per-user subscription lifecycle, checkout through three payment
//! providers, idempotent webhook processing, plan-based feature access and
//! a renewal/expiry scheduler.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
