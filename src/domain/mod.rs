//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machines)
//! - `billing` - Plans, subscription lifecycle, transactions and feature access

pub mod billing;
pub mod foundation;
