//! Application handlers.
//!
//! Command and query handlers that orchestrate domain operations.

pub mod access;
pub mod subscription;

pub use access::{
    CheckFeatureAccessQuery, FeatureAccessHandler, FeatureOverrideHandler, GetFeatureAccessQuery,
    RemoveFeatureOverrideCommand, SetFeatureOverrideCommand,
};
pub use subscription::*;
