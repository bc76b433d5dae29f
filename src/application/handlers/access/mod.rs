//! Feature access: plan-based gating plus administrative overrides.

mod get_feature_access;
mod manage_overrides;

pub use get_feature_access::{CheckFeatureAccessQuery, FeatureAccessHandler, GetFeatureAccessQuery};
pub use manage_overrides::{FeatureOverrideHandler, RemoveFeatureOverrideCommand, SetFeatureOverrideCommand};
