//! Administrative feature overrides.

use std::sync::Arc;

use tracing::info;

use crate::domain::billing::{BillingError, FeatureOverride, OverrideAccess};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::FeatureOverrideRepository;

/// Grant or deny one feature for one user. Replaces any existing override
/// for the same feature.
#[derive(Debug, Clone)]
pub struct SetFeatureOverrideCommand {
    pub user_id: UserId,
    pub feature_code: String,
    pub access: OverrideAccess,
    pub expires_at: Option<Timestamp>,
    pub reason: Option<String>,
}

impl SetFeatureOverrideCommand {
    pub fn grant(user_id: UserId, feature_code: impl Into<String>) -> Self {
        Self {
            user_id,
            feature_code: feature_code.into(),
            access: OverrideAccess::Grant,
            expires_at: None,
            reason: None,
        }
    }

    pub fn deny(user_id: UserId, feature_code: impl Into<String>) -> Self {
        Self {
            access: OverrideAccess::Deny,
            ..Self::grant(user_id, feature_code)
        }
    }

    pub fn expiring_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RemoveFeatureOverrideCommand {
    pub user_id: UserId,
    pub feature_code: String,
}

pub struct FeatureOverrideHandler {
    overrides: Arc<dyn FeatureOverrideRepository>,
}

impl FeatureOverrideHandler {
    pub fn new(overrides: Arc<dyn FeatureOverrideRepository>) -> Self {
        Self { overrides }
    }

    pub async fn set(&self, cmd: SetFeatureOverrideCommand) -> Result<FeatureOverride, BillingError> {
        let feature_code = cmd.feature_code.trim();
        if feature_code.is_empty() {
            return Err(BillingError::validation("feature_code", "cannot be empty"));
        }

        let feature_override = FeatureOverride::new(
            cmd.user_id.clone(),
            feature_code,
            cmd.access,
            cmd.expires_at,
            cmd.reason,
        );
        self.overrides.upsert(&feature_override).await?;

        info!(
            user_id = %cmd.user_id,
            feature = feature_code,
            access = cmd.access.as_str(),
            "Feature override set"
        );
        Ok(feature_override)
    }

    /// Returns false when there was nothing to remove.
    pub async fn remove(&self, cmd: RemoveFeatureOverrideCommand) -> Result<bool, BillingError> {
        let removed = self.overrides.remove(&cmd.user_id, &cmd.feature_code).await?;
        if removed {
            info!(user_id = %cmd.user_id, feature = %cmd.feature_code, "Feature override removed");
        }
        Ok(removed)
    }
}
