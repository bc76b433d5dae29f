//! Feature override repository port.

use async_trait::async_trait;

use crate::domain::billing::FeatureOverride;
use crate::domain::foundation::{DomainError, UserId};

/// Storage for per-user feature grants and denials.
///
/// One row per (user, feature); writing again replaces the previous row.
#[async_trait]
pub trait FeatureOverrideRepository: Send + Sync {
    async fn upsert(&self, feature_override: &FeatureOverride) -> Result<(), DomainError>;

    /// Returns true if a row was removed.
    async fn remove(&self, user_id: &UserId, feature_code: &str) -> Result<bool, DomainError>;

    /// All rows for the user, expired ones included.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FeatureOverride>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_override_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn FeatureOverrideRepository) {}
    }
}
