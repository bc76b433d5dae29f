//! Subscription repository port.
//!
//! # Design
//!
//! - **History preserving**: rows are never deleted
//! - **Unique constraint**: at most one live row (active, trialing, past_due)
//!   per user; a violation surfaces as `ErrorCode::Conflict`
//! - **Atomic replacement**: closing the old row and inserting the new one
//!   happen in one store transaction

use async_trait::async_trait;

use crate::domain::billing::{ProviderKind, Subscription};
use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};

/// Reminder selection window, in days relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub min_days: i64,
    pub max_days: i64,
    /// Rows reminded more recently than this are skipped.
    pub cooldown_days: i64,
}

impl Default for ReminderWindow {
    fn default() -> Self {
        Self {
            min_days: 2,
            max_days: 4,
            cooldown_days: 7,
        }
    }
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert a new row.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the row is live and the user already has a live row
    /// - `DatabaseError` on persistence failure
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Persist changes to an existing row.
    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Close `previous` (already transitioned by the caller) and insert
    /// `next` in one store transaction.
    ///
    /// `previous` must have been live when read; if another writer closed it
    /// first the call fails with `Conflict` and nothing is written.
    async fn replace_live(
        &self,
        previous: Option<&Subscription>,
        next: &Subscription,
    ) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// The user's live row, if any.
    async fn find_live_by_user(&self, user_id: &UserId) -> Result<Option<Subscription>, DomainError>;

    /// Most recent row carrying the given provider reference.
    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Full history, newest first.
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError>;

    /// Active non-free rows whose period ends inside the reminder window.
    async fn find_due_for_reminder(
        &self,
        now: Timestamp,
        window: ReminderWindow,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Non-free rows whose period has ended: active or trialing ones, and
    /// past-due ones whose cancellation was deferred to period end.
    async fn find_lapsed(&self, now: Timestamp, limit: u32) -> Result<Vec<Subscription>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn SubscriptionRepository) {}
    }

    #[test]
    fn default_reminder_window() {
        let window = ReminderWindow::default();
        assert_eq!((window.min_days, window.max_days, window.cooldown_days), (2, 4, 7));
    }
}
