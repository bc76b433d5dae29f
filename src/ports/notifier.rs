//! Notifier port - outbound subscription messages.
//!
//! Delivery is fire-and-log: a failed send never rolls back the state
//! change that triggered it, so methods return a [`NotifyResult`] instead of
//! an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::Subscription;
use crate::domain::foundation::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub success: bool,
    pub error: Option<String>,
}

impl NotifyResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_subscription_confirmation(&self, subscription: &Subscription) -> NotifyResult;

    async fn send_subscription_reminder(
        &self,
        subscription: &Subscription,
        days_remaining: u32,
    ) -> NotifyResult;

    async fn send_subscription_expired(&self, subscription: &Subscription) -> NotifyResult;

    async fn send_payment_failed(&self, user_id: &UserId, reason: Option<&str>) -> NotifyResult;
}
