//! Notifier that only writes structured log lines.

use async_trait::async_trait;
use tracing::info;

use crate::domain::billing::Subscription;
use crate::domain::foundation::UserId;
use crate::ports::{Notifier, NotifyResult};

/// Used when no notification service is configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_subscription_confirmation(&self, subscription: &Subscription) -> NotifyResult {
        info!(
            user_id = %subscription.user_id,
            plan = %subscription.plan_code,
            status = %subscription.status,
            "Subscription confirmation"
        );
        NotifyResult::ok()
    }

    async fn send_subscription_reminder(
        &self,
        subscription: &Subscription,
        days_remaining: u32,
    ) -> NotifyResult {
        info!(
            user_id = %subscription.user_id,
            plan = %subscription.plan_code,
            days_remaining,
            "Subscription renewal reminder"
        );
        NotifyResult::ok()
    }

    async fn send_subscription_expired(&self, subscription: &Subscription) -> NotifyResult {
        info!(
            user_id = %subscription.user_id,
            plan = %subscription.plan_code,
            "Subscription expired"
        );
        NotifyResult::ok()
    }

    async fn send_payment_failed(&self, user_id: &UserId, reason: Option<&str>) -> NotifyResult {
        info!(user_id = %user_id, reason = reason.unwrap_or("unknown"), "Payment failed");
        NotifyResult::ok()
    }
}
