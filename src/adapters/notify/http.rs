//! Notifier that posts lifecycle messages to an external notification service.
//!
//! The service owns templates and delivery; this adapter only sends
//! `{template, user_id, data}` to `POST {service_url}/notifications`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::config::NotifyConfig;
use crate::domain::billing::Subscription;
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::{Notifier, NotifyResult};

#[derive(Debug, Serialize)]
struct NotificationRequest<'a> {
    template: &'a str,
    user_id: &'a str,
    data: serde_json::Value,
}

pub struct HttpNotifier {
    endpoint: String,
    api_key: Option<Secret<String>>,
    client: Client,
}

impl HttpNotifier {
    pub fn new(service_url: &str, api_key: Option<String>, client: Client) -> Self {
        Self {
            endpoint: format!("{}/notifications", service_url.trim_end_matches('/')),
            api_key: api_key.map(Secret::new),
            client,
        }
    }

    /// `None` when no service URL is configured.
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>, DomainError> {
        let Some(url) = config.service_url.as_deref() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                DomainError::new(
                    ErrorCode::InternalError,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;
        Ok(Some(Self::new(url, config.api_key.clone(), client)))
    }

    async fn send(&self, template: &str, user_id: &UserId, data: serde_json::Value) -> NotifyResult {
        let body = NotificationRequest {
            template,
            user_id: user_id.as_str(),
            data,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => NotifyResult::ok(),
            Ok(response) => {
                let status = response.status().as_u16();
                warn!(template, user_id = %user_id, status, "Notification rejected");
                NotifyResult::failed(format!("notification service returned {}", status))
            }
            Err(e) => {
                warn!(template, user_id = %user_id, error = %e, "Notification delivery failed");
                NotifyResult::failed(e.to_string())
            }
        }
    }
}

fn subscription_data(subscription: &Subscription) -> serde_json::Value {
    json!({
        "subscription_id": subscription.id.to_string(),
        "plan_code": subscription.plan_code,
        "status": subscription.status,
        "billing_cycle": subscription.billing_cycle,
        "current_period_end": subscription.current_period_end.as_datetime().to_rfc3339(),
        "trial_ends_at": subscription.trial_ends_at.map(|t| t.as_datetime().to_rfc3339()),
    })
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_subscription_confirmation(&self, subscription: &Subscription) -> NotifyResult {
        self.send(
            "subscription_confirmation",
            &subscription.user_id,
            subscription_data(subscription),
        )
        .await
    }

    async fn send_subscription_reminder(
        &self,
        subscription: &Subscription,
        days_remaining: u32,
    ) -> NotifyResult {
        let mut data = subscription_data(subscription);
        data["days_remaining"] = json!(days_remaining);
        self.send("subscription_reminder", &subscription.user_id, data).await
    }

    async fn send_subscription_expired(&self, subscription: &Subscription) -> NotifyResult {
        self.send(
            "subscription_expired",
            &subscription.user_id,
            subscription_data(subscription),
        )
        .await
    }

    async fn send_payment_failed(&self, user_id: &UserId, reason: Option<&str>) -> NotifyResult {
        self.send("payment_failed", user_id, json!({ "reason": reason })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let notifier = HttpNotifier::new("https://notify.internal/", None, Client::new());
        assert_eq!(notifier.endpoint, "https://notify.internal/notifications");
    }

    #[test]
    fn no_service_url_means_no_http_notifier() {
        let config = NotifyConfig::default();
        assert!(HttpNotifier::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_service_reports_failure() {
        // Port 9 (discard) on localhost refuses connections.
        let notifier = HttpNotifier::new("http://127.0.0.1:9", None, Client::new());
        let result = notifier
            .send_payment_failed(&UserId::new("u1").unwrap(), Some("card declined"))
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
