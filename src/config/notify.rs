//! Notification delivery configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Where lifecycle notifications go. Without a service URL they are only logged.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub service_url: Option<String>,

    /// Bearer token for the notification service
    pub api_key: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(url) = &self.service_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ValidationError::InvalidUrl("notify.service_url"));
            }
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("notify.timeout_secs"));
        }
        Ok(())
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_url_must_be_http() {
        let config = NotifyConfig {
            service_url: Some("smtp://mail".to_string()),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidUrl("notify.service_url")));
        assert!(NotifyConfig::default().validate().is_ok());
    }
}
