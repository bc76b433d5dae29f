//! Runtime configuration

use serde::Deserialize;

/// Process-level settings: environment and log output.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub environment: Environment,

    /// `tracing_subscriber::EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON logs. Defaults to on in production.
    pub json_logs: Option<bool>,
}

/// Application environment
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn use_json_logs(&self) -> bool {
        self.json_logs.unwrap_or_else(|| self.is_production())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            log_level: default_log_level(),
            json_logs: None,
        }
    }
}

fn default_log_level() -> String {
    "info,billing_engine=debug".to_string()
}
