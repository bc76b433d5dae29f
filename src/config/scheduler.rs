//! Renewal scheduler configuration

use serde::Deserialize;
use std::time::Duration;

use crate::ports::ReminderWindow;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// How long one instance holds the tick lease
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Lease holder name; generated when unset
    pub instance_id: Option<String>,

    #[serde(default = "default_reminder_min_days")]
    pub reminder_min_days: u32,

    #[serde(default = "default_reminder_max_days")]
    pub reminder_max_days: u32,

    #[serde(default = "default_reminder_cooldown_days")]
    pub reminder_cooldown_days: u32,

    /// Rows examined per sub-task per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn reminder_window(&self) -> ReminderWindow {
        ReminderWindow {
            min_days: i64::from(self.reminder_min_days),
            max_days: i64::from(self.reminder_max_days),
            cooldown_days: i64::from(self.reminder_cooldown_days),
        }
    }

    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("billing-worker-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidInterval);
        }
        if self.lease_ttl_secs == 0 {
            return Err(ValidationError::InvalidTimeout("scheduler.lease_ttl_secs"));
        }
        if self.reminder_min_days > self.reminder_max_days {
            return Err(ValidationError::InvalidReminderWindow);
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            lease_ttl_secs: default_lease_ttl(),
            instance_id: None,
            reminder_min_days: default_reminder_min_days(),
            reminder_max_days: default_reminder_max_days(),
            reminder_cooldown_days: default_reminder_cooldown_days(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    3600
}

fn default_lease_ttl() -> u64 {
    600
}

fn default_reminder_min_days() -> u32 {
    2
}

fn default_reminder_max_days() -> u32 {
    4
}

fn default_reminder_cooldown_days() -> u32 {
    7
}

fn default_batch_size() -> u32 {
    500
}
