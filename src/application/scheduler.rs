//! RenewalScheduler - periodic reminder and expiry sweep.
//!
//! Each tick runs two sub-tasks that fail independently:
//!
//! 1. **Reminders** - active paid rows ending inside the reminder window are
//!    notified, then stamped. A failed send is not stamped and is retried
//!    on the next tick.
//! 2. **Expiry** - paid rows whose period has passed are closed (`expired`,
//!    or `cancelled` when a deferred cancellation was requested) and the
//!    user is moved to the free plan in the same store transaction.
//!
//! Per-row failures are counted and logged; they never abort the batch.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 1h | Time between ticks |
//! | `lease_ttl` | 5m | How long one instance owns a tick |
//! | `batch_size` | 500 | Rows per sub-task per tick |
//!
//! Only the instance holding the `renewal-scheduler` lease does any work,
//! so several workers can run side by side.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::domain::billing::{BillingError, SubscriptionStatus, FREE_PLAN_CODE};
use crate::domain::foundation::Timestamp;
use crate::ports::{Notifier, ReminderWindow, SchedulerLease, SubscriptionRepository};

use super::handlers::subscription::SubscriptionLifecycle;

/// Lease row shared by every worker instance.
pub const LEASE_NAME: &str = "renewal-scheduler";

#[derive(Debug, Clone)]
pub struct RenewalSchedulerConfig {
    pub interval: Duration,
    pub lease_ttl: Duration,
    pub instance_id: String,
    pub reminder_window: ReminderWindow,
    pub batch_size: u32,
}

impl Default for RenewalSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            lease_ttl: Duration::from_secs(300),
            instance_id: format!("billing-worker-{}", uuid::Uuid::new_v4().simple()),
            reminder_window: ReminderWindow::default(),
            batch_size: 500,
        }
    }
}

impl RenewalSchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }
}

impl From<&SchedulerConfig> for RenewalSchedulerConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            interval: config.interval(),
            lease_ttl: config.lease_ttl(),
            instance_id: config.instance_id(),
            reminder_window: config.reminder_window(),
            batch_size: config.batch_size,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub reminders_sent: u32,
    pub reminder_failures: u32,
    pub expired: u32,
    pub cancelled: u32,
    pub downgraded: u32,
    /// Expiry rows (or whole sub-tasks) that errored.
    pub failures: u32,
    /// Another instance held the lease; nothing was done.
    pub skipped_no_lease: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub interval: Duration,
    pub last_tick: Option<Timestamp>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct RenewalScheduler {
    lifecycle: Arc<SubscriptionLifecycle>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    lease: Arc<dyn SchedulerLease>,
    notifier: Arc<dyn Notifier>,
    config: RenewalSchedulerConfig,
    running: Mutex<Option<Running>>,
    last_tick: RwLock<Option<Timestamp>>,
}

impl RenewalScheduler {
    pub fn new(
        lifecycle: Arc<SubscriptionLifecycle>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        lease: Arc<dyn SchedulerLease>,
        notifier: Arc<dyn Notifier>,
        config: RenewalSchedulerConfig,
    ) -> Self {
        Self {
            lifecycle,
            subscriptions,
            lease,
            notifier,
            config,
            running: Mutex::new(None),
            last_tick: RwLock::new(None),
        }
    }

    /// Spawn the tick loop. The first tick runs immediately.
    pub async fn start(self: &Arc<Self>) -> Result<(), BillingError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(BillingError::InvalidState("renewal scheduler is already running".into()));
        }

        let (shutdown, rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        *running = Some(Running { shutdown, handle });

        info!(
            instance_id = %self.config.instance_id,
            interval_secs = self.config.interval.as_secs(),
            "Renewal scheduler started"
        );
        Ok(())
    }

    /// Signal shutdown and wait for the current tick to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            error!(error = %e, "Renewal scheduler task ended abnormally");
        }
        info!(instance_id = %self.config.instance_id, "Renewal scheduler stopped");
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running: self.running.lock().await.is_some(),
            interval: self.config.interval,
            last_tick: *self.last_tick.read().await,
        }
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Renewal tick failed");
                    }
                }
            }
        }
    }

    /// Run one sweep now. Used by the loop and directly by tests.
    pub async fn tick(&self) -> Result<TickReport, BillingError> {
        let mut report = TickReport::default();
        let holder = self.config.instance_id.as_str();

        if !self.lease.try_acquire(LEASE_NAME, holder, self.config.lease_ttl).await? {
            debug!(instance_id = %holder, "Renewal lease held elsewhere; skipping tick");
            report.skipped_no_lease = true;
            return Ok(report);
        }

        let now = Timestamp::now();
        self.send_reminders(now, &mut report).await;
        self.expire_lapsed(now, &mut report).await;

        if let Err(e) = self.lease.release(LEASE_NAME, holder).await {
            warn!(error = %e, "Could not release renewal lease; it will lapse");
        }
        *self.last_tick.write().await = Some(now);

        info!(
            reminders_sent = report.reminders_sent,
            reminder_failures = report.reminder_failures,
            expired = report.expired,
            cancelled = report.cancelled,
            downgraded = report.downgraded,
            failures = report.failures,
            "Renewal tick complete"
        );
        Ok(report)
    }

    async fn send_reminders(&self, now: Timestamp, report: &mut TickReport) {
        let due = match self
            .subscriptions
            .find_due_for_reminder(now, self.config.reminder_window, self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Could not load subscriptions due for reminder");
                report.failures += 1;
                return;
            }
        };

        for mut sub in due {
            let days = sub.days_remaining(now);
            let result = self.notifier.send_subscription_reminder(&sub, days).await;
            if !result.success {
                warn!(
                    user_id = %sub.user_id,
                    subscription_id = %sub.id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Renewal reminder failed"
                );
                report.reminder_failures += 1;
                continue;
            }

            sub.mark_reminded(now);
            match self.subscriptions.update(&sub).await {
                Ok(()) => report.reminders_sent += 1,
                Err(e) => {
                    error!(subscription_id = %sub.id, error = %e, "Could not stamp reminder");
                    report.reminder_failures += 1;
                }
            }
        }
    }

    async fn expire_lapsed(&self, now: Timestamp, report: &mut TickReport) {
        let lapsed = match self.subscriptions.find_lapsed(now, self.config.batch_size).await {
            Ok(lapsed) => lapsed,
            Err(e) => {
                error!(error = %e, "Could not load lapsed subscriptions");
                report.failures += 1;
                return;
            }
        };
        if lapsed.is_empty() {
            return;
        }

        let free_plan = match self.lifecycle.plan(FREE_PLAN_CODE).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Free plan unavailable; cannot downgrade lapsed subscriptions");
                report.failures += 1;
                return;
            }
        };

        for sub in lapsed {
            match self.lifecycle.close_lapsed(&sub, &free_plan, now).await {
                Ok(outcome) => {
                    match outcome.closed_as {
                        SubscriptionStatus::Cancelled => report.cancelled += 1,
                        _ => report.expired += 1,
                    }
                    report.downgraded += 1;

                    let result = self.notifier.send_subscription_expired(&outcome.closed).await;
                    if !result.success {
                        warn!(
                            user_id = %outcome.closed.user_id,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "Expiry notification failed"
                        );
                    }
                }
                Err(e) => {
                    error!(
                        user_id = %sub.user_id,
                        subscription_id = %sub.id,
                        error = %e,
                        "Could not close lapsed subscription"
                    );
                    report.failures += 1;
                }
            }
        }
    }
}
