//! Operator tooling for the webhook ledger.

use std::sync::Arc;

use tracing::info;

use crate::domain::billing::BillingError;
use crate::domain::foundation::Timestamp;
use crate::ports::{WebhookEventRecord, WebhookLedger};

pub struct WebhookMaintenanceHandler {
    ledger: Arc<dyn WebhookLedger>,
}

impl WebhookMaintenanceHandler {
    pub fn new(ledger: Arc<dyn WebhookLedger>) -> Self {
        Self { ledger }
    }

    /// Failed events awaiting manual reconciliation, oldest first.
    pub async fn list_failed(&self, limit: u32) -> Result<Vec<WebhookEventRecord>, BillingError> {
        Ok(self.ledger.list_failed(limit.clamp(1, 500)).await?)
    }

    /// Delete processed events older than `retention_days`. Failed rows are kept.
    pub async fn purge_processed(&self, retention_days: u32) -> Result<u64, BillingError> {
        if retention_days == 0 {
            return Err(BillingError::validation("retention_days", "must be at least 1"));
        }
        let cutoff = Timestamp::now().minus_days(i64::from(retention_days));
        let purged = self.ledger.purge_processed_before(cutoff).await?;
        info!(purged, retention_days, "Purged processed webhook events");
        Ok(purged)
    }
}
