//! WebhookLedger port - idempotent store of received provider webhooks.
//!
//! Uniqueness on (provider, event_id) is the only idempotency mechanism for
//! webhook side effects: `record` returns `Duplicate` for a redelivery and
//! the caller skips all processing.
//!
//! Providers redeliver when:
//! - our endpoint timed out or returned 5xx
//! - our 2xx response was lost on the way back
//! - the provider simply sends twice

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::billing::ProviderKind;
use crate::domain::foundation::{DomainError, Timestamp, ValidationError, WebhookEventId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Received,
    Processed,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Received => "received",
            WebhookStatus::Processed => "processed",
            WebhookStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(WebhookStatus::Received),
            "processed" => Ok(WebhookStatus::Processed),
            "failed" => Ok(WebhookStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "webhook_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

/// One received webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEventRecord {
    pub id: WebhookEventId,
    pub provider: ProviderKind,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: WebhookStatus,
    pub processing_error: Option<String>,
    pub received_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

impl WebhookEventRecord {
    /// A freshly received event.
    pub fn received(
        provider: ProviderKind,
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: WebhookEventId::new(),
            provider,
            event_id: event_id.into(),
            event_type: event_type.into(),
            payload,
            status: WebhookStatus::Received,
            processing_error: None,
            received_at: Timestamp::now(),
            processed_at: None,
        }
    }
}

/// Result of recording a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First delivery; process it.
    Inserted(WebhookEventId),
    /// Seen before; skip every side effect.
    Duplicate,
}

/// Port for the webhook ledger.
///
/// Implementations must rely on a store-level unique constraint on
/// (provider, event_id), never on a read-then-write check.
#[async_trait]
pub trait WebhookLedger: Send + Sync {
    /// Insert the event as `received`, or report it as a duplicate.
    async fn record(&self, record: WebhookEventRecord) -> Result<RecordOutcome, DomainError>;

    async fn mark_processed(&self, id: &WebhookEventId) -> Result<(), DomainError>;

    async fn mark_failed(&self, id: &WebhookEventId, error: &str) -> Result<(), DomainError>;

    async fn find(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError>;

    /// Failed rows, oldest first, for manual reconciliation.
    async fn list_failed(&self, limit: u32) -> Result<Vec<WebhookEventRecord>, DomainError>;

    /// Delete processed rows received before `cutoff`. Returns rows deleted.
    async fn purge_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
