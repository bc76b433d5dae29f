//! HandleWebhookHandler - verify, deduplicate, apply.
//!
//! A failed application leaves the ledger row `failed` and returns the
//! error so the transport answers with a retryable status. Redelivery of
//! the same event id is then a duplicate; repair goes through the failed
//! rows listing.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::adapters::payments::ProviderRegistry;
use crate::domain::billing::{BillingError, ProviderKind};
use crate::ports::{RecordOutcome, WebhookEventRecord, WebhookHeaders, WebhookLedger};

use super::apply_event::EventOutcome;
use super::lifecycle::SubscriptionLifecycle;

/// Raw webhook as forwarded by the transport.
#[derive(Debug, Clone)]
pub struct HandleWebhookCommand {
    pub provider: ProviderKind,
    pub payload: Vec<u8>,
    pub headers: WebhookHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleWebhookResult {
    Processed {
        event_id: String,
        event_type: &'static str,
        outcome: EventOutcome,
    },
    /// Already recorded; nothing was applied.
    Duplicate { event_id: String },
}

pub struct HandleWebhookHandler {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<dyn WebhookLedger>,
    lifecycle: Arc<SubscriptionLifecycle>,
}

impl HandleWebhookHandler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        ledger: Arc<dyn WebhookLedger>,
        lifecycle: Arc<SubscriptionLifecycle>,
    ) -> Self {
        Self {
            registry,
            ledger,
            lifecycle,
        }
    }

    pub async fn handle(&self, cmd: HandleWebhookCommand) -> Result<HandleWebhookResult, BillingError> {
        let provider = self.registry.get(cmd.provider)?;

        // 1. Verify signature
        if !provider.verify_webhook(&cmd.payload, &cmd.headers).await? {
            return Err(BillingError::InvalidWebhookSignature);
        }

        // 2. Normalize
        let event = provider.parse_webhook_event(&cmd.payload)?;

        // 3. Deduplicate
        let record = WebhookEventRecord::received(
            event.provider,
            event.provider_event_id.clone(),
            event.raw_type.clone(),
            stored_payload(&cmd.payload),
        );
        let record_id = match self.ledger.record(record).await? {
            RecordOutcome::Inserted(id) => id,
            RecordOutcome::Duplicate => {
                debug!(
                    provider = %event.provider,
                    event_id = %event.provider_event_id,
                    "Duplicate webhook skipped"
                );
                return Ok(HandleWebhookResult::Duplicate {
                    event_id: event.provider_event_id,
                });
            }
        };

        // 4. Apply
        match self.lifecycle.apply_event(&event).await {
            Ok(outcome) => {
                self.ledger.mark_processed(&record_id).await?;
                info!(
                    provider = %event.provider,
                    event_id = %event.provider_event_id,
                    event_type = event.event_type(),
                    outcome = ?outcome,
                    "Webhook processed"
                );
                Ok(HandleWebhookResult::Processed {
                    event_type: event.event_type(),
                    event_id: event.provider_event_id,
                    outcome,
                })
            }
            Err(e) => {
                error!(
                    provider = %event.provider,
                    event_id = %event.provider_event_id,
                    event_type = event.event_type(),
                    error = %e,
                    "Webhook processing failed"
                );
                if let Err(mark_err) = self.ledger.mark_failed(&record_id, &e.to_string()).await {
                    error!(
                        provider = %event.provider,
                        event_id = %event.provider_event_id,
                        error = %mark_err,
                        "Could not mark webhook failed"
                    );
                }
                Err(e)
            }
        }
    }
}

/// JSON payloads are stored as-is, anything else as a string.
fn stored_payload(payload: &[u8]) -> serde_json::Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()))
}
