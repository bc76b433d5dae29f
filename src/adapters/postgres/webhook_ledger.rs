//! PostgreSQL implementation of WebhookLedger.
//!
//! `record` relies on `ON CONFLICT (provider, event_id) DO NOTHING`; an
//! insert that affects no row is a redelivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::ProviderKind;
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, WebhookEventId};
use crate::ports::{RecordOutcome, WebhookEventRecord, WebhookLedger};

use super::pool::{corrupt, read_error};

pub struct PostgresWebhookLedger {
    pool: PgPool,
}

impl PostgresWebhookLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    id: Uuid,
    provider: String,
    event_id: String,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    processing_error: Option<String>,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookEventRow> for WebhookEventRecord {
    type Error = DomainError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        Ok(WebhookEventRecord {
            id: WebhookEventId::from_uuid(row.id),
            provider: row.provider.parse().map_err(|e| corrupt("provider", e))?,
            event_id: row.event_id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            processing_error: row.processing_error,
            received_at: Timestamp::from_datetime(row.received_at),
            processed_at: row.processed_at.map(Timestamp::from_datetime),
        })
    }
}

const SELECT_EVENT: &str = r#"
    SELECT id, provider, event_id, event_type, payload, status,
           processing_error, received_at, processed_at
    FROM webhook_events
"#;

impl PostgresWebhookLedger {
    async fn set_status(
        &self,
        id: &WebhookEventId,
        status: &str,
        error: Option<&str>,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, processing_error = $3, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| read_error(e, "update webhook event"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::NotFound,
                format!("Webhook event not found: {}", id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookLedger for PostgresWebhookLedger {
    async fn record(&self, record: WebhookEventRecord) -> Result<RecordOutcome, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id, provider, event_id, event_type, payload, status, received_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider, event_id) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.provider.as_str())
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(record.received_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| read_error(e, "record webhook event"))?;

        if result.rows_affected() == 0 {
            return Ok(RecordOutcome::Duplicate);
        }
        Ok(RecordOutcome::Inserted(record.id))
    }

    async fn mark_processed(&self, id: &WebhookEventId) -> Result<(), DomainError> {
        self.set_status(id, "processed", None).await
    }

    async fn mark_failed(&self, id: &WebhookEventId, error: &str) -> Result<(), DomainError> {
        self.set_status(id, "failed", Some(error)).await
    }

    async fn find(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(&format!(
            "{} WHERE provider = $1 AND event_id = $2",
            SELECT_EVENT
        ))
        .bind(provider.as_str())
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| read_error(e, "fetch webhook event"))?;

        row.map(WebhookEventRecord::try_from).transpose()
    }

    async fn list_failed(&self, limit: u32) -> Result<Vec<WebhookEventRecord>, DomainError> {
        let rows: Vec<WebhookEventRow> = sqlx::query_as(&format!(
            "{} WHERE status = 'failed' ORDER BY received_at LIMIT $1",
            SELECT_EVENT
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "list failed webhook events"))?;

        rows.into_iter().map(WebhookEventRecord::try_from).collect()
    }

    async fn purge_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "DELETE FROM webhook_events WHERE status = 'processed' AND received_at < $1",
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| read_error(e, "purge webhook events"))?;

        Ok(result.rows_affected())
    }
}
