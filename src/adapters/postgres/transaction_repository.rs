//! PostgreSQL implementation of TransactionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{ProviderKind, Transaction};
use crate::domain::foundation::{
    DomainError, ErrorCode, SubscriptionId, Timestamp, TransactionId, UserId,
};
use crate::ports::TransactionRepository;

use super::pool::{corrupt, map_write_error, read_error};

const PROVIDER_REF_KEY: &str = "transactions_provider_ref_key";

pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: String,
    subscription_id: Option<Uuid>,
    transaction_type: String,
    status: String,
    amount: i64,
    currency: String,
    provider: String,
    provider_transaction_id: Option<String>,
    refunded_transaction_id: Option<Uuid>,
    description: Option<String>,
    metadata: serde_json::Value,
    failure_code: Option<String>,
    failure_message: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DomainError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| corrupt("user_id", e))?,
            subscription_id: row.subscription_id.map(SubscriptionId::from_uuid),
            transaction_type: row
                .transaction_type
                .parse()
                .map_err(|e| corrupt("transaction_type", e))?,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            amount: row.amount,
            currency: row.currency.trim().to_string(),
            provider: row.provider.parse().map_err(|e| corrupt("provider", e))?,
            provider_transaction_id: row.provider_transaction_id,
            refunded_transaction_id: row.refunded_transaction_id.map(TransactionId::from_uuid),
            description: row.description,
            metadata: row.metadata,
            failure_code: row.failure_code,
            failure_message: row.failure_message,
            created_at: Timestamp::from_datetime(row.created_at),
            completed_at: row.completed_at.map(Timestamp::from_datetime),
        })
    }
}

const SELECT_TRANSACTION: &str = r#"
    SELECT id, user_id, subscription_id, transaction_type, status, amount,
           currency, provider, provider_transaction_id, refunded_transaction_id,
           description, metadata, failure_code, failure_message,
           created_at, completed_at
    FROM transactions
"#;

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn insert(&self, txn: &Transaction) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, user_id, subscription_id, transaction_type, status, amount,
                currency, provider, provider_transaction_id, refunded_transaction_id,
                description, metadata, failure_code, failure_message,
                created_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(txn.id.as_uuid())
        .bind(txn.user_id.as_str())
        .bind(txn.subscription_id.as_ref().map(SubscriptionId::as_uuid))
        .bind(txn.transaction_type.as_str())
        .bind(txn.status.as_str())
        .bind(txn.amount)
        .bind(&txn.currency)
        .bind(txn.provider.as_str())
        .bind(&txn.provider_transaction_id)
        .bind(txn.refunded_transaction_id.as_ref().map(TransactionId::as_uuid))
        .bind(&txn.description)
        .bind(&txn.metadata)
        .bind(&txn.failure_code)
        .bind(&txn.failure_message)
        .bind(txn.created_at.as_datetime())
        .bind(txn.completed_at.as_ref().map(Timestamp::as_datetime))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, PROVIDER_REF_KEY, "insert transaction"))?;

        Ok(())
    }

    async fn update(&self, txn: &Transaction) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                subscription_id = $2,
                status = $3,
                provider_transaction_id = $4,
                metadata = $5,
                failure_code = $6,
                failure_message = $7,
                completed_at = $8
            WHERE id = $1
            "#,
        )
        .bind(txn.id.as_uuid())
        .bind(txn.subscription_id.as_ref().map(SubscriptionId::as_uuid))
        .bind(txn.status.as_str())
        .bind(&txn.provider_transaction_id)
        .bind(&txn.metadata)
        .bind(&txn.failure_code)
        .bind(&txn.failure_message)
        .bind(txn.completed_at.as_ref().map(Timestamp::as_datetime))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, PROVIDER_REF_KEY, "update transaction"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::TransactionNotFound,
                format!("Transaction not found: {}", txn.id),
            ));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, DomainError> {
        let row: Option<TransactionRow> =
            sqlx::query_as(&format!("{} WHERE id = $1", SELECT_TRANSACTION))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| read_error(e, "fetch transaction"))?;

        row.map(Transaction::try_from).transpose()
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_transaction_id: &str,
    ) -> Result<Option<Transaction>, DomainError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "{} WHERE provider = $1 AND provider_transaction_id = $2 ORDER BY created_at DESC LIMIT 1",
            SELECT_TRANSACTION
        ))
        .bind(provider.as_str())
        .bind(provider_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| read_error(e, "fetch transaction by provider ref"))?;

        row.map(Transaction::try_from).transpose()
    }

    async fn list_refunds_of(&self, original: &TransactionId) -> Result<Vec<Transaction>, DomainError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "{} WHERE refunded_transaction_id = $1 ORDER BY created_at DESC, id",
            SELECT_TRANSACTION
        ))
        .bind(original.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "list refunds"))?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Transaction>, DomainError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "{} WHERE user_id = $1 ORDER BY created_at DESC, id LIMIT $2 OFFSET $3",
            SELECT_TRANSACTION
        ))
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error(e, "list transactions"))?;

        rows.into_iter().map(Transaction::try_from).collect()
    }
}
