//! Transaction repository port.
//!
//! The monetary ledger is append-only: rows are inserted and their status
//! updated, never deleted.

use async_trait::async_trait;

use crate::domain::billing::{ProviderKind, Transaction};
use crate::domain::foundation::{DomainError, TransactionId, UserId};

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, transaction: &Transaction) -> Result<(), DomainError>;

    /// Persist a status change (and the fields that go with it).
    async fn update(&self, transaction: &Transaction) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, DomainError>;

    /// Most recent row with this provider reference.
    ///
    /// This is how webhooks correlate with locally created transactions.
    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        provider_transaction_id: &str,
    ) -> Result<Option<Transaction>, DomainError>;

    /// Refund rows linked to `original`, newest first.
    async fn list_refunds_of(&self, original: &TransactionId) -> Result<Vec<Transaction>, DomainError>;

    /// History for one user, newest first.
    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Transaction>, DomainError>;
}
