//! Scheduler lease port.
//!
//! A store-level advisory lease so that only one process runs a scheduler
//! sweep at a time. The lease expires on its own if the holder dies.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::foundation::DomainError;

#[async_trait]
pub trait SchedulerLease: Send + Sync {
    /// Take the named lease for `ttl`. Returns false if another holder has
    /// an unexpired lease. Re-acquiring a lease already held by `holder`
    /// extends it.
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, DomainError>;

    /// Give the lease up early. Releasing a lease held by someone else is a no-op.
    async fn release(&self, name: &str, holder: &str) -> Result<(), DomainError>;
}
