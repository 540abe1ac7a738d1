//! Persistence for check history, latest status and alerts
//!
//! The monitor talks to storage through [`Store`]. Status transitions go
//! through a [`StatusTx`], which holds an exclusive per-service lock from the
//! first status read until it is committed or dropped. Dropping a
//! transaction without committing rolls it back.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Alert, CheckResult, NewAlert, NewCheck, ServiceId, ServiceStatus};

/// Shared handle to a store
pub type SharedStore = Arc<dyn Store>;

/// Transactional store used by the monitor
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Append an immutable check record
    async fn append_check(&self, check: NewCheck) -> Result<CheckResult, StoreError>;

    /// Begin a transaction scoped to one service's status row
    async fn begin_status_tx(
        &self,
        service_id: ServiceId,
    ) -> Result<Box<dyn StatusTx>, StoreError>;

    /// Latest committed status for a service
    async fn status(&self, service_id: ServiceId) -> Result<Option<ServiceStatus>, StoreError>;

    /// Latest committed status for every service that has one
    async fn all_statuses(&self) -> Result<Vec<ServiceStatus>, StoreError>;

    /// Most recent checks for a service, newest first, optionally bounded
    /// by `from <= checked_at` and `checked_at <= to`
    async fn recent_checks(
        &self,
        service_id: ServiceId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError>;

    /// Checks for a service with `from <= checked_at <= to`, oldest first
    async fn checks_between(
        &self,
        service_id: ServiceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError>;

    /// Most recent alerts for a service, newest first
    async fn recent_alerts(
        &self,
        service_id: ServiceId,
        limit: usize,
    ) -> Result<Vec<Alert>, StoreError>;
}

/// An open status transaction for a single service
#[async_trait]
pub trait StatusTx: Send {
    /// Read the current status and take the row lock for the rest of the
    /// transaction. `None` means the service has never been checked.
    async fn lock_status(&mut self) -> Result<Option<ServiceStatus>, StoreError>;

    /// Insert or replace the status row
    async fn upsert_status(&mut self, status: &ServiceStatus) -> Result<(), StoreError>;

    /// Append an alert
    async fn insert_alert(&mut self, alert: &NewAlert) -> Result<(), StoreError>;

    /// Make every write of this transaction visible at once
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Corrupted row: {0}")]
    Corrupted(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}
