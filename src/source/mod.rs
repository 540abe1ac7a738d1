//! Where the monitor gets its service definitions from

pub mod file;

pub use file::FileServiceSource;

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Service, ServiceId};
use crate::storage::StoreError;

/// Shared handle to a service source
pub type SharedSource = Arc<dyn ServiceSource>;

/// Read-only view of the defined services
#[async_trait]
pub trait ServiceSource: Send + Sync + 'static {
    /// Every service, active or not
    async fn services(&self) -> Result<Vec<Service>, SourceError>;

    /// Snapshot of active services, queried once per scheduler tick
    async fn active_services(&self) -> Result<Vec<Service>, SourceError> {
        Ok(self
            .services()
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .collect())
    }

    /// Look up a single service
    async fn service(&self, id: ServiceId) -> Result<Option<Service>, SourceError> {
        Ok(self.services().await?.into_iter().find(|s| s.id == id))
    }
}

/// Service source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid service definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
