//! Services loaded from a JSON file

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ServiceSource, SourceError};
use crate::model::Service;

/// Service source backed by a JSON array of [`Service`] definitions.
///
/// A file-backed source re-reads the file on every query, so edits take
/// effect on the next scheduler tick; if the file becomes unreadable the last
/// good list is served. Sources built from a list have no file and only
/// change via [`set_services`](Self::set_services).
pub struct FileServiceSource {
    path: Option<PathBuf>,
    services: RwLock<Vec<Service>>,
}

impl FileServiceSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let services = Self::read(&path).await?;

        tracing::info!(path = %path.display(), count = services.len(), "Loaded service definitions");

        Ok(Self {
            path: Some(path),
            services: RwLock::new(services),
        })
    }

    pub fn from_services(services: Vec<Service>) -> Self {
        Self {
            path: None,
            services: RwLock::new(services),
        }
    }

    /// Re-read the backing file. The current list is kept if reading fails.
    pub async fn reload(&self) -> Result<usize, SourceError> {
        let Some(path) = &self.path else {
            return Ok(self.services.read().len());
        };

        let services = Self::read(path).await?;
        let count = services.len();
        *self.services.write() = services;
        Ok(count)
    }

    /// Replace the whole service list
    pub fn set_services(&self, services: Vec<Service>) {
        *self.services.write() = services;
    }

    async fn read(path: &Path) -> Result<Vec<Service>, SourceError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl ServiceSource for FileServiceSource {
    async fn services(&self) -> Result<Vec<Service>, SourceError> {
        if let Err(e) = self.reload().await {
            tracing::warn!(error = %e, "Failed to reload service definitions, keeping previous list");
        }
        Ok(self.services.read().clone())
    }
}
