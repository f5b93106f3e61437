//! Storage backend selection, done once at startup.

use crate::config::ServerConfig;
use crate::persistence::FilePersistenceService;
use crate::state::AppState;
use anyhow::{Context, Result};
use pulsemon_common::retry::RetryExecutor;
use pulsemon_storage::file::FileBackedStore;
use pulsemon_storage::memory::MemoryStore;
use pulsemon_storage::relational::RelationalStore;
use pulsemon_storage::{FilePersist, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The backend chosen for this process.
pub enum StorageBackend {
    Memory(Arc<MemoryStore>),
    File {
        store: Arc<FileBackedStore>,
        persistence: Arc<FilePersistenceService>,
    },
    Relational(Arc<RelationalStore>),
}

impl StorageBackend {
    /// Database DSN first, then snapshot file, then memory.
    ///
    /// `shutdown` interrupts retry backoff of relational calls.
    pub async fn select(config: &ServerConfig, shutdown: CancellationToken) -> Result<Self> {
        let backend = if let Some(dsn) = config.database_dsn() {
            let retry = RetryExecutor::new(config.retry.policy());
            let store = RelationalStore::open(dsn, retry, shutdown)
                .await
                .context("opening relational storage")?;
            StorageBackend::Relational(Arc::new(store))
        } else if let Some(path) = config.file_storage_path() {
            let store = Arc::new(FileBackedStore::new());
            if config.restore {
                store
                    .load_from_file(&path)
                    .with_context(|| format!("restoring metrics from {}", path.display()))?;
            }
            let persistence = Arc::new(FilePersistenceService::new(
                store.clone(),
                path,
                config.store_interval(),
            ));
            StorageBackend::File { store, persistence }
        } else {
            StorageBackend::Memory(Arc::new(MemoryStore::new()))
        };

        tracing::info!(backend = backend.name(), "Storage backend selected");
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Memory(_) => "memory",
            StorageBackend::File { .. } => "file",
            StorageBackend::Relational(_) => "relational",
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        match self {
            StorageBackend::Memory(store) => store.clone(),
            StorageBackend::File { store, .. } => store.clone(),
            StorageBackend::Relational(store) => store.clone(),
        }
    }

    pub fn persistence(&self) -> Option<Arc<FilePersistenceService>> {
        match self {
            StorageBackend::File { persistence, .. } => Some(persistence.clone()),
            _ => None,
        }
    }

    pub fn app_state(&self, ping_timeout: Duration) -> AppState {
        AppState {
            storage: self.storage(),
            persistence: self.persistence(),
            ping_timeout,
        }
    }

    /// Final snapshot flush (file backend), then close.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(persistence) = self.persistence() {
            if let Err(e) = persistence.stop().await {
                tracing::error!(error = %e, "Final snapshot flush failed");
            }
        }
        self.storage()
            .close()
            .await
            .context("closing storage backend")?;
        tracing::info!(backend = self.name(), "Storage closed");
        Ok(())
    }
}
