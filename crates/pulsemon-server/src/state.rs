use crate::persistence::FilePersistenceService;
use pulsemon_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    /// Present only for the file backend.
    pub persistence: Option<Arc<FilePersistenceService>>,
    pub ping_timeout: Duration,
}

impl AppState {
    /// Saves the snapshot right away when periodic flushing is off. Failures
    /// are logged; the update itself already succeeded.
    pub async fn persist_after_update(&self) {
        let Some(persistence) = self.persistence.as_ref().filter(|p| p.is_sync()) else {
            return;
        };
        match persistence.save_sync().await {
            Ok(()) => tracing::debug!("Snapshot saved after update"),
            Err(e) => tracing::error!(error = %e, "Failed to save snapshot after update"),
        }
    }
}
