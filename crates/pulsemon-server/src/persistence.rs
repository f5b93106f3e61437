//! Periodic and forced flushing of a file-backed store.

use pulsemon_storage::{FilePersist, StorageError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("Flush: saving '{}' failed: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("Flush: save task aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

struct FlushLoop {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), FlushError>>,
}

/// Owns the snapshot schedule of a [`FilePersist`] store.
///
/// With a positive interval a background loop saves on every tick and once
/// more on stop. With a zero interval nothing runs in the background and the
/// HTTP handlers call [`save_sync`](Self::save_sync) after each update.
pub struct FilePersistenceService {
    store: Arc<dyn FilePersist>,
    path: PathBuf,
    interval: Duration,
    errors_tx: mpsc::Sender<FlushError>,
    errors_rx: Mutex<Option<mpsc::Receiver<FlushError>>>,
    flush_loop: tokio::sync::Mutex<Option<FlushLoop>>,
}

impl FilePersistenceService {
    pub fn new(store: Arc<dyn FilePersist>, path: impl Into<PathBuf>, interval: Duration) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(1);
        Self {
            store,
            path: path.into(),
            interval,
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
            flush_loop: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when every update must be followed by [`save_sync`](Self::save_sync).
    pub fn is_sync(&self) -> bool {
        self.interval.is_zero()
    }

    /// Receiver for background flush failures. Available once.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<FlushError>> {
        self.errors_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Starts the ticking flush loop unless the interval is zero.
    pub async fn start(&self) {
        if self.is_sync() {
            tracing::info!(path = %self.path.display(), "Snapshot saved after every update");
            return;
        }
        let mut flush_loop = self.flush_loop.lock().await;
        if flush_loop.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.store.clone(),
            self.path.clone(),
            self.interval,
            self.errors_tx.clone(),
            cancel.clone(),
        ));
        *flush_loop = Some(FlushLoop { cancel, handle });
        tracing::info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "Periodic snapshot flushing started"
        );
    }

    /// Saves now, off the async runtime threads.
    pub async fn save_sync(&self) -> Result<(), FlushError> {
        save(self.store.clone(), self.path.clone()).await
    }

    /// Stops the loop and returns the outcome of the final flush.
    pub async fn stop(&self) -> Result<(), FlushError> {
        let flush_loop = self.flush_loop.lock().await.take();
        let result = match flush_loop {
            Some(FlushLoop { cancel, handle }) => {
                cancel.cancel();
                handle.await?
            }
            None => self.save_sync().await,
        };
        if result.is_ok() {
            tracing::info!(path = %self.path.display(), "Final snapshot saved");
        }
        result
    }
}

async fn save(store: Arc<dyn FilePersist>, path: PathBuf) -> Result<(), FlushError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || store.save_to_file(&target))
        .await?
        .map_err(|source| FlushError::Save { path, source })
}

fn report(errors: &mpsc::Sender<FlushError>, err: FlushError) {
    match errors.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(err)) => {
            tracing::debug!(error = %err, "Flush error channel full, dropping error");
        }
        Err(TrySendError::Closed(err)) => {
            tracing::error!(error = %err, "Snapshot flush failed");
        }
    }
}

async fn run_loop(
    store: Arc<dyn FilePersist>,
    path: PathBuf,
    period: Duration,
    errors: mpsc::Sender<FlushError>,
    cancel: CancellationToken,
) -> Result<(), FlushError> {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                match save(store.clone(), path.clone()).await {
                    Ok(()) => tracing::debug!(path = %path.display(), "Periodic snapshot saved"),
                    Err(e) => report(&errors, e),
                }
            }
        }
    }
    save(store, path).await
}
