//! Latest-value metric storage for the pulsemon server.
//!
//! Every backend implements [`Storage`]: [`memory::MemoryStore`] keeps the
//! maps in process, [`file::FileBackedStore`] adds JSON snapshot persistence
//! through [`FilePersist`], and [`relational::RelationalStore`] upserts into
//! SQLite or PostgreSQL with retried calls.

pub mod entities;
pub mod error;
pub mod file;
pub mod memory;
pub mod relational;


use async_trait::async_trait;
use pulsemon_common::types::{Metric, MetricKind};
use std::collections::HashMap;
use std::path::Path;

pub use error::{Result, StorageError};

/// Persistence backend for gauges and counters.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because every HTTP request runs on its own task against the same store.
/// Gauges overwrite on update; counters accumulate.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    async fn update_gauge(&self, name: &str, value: f64) -> Result<()>;

    /// Adds `delta` to the stored counter, creating it when absent.
    async fn update_counter(&self, name: &str, delta: i64) -> Result<()>;

    /// Looks up one metric; lookups are always qualified by kind.
    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>>;

    /// Returns every stored metric keyed by name.
    ///
    /// When a gauge and a counter share a name the counter wins.
    async fn get_all(&self) -> Result<HashMap<String, Metric>>;

    /// Applies a batch of metrics. Every metric is validated first; an
    /// invalid one rejects the whole batch before anything is written.
    async fn update_batch(&self, metrics: &[Metric]) -> Result<()>;

    /// Releases backend resources. Further calls may fail.
    async fn close(&self) -> Result<()>;
}

/// Snapshot persistence, implemented only by backends that live in a file.
pub trait FilePersist: Send + Sync {
    /// Writes the full state to `path` atomically.
    fn save_to_file(&self, path: &Path) -> Result<()>;

    /// Replaces the state with the contents of `path`. A missing file
    /// leaves the store empty.
    fn load_from_file(&self, path: &Path) -> Result<()>;
}

/// Folds gauges then counters into one name-keyed map.
pub(crate) fn merge_metrics(
    gauges: impl IntoIterator<Item = (String, f64)>,
    counters: impl IntoIterator<Item = (String, i64)>,
) -> HashMap<String, Metric> {
    let mut all: HashMap<String, Metric> = gauges
        .into_iter()
        .map(|(name, value)| (name.clone(), Metric::gauge(name, value)))
        .collect();
    for (name, delta) in counters {
        if all.contains_key(&name) {
            tracing::warn!(name = %name, "Gauge and counter share a name, reporting the counter");
        }
        all.insert(name.clone(), Metric::counter(name, delta));
    }
    all
}
