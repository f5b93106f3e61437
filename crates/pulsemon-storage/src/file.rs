use crate::error::{Result, StorageError};
use crate::memory::{Maps, MemoryStore};
use crate::{FilePersist, Storage};
use async_trait::async_trait;
use pulsemon_common::types::{Metric, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// On-disk layout: `{"gauges": {name: f64}, "counters": {name: i64}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    gauges: BTreeMap<String, f64>,
    #[serde(default)]
    counters: BTreeMap<String, i64>,
}

/// [`MemoryStore`] plus JSON snapshot persistence.
///
/// Updates only touch memory; the state reaches disk when a caller invokes
/// [`FilePersist::save_to_file`], usually through the server's persistence
/// service. Saves are serialized, so the file on disk never goes back to an
/// older export than one already written.
#[derive(Debug, Default)]
pub struct FileBackedStore {
    memory: MemoryStore,
    save_lock: Mutex<()>,
}

impl FileBackedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "metrics".into());
    name.push(".tmp");
    path.with_file_name(name)
}

impl FilePersist for FileBackedStore {
    fn save_to_file(&self, path: &Path) -> Result<()> {
        // Held from export to rename: concurrent saves share the temp file.
        let _guard = self
            .save_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let maps = self.memory.export();
        let snapshot = Snapshot {
            gauges: maps.gauges.into_iter().collect(),
            counters: maps.counters.into_iter().collect(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let tmp = temp_sibling(path);
        let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
        file.write_all(&data)
            .and_then(|()| file.sync_all())
            .map_err(|e| StorageError::io(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))?;

        tracing::debug!(
            path = %path.display(),
            gauges = snapshot.gauges.len(),
            counters = snapshot.counters.len(),
            "Saved metrics snapshot"
        );
        Ok(())
    }

    fn load_from_file(&self, path: &Path) -> Result<()> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No metrics snapshot yet, starting empty");
                return Ok(());
            }
            Err(e) => return Err(StorageError::io(path, e)),
        };
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        tracing::info!(
            path = %path.display(),
            gauges = snapshot.gauges.len(),
            counters = snapshot.counters.len(),
            "Restored metrics snapshot"
        );
        self.memory.replace(Maps {
            gauges: snapshot.gauges.into_iter().collect(),
            counters: snapshot.counters.into_iter().collect(),
        });
        Ok(())
    }
}

#[async_trait]
impl Storage for FileBackedStore {
    async fn ping(&self) -> Result<()> {
        self.memory.ping().await
    }

    async fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        self.memory.update_gauge(name, value).await
    }

    async fn update_counter(&self, name: &str, delta: i64) -> Result<()> {
        self.memory.update_counter(name, delta).await
    }

    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>> {
        self.memory.get_metric(kind, name).await
    }

    async fn get_all(&self) -> Result<HashMap<String, Metric>> {
        self.memory.get_all().await
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        self.memory.update_batch(metrics).await
    }

    async fn close(&self) -> Result<()> {
        self.memory.close().await
    }
}
