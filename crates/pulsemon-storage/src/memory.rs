use crate::error::Result;
use crate::{merge_metrics, Storage};
use async_trait::async_trait;
use pulsemon_common::types::{Metric, MetricKind};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Maps {
    pub(crate) gauges: HashMap<String, f64>,
    pub(crate) counters: HashMap<String, i64>,
}

/// In-process backend guarded by a single reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    maps: RwLock<Maps>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn export(&self) -> Maps {
        self.maps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn replace(&self, maps: Maps) {
        *self
            .maps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = maps;
    }

    fn write<R>(&self, f: impl FnOnce(&mut Maps) -> R) -> R {
        let mut maps = self
            .maps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut maps)
    }

    fn read<R>(&self, f: impl FnOnce(&Maps) -> R) -> R {
        let maps = self
            .maps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&maps)
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        Metric::gauge(name, value).validate()?;
        self.write(|maps| maps.gauges.insert(name.to_string(), value));
        Ok(())
    }

    async fn update_counter(&self, name: &str, delta: i64) -> Result<()> {
        self.write(|maps| {
            let stored = maps.counters.entry(name.to_string()).or_insert(0);
            *stored = stored.wrapping_add(delta);
        });
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>> {
        Ok(self.read(|maps| match kind {
            MetricKind::Gauge => maps.gauges.get(name).map(|v| Metric::gauge(name, *v)),
            MetricKind::Counter => maps.counters.get(name).map(|d| Metric::counter(name, *d)),
        }))
    }

    async fn get_all(&self) -> Result<HashMap<String, Metric>> {
        let maps = self.export();
        Ok(merge_metrics(maps.gauges, maps.counters))
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        for metric in metrics {
            metric.validate()?;
        }
        self.write(|maps| {
            for metric in metrics {
                match (metric.kind, metric.value, metric.delta) {
                    (MetricKind::Gauge, Some(value), _) => {
                        maps.gauges.insert(metric.id.clone(), value);
                    }
                    (MetricKind::Counter, _, Some(delta)) => {
                        let stored = maps.counters.entry(metric.id.clone()).or_insert(0);
                        *stored = stored.wrapping_add(delta);
                    }
                    _ => {}
                }
            }
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
