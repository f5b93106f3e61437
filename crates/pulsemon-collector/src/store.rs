use crate::Collector;
use pulsemon_common::types::Metric;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Name of the counter incremented on every sample.
pub const POLL_COUNT: &str = "PollCount";

#[derive(Default)]
struct Sampled {
    metrics: HashMap<String, Metric>,
    poll_count: i64,
}

/// The agent's working set of metrics.
///
/// `sample` holds the collector lock for the whole poll and the write lock
/// while applying readings, so samples never interleave and a concurrent
/// `snapshot` sees either all of a poll or none of it.
pub struct MetricStore {
    collectors: Mutex<Vec<Box<dyn Collector>>>,
    sampled: RwLock<Sampled>,
}

impl MetricStore {
    pub fn new(collectors: Vec<Box<dyn Collector>>) -> Self {
        Self {
            collectors: Mutex::new(collectors),
            sampled: RwLock::new(Sampled::default()),
        }
    }

    /// Reads every collector, overwrites the gauges and bumps `PollCount`.
    pub fn sample(&self) {
        let mut collectors = self
            .collectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut readings = Vec::new();
        for collector in collectors.iter_mut() {
            match collector.collect() {
                Ok(values) => readings.extend(values),
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
                }
            }
        }

        let mut sampled = self
            .sampled
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (name, value) in readings {
            sampled
                .metrics
                .insert(name.to_string(), Metric::gauge(name, value));
        }
        sampled.poll_count += 1;
        let poll_count = sampled.poll_count;
        sampled
            .metrics
            .insert(POLL_COUNT.to_string(), Metric::counter(POLL_COUNT, poll_count));

        tracing::debug!(poll_count, metrics = sampled.metrics.len(), "Sampled runtime metrics");
    }

    /// Independent copy of every entry, ordered by id.
    pub fn snapshot(&self) -> Vec<Metric> {
        let sampled = self
            .sampled
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut metrics: Vec<Metric> = sampled.metrics.values().cloned().collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    pub fn poll_count(&self) -> i64 {
        self.sampled
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .poll_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Reading;
    use pulsemon_common::types::MetricKind;
    use std::sync::Arc;

    struct StepCollector {
        step: f64,
    }

    impl Collector for StepCollector {
        fn name(&self) -> &str {
            "step"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Reading>> {
            self.step += 1.0;
            Ok(vec![("Alloc", self.step * 10.0), ("HeapInuse", self.step)])
        }
    }

    struct BrokenCollector;

    impl Collector for BrokenCollector {
        fn name(&self) -> &str {
            "broken"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Reading>> {
            anyhow::bail!("no /proc here")
        }
    }

    fn find<'a>(metrics: &'a [Metric], id: &str) -> &'a Metric {
        metrics.iter().find(|m| m.id == id).expect("metric present")
    }

    #[test]
    fn sample_overwrites_gauges_and_counts_polls() {
        let store = MetricStore::new(vec![Box::new(StepCollector { step: 0.0 })]);
        store.sample();
        store.sample();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(find(&snapshot, "Alloc").value, Some(20.0));
        assert_eq!(find(&snapshot, "HeapInuse").value, Some(2.0));

        let polls = find(&snapshot, POLL_COUNT);
        assert_eq!(polls.kind, MetricKind::Counter);
        assert_eq!(polls.delta, Some(2));
        assert_eq!(store.poll_count(), 2);
    }

    #[test]
    fn snapshot_is_detached_from_later_samples() {
        let store = MetricStore::new(vec![Box::new(StepCollector { step: 0.0 })]);
        store.sample();
        let before = store.snapshot();
        store.sample();

        assert_eq!(find(&before, "Alloc").value, Some(10.0));
        assert_eq!(find(&store.snapshot(), "Alloc").value, Some(20.0));
    }

    #[test]
    fn failing_collector_does_not_block_others() {
        let store = MetricStore::new(vec![
            Box::new(BrokenCollector),
            Box::new(StepCollector { step: 0.0 }),
        ]);
        store.sample();

        let ids: Vec<String> = store.snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["Alloc", "HeapInuse", POLL_COUNT]);
    }

    #[test]
    fn concurrent_sampling_and_snapshots_stay_consistent() {
        let store = Arc::new(MetricStore::new(vec![Box::new(StepCollector { step: 0.0 })]));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = store.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        store.sample();
                    }
                });
            }
            for _ in 0..2 {
                let store = store.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        let snapshot = store.snapshot();
                        // A poll is applied atomically: Alloc is always 10x HeapInuse.
                        if let (Some(alloc), Some(heap)) = (
                            snapshot.iter().find(|m| m.id == "Alloc"),
                            snapshot.iter().find(|m| m.id == "HeapInuse"),
                        ) {
                            assert_eq!(alloc.value.unwrap(), heap.value.unwrap() * 10.0);
                        }
                    }
                });
            }
        });

        assert_eq!(store.poll_count(), 200);
        assert_eq!(find(&store.snapshot(), POLL_COUNT).delta, Some(200));
    }

    #[test]
    fn default_collectors_report_fixed_gauge_set() {
        let store = MetricStore::new(crate::default_collectors());
        store.sample();

        let snapshot = store.snapshot();
        for name in [
            "ProcessResidentMemory",
            "ProcessVirtualMemory",
            "ProcessCPUUsage",
            "ProcessRunTime",
            "ProcessDiskReadBytes",
            "ProcessDiskWrittenBytes",
            "TotalMemory",
            "UsedMemory",
            "FreeMemory",
            "AvailableMemory",
            "TotalSwap",
            "UsedSwap",
            "FreeSwap",
            "CPUUtilization",
            "CPUCount",
            "LoadAverage1",
            "LoadAverage5",
            "LoadAverage15",
            "Uptime",
        ] {
            let metric = find(&snapshot, name);
            assert_eq!(metric.kind, MetricKind::Gauge, "{name} should be a gauge");
            assert!(metric.is_valid());
        }
    }
}
