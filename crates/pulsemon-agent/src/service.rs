//! The agent's two long-lived loops and their lifecycle.

use crate::sender::MetricReporter;
use pulsemon_collector::store::MetricStore;
use pulsemon_common::types::Metric;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle of an [`AgentService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent: cannot start while {0:?}")]
    NotStopped(ServiceState),
}

/// Timing and batching knobs for the loops.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub batch_size: usize,
    pub shutdown_timeout: Duration,
}

struct Running {
    cancel: CancellationToken,
    sampler: JoinHandle<()>,
    reporter: JoinHandle<()>,
}

/// Runs the sample loop and the report loop over one shared [`MetricStore`].
pub struct AgentService {
    store: Arc<MetricStore>,
    reporter: Arc<dyn MetricReporter>,
    settings: LoopSettings,
    state: Mutex<ServiceState>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl AgentService {
    pub fn new(
        store: Arc<MetricStore>,
        reporter: Arc<dyn MetricReporter>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            store,
            reporter,
            settings,
            state: Mutex::new(ServiceState::Stopped),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Spawns both loops. Fails unless the service is stopped.
    pub async fn run(&self) -> Result<(), AgentError> {
        let mut running = self.running.lock().await;
        let state = self.state();
        if state != ServiceState::Stopped {
            return Err(AgentError::NotStopped(state));
        }

        let cancel = CancellationToken::new();
        let sampler = tokio::spawn(sample_loop(
            self.store.clone(),
            self.settings.poll_interval,
            cancel.clone(),
        ));
        let reporter = tokio::spawn(report_loop(
            self.store.clone(),
            self.reporter.clone(),
            self.settings,
            cancel.clone(),
        ));
        *running = Some(Running {
            cancel,
            sampler,
            reporter,
        });
        self.set_state(ServiceState::Running);

        tracing::info!(
            poll_interval_secs = self.settings.poll_interval.as_secs_f64(),
            report_interval_secs = self.settings.report_interval.as_secs_f64(),
            batch_size = self.settings.batch_size,
            "Agent loops started"
        );
        Ok(())
    }

    /// Cancels both loops and waits for them, including the final flush.
    /// Calling it again, or before `run`, does nothing.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running {
            cancel,
            sampler,
            reporter,
        }) = running.take()
        else {
            return;
        };

        self.set_state(ServiceState::Stopping);
        cancel.cancel();
        for (name, handle) in [("sample", sampler), ("report", reporter)] {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Agent loop ended abnormally");
            }
        }
        self.set_state(ServiceState::Stopped);
        tracing::info!("Agent loops stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn sample_loop(store: Arc<MetricStore>, period: Duration, cancel: CancellationToken) {
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => store.sample(),
        }
    }
    tracing::debug!(polls = store.poll_count(), "Sample loop finished");
}

async fn report_loop(
    store: Arc<MetricStore>,
    reporter: Arc<dyn MetricReporter>,
    settings: LoopSettings,
    cancel: CancellationToken,
) {
    let mut tick = ticker(settings.report_interval);
    let mut pending: Vec<Metric> = Vec::with_capacity(settings.batch_size);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                pending.extend(store.snapshot());
                if pending.len() >= settings.batch_size {
                    flush(reporter.as_ref(), &mut pending, &cancel).await;
                }
            }
        }
    }

    if pending.is_empty() {
        return;
    }
    let count = pending.len();
    tracing::info!(count, "Flushing pending metrics before shutdown");
    // The loop token is already cancelled; the final send gets its own.
    let final_token = CancellationToken::new();
    match tokio::time::timeout(
        settings.shutdown_timeout,
        reporter.report(std::mem::take(&mut pending), &final_token),
    )
    .await
    {
        Ok(Ok(sent)) => tracing::info!(sent, "Final flush delivered"),
        Ok(Err(e)) => tracing::error!(count, error = %e, "Final flush failed"),
        Err(_) => {
            final_token.cancel();
            tracing::error!(
                count,
                timeout_secs = settings.shutdown_timeout.as_secs_f64(),
                "Final flush timed out"
            );
        }
    }
}

/// Sends the buffer. A send abandoned by cancellation keeps the metrics for
/// the final flush; any other failure drops them for this cycle.
async fn flush(reporter: &dyn MetricReporter, pending: &mut Vec<Metric>, cancel: &CancellationToken) {
    let batch = std::mem::take(pending);
    let count = batch.len();
    match reporter.report(batch.clone(), cancel).await {
        Ok(sent) => tracing::debug!(sent, "Reported metrics"),
        Err(e) if e.is_cancelled() => {
            tracing::debug!(count, "Report interrupted by shutdown, keeping metrics");
            *pending = batch;
        }
        Err(e) => tracing::warn!(count, error = %e, "Failed to report metrics, dropping batch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SendError;
    use async_trait::async_trait;
    use pulsemon_collector::{Collector, Reading};
    use pulsemon_common::retry::RetryError;

    /// Two gauges per poll; with PollCount every snapshot holds three metrics.
    struct TripleCollector;

    impl Collector for TripleCollector {
        fn name(&self) -> &str {
            "triple"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Reading>> {
            Ok(vec![("A", 1.0), ("B", 2.0)])
        }
    }

    #[derive(Default)]
    struct FakeReporter {
        batches: std::sync::Mutex<Vec<Vec<Metric>>>,
        fail: bool,
    }

    impl FakeReporter {
        fn batches(&self) -> Vec<Vec<Metric>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetricReporter for FakeReporter {
        async fn report(
            &self,
            metrics: Vec<Metric>,
            _cancel: &CancellationToken,
        ) -> Result<usize, RetryError<SendError>> {
            let count = metrics.len();
            self.batches.lock().unwrap().push(metrics);
            if self.fail {
                return Err(RetryError::Failed {
                    operation: "send_batch".into(),
                    attempts: 3,
                    transient: true,
                    source: SendError::Status {
                        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                        body: String::new(),
                    },
                });
            }
            Ok(count)
        }
    }

    fn settings(batch_size: usize) -> LoopSettings {
        LoopSettings {
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            batch_size,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    fn service(reporter: Arc<FakeReporter>, batch_size: usize) -> (Arc<MetricStore>, AgentService) {
        let store = Arc::new(MetricStore::new(vec![Box::new(TripleCollector)]));
        let service = AgentService::new(store.clone(), reporter, settings(batch_size));
        (store, service)
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flushes_pending_metrics_once() {
        let reporter = Arc::new(FakeReporter::default());
        let (_store, service) = service(reporter.clone(), 10);

        service.run().await.unwrap();
        // One report tick: A, B and PollCount go pending, below the threshold.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(reporter.batches().is_empty());

        service.stop().await;
        let batches = reporter.batches();
        assert_eq!(batches.len(), 1);
        let ids: Vec<&str> = batches[0].iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "PollCount"]);
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_triggers_flush() {
        let reporter = Arc::new(FakeReporter::default());
        let (_store, service) = service(reporter.clone(), 6);

        service.run().await.unwrap();
        tokio::time::sleep(Duration::from_secs(21)).await;

        // 3 pending after the first tick, 6 after the second: one flush.
        let batches = reporter.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 6);

        service.stop().await;
        assert_eq!(reporter.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_drops_batch_and_loops_continue() {
        let reporter = Arc::new(FakeReporter {
            fail: true,
            ..FakeReporter::default()
        });
        let (store, service) = service(reporter.clone(), 3);

        service.run().await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        // Every tick flushes and fails; nothing accumulates across cycles.
        let batches = reporter.batches();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 3));
        assert!(store.poll_count() >= 15);

        service.stop().await;
        assert_eq!(reporter.batches().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_rejects_double_run_and_tolerates_double_stop() {
        let reporter = Arc::new(FakeReporter::default());
        let (_store, service) = service(reporter.clone(), 10);

        assert_eq!(service.state(), ServiceState::Stopped);
        service.stop().await;

        service.run().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(matches!(
            service.run().await,
            Err(AgentError::NotStopped(ServiceState::Running))
        ));

        service.stop().await;
        service.stop().await;
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(reporter.batches().is_empty());

        service.run().await.unwrap();
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stops_do_not_deadlock() {
        let reporter = Arc::new(FakeReporter::default());
        let (_store, service) = service(reporter, 10);
        let service = Arc::new(service);

        service.run().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let a = tokio::spawn({
            let service = service.clone();
            async move { service.stop().await }
        });
        let b = tokio::spawn({
            let service = service.clone();
            async move { service.stop().await }
        });
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
