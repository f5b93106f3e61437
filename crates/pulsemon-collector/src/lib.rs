//! Runtime sampling for the pulsemon agent.
//!
//! Each [`Collector`] reads one category of process or host statistics and
//! returns a fixed set of named gauge readings. The [`store::MetricStore`]
//! folds those readings, plus the `PollCount` counter, into the agent's working
//! set.

pub mod cpu;
pub mod load;
pub mod memory;
pub mod process;
pub mod store;

use anyhow::Result;

/// A named gauge reading produced by a collector.
pub type Reading = (&'static str, f64);

/// A runtime statistics source sampled on every poll tick.
///
/// Collectors are owned by a [`store::MetricStore`] and called under its
/// sampling lock, so `collect` never runs concurrently with itself.
pub trait Collector: Send {
    /// Returns the collector name (e.g., `"memory"`), used for logging.
    fn name(&self) -> &str;

    /// Reads the current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Reading>>;
}

/// The collectors an agent samples by default.
pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(process::ProcessCollector::new()),
        Box::new(memory::MemoryCollector::new()),
        Box::new(cpu::CpuCollector::new()),
        Box::new(load::LoadCollector::new()),
    ]
}
