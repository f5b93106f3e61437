use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::System;

pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.system.refresh_cpu_all();

        Ok(vec![
            ("CPUUtilization", self.system.global_cpu_usage() as f64),
            ("CPUCount", self.system.cpus().len() as f64),
        ])
    }
}
