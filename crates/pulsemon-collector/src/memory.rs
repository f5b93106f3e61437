use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::System;

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.system.refresh_memory();

        Ok(vec![
            ("TotalMemory", self.system.total_memory() as f64),
            ("UsedMemory", self.system.used_memory() as f64),
            ("FreeMemory", self.system.free_memory() as f64),
            ("AvailableMemory", self.system.available_memory() as f64),
            ("TotalSwap", self.system.total_swap() as f64),
            ("UsedSwap", self.system.used_swap() as f64),
            ("FreeSwap", self.system.free_swap() as f64),
        ])
    }
}
