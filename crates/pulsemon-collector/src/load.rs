use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::System;

pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for LoadCollector {
    fn name(&self) -> &str {
        "load"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        let load_avg = System::load_average();

        Ok(vec![
            ("LoadAverage1", load_avg.one),
            ("LoadAverage5", load_avg.five),
            ("LoadAverage15", load_avg.fifteen),
            ("Uptime", System::uptime() as f64),
        ])
    }
}
