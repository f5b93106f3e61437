use crate::{Collector, Reading};
use anyhow::{anyhow, Result};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Runtime statistics of the agent's own process.
pub struct ProcessCollector {
    system: System,
    pid: Option<Pid>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        Self::for_pid(sysinfo::get_current_pid().ok())
    }

    fn for_pid(pid: Option<Pid>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        if let Some(pid) = pid {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        }
        Self { system, pid }
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        let pid = self
            .pid
            .ok_or_else(|| anyhow!("current process id is unavailable on this platform"))?;
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| anyhow!("process {pid} not found"))?;
        let disk = process.disk_usage();

        Ok(vec![
            ("ProcessResidentMemory", process.memory() as f64),
            ("ProcessVirtualMemory", process.virtual_memory() as f64),
            ("ProcessCPUUsage", process.cpu_usage() as f64),
            ("ProcessRunTime", process.run_time() as f64),
            ("ProcessDiskReadBytes", disk.total_read_bytes as f64),
            ("ProcessDiskWrittenBytes", disk.total_written_bytes as f64),
        ])
    }
}
