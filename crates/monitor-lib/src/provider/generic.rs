//! Portable statistics via the `sysinfo` crate.
//!
//! Used on platforms without a procfs. CPU usage deltas are maintained by
//! sysinfo itself (the priming refresh in `initialize` establishes the
//! baseline, so the first sample reads 0%); disk throughput is derived from
//! the cumulative per-process I/O counters through the shared rate sampler.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

use super::StatsProvider;
use crate::error::MonitorError;
use crate::models::{ProcessSample, SystemSample};
use crate::sampler::RateSampler;

struct Inner {
    sys: System,
    rates: RateSampler,
}

/// Statistics provider backed by sysinfo's platform abstractions.
pub struct GenericProvider {
    inner: Mutex<Inner>,
}

impl GenericProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sys: System::new(),
                rates: RateSampler::new(),
            }),
        }
    }
}

impl Default for GenericProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsProvider for GenericProvider {
    async fn initialize(&self) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock().unwrap();
        // Priming refresh: establishes the CPU baseline.
        inner.sys.refresh_all();
        Ok(())
    }

    async fn system_sample(&self) -> Result<SystemSample, MonitorError> {
        let mut inner = self.inner.lock().unwrap();
        let Inner { sys, rates } = &mut *inner;

        sys.refresh_cpu_usage();
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let cpu_percent = sys.global_cpu_usage() as f64;
        let memory_total = sys.total_memory();
        let memory_used = sys.used_memory();

        // sysinfo exposes no machine-wide disk counters, so aggregate the
        // cumulative per-process totals instead.
        let mut disk_read = 0u64;
        let mut disk_written = 0u64;
        for process in sys.processes().values() {
            let usage = process.disk_usage();
            disk_read += usage.total_read_bytes;
            disk_written += usage.total_written_bytes;
        }

        let now = Instant::now();
        let read_rate = rates.rate("disk_read", disk_read, now);
        let write_rate = rates.rate("disk_written", disk_written, now);
        let process_count = sys.processes().len() as u32;

        Ok(SystemSample::new(
            Utc::now(),
            cpu_percent,
            memory_used,
            memory_total,
            read_rate,
            write_rate,
            process_count,
        ))
    }

    async fn process_list(&self) -> Result<Vec<ProcessSample>, MonitorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.sys.refresh_processes(ProcessesToUpdate::All, true);

        let processes = inner
            .sys
            .processes()
            .values()
            .map(|process| {
                let usage = process.disk_usage();
                ProcessSample {
                    pid: process.pid().as_u32(),
                    name: process.name().to_string_lossy().into_owned(),
                    cpu_percent: process.cpu_usage() as f64,
                    memory_bytes: process.memory(),
                    memory_percent: 0.0,
                    io_read_bytes: usage.total_read_bytes,
                    io_write_bytes: usage.total_written_bytes,
                    status: process.status().to_string(),
                    started_at: DateTime::from_timestamp(process.start_time() as i64, 0),
                }
            })
            .collect();

        Ok(processes)
    }

    fn terminate(&self, pid: u32) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.sys.process(Pid::from_u32(pid)) {
            Some(process) => process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill()),
            None => false,
        }
    }
}
