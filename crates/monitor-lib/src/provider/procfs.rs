//! Linux statistics from procfs text files.
//!
//! Reads `/proc/stat`, `/proc/meminfo` and `/proc/diskstats` for the system
//! sample and `/proc/<pid>/{stat,status,io}` for the process list. System
//! CPU% comes from busy/idle tick deltas between consecutive readings
//! (iowait counted as idle); per-process CPU% from utime+stime deltas
//! through the rate sampler, so a pid with no prior baseline reads as 0.
//!
//! File reads complete before the internal baseline lock is taken; the lock
//! is never held across I/O.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use super::StatsProvider;
use crate::error::MonitorError;
use crate::models::{ProcessSample, SystemSample};
use crate::sampler::RateSampler;

const SECTOR_SIZE: u64 = 512;

/// Aggregate CPU tick counters from the `cpu` line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuTimes {
    fn idle_ticks(&self) -> u64 {
        self.idle + self.iowait
    }

    fn total_ticks(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// Fields pulled from /proc/<pid>/stat.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PidStat {
    comm: String,
    state: char,
    utime: u64,
    stime: u64,
    starttime: u64,
}

/// Per-process fields gathered before rate derivation.
struct RawProcess {
    pid: u32,
    stat: PidStat,
    memory_bytes: u64,
    io_read_bytes: u64,
    io_write_bytes: u64,
}

#[derive(Default)]
struct Baselines {
    cpu: Option<CpuTimes>,
    boot_time: Option<i64>,
    rates: RateSampler,
}

/// Statistics provider backed by the proc filesystem.
pub struct ProcfsProvider {
    proc_root: PathBuf,
    clock_ticks_per_sec: f64,
    baselines: Mutex<Baselines>,
}

impl ProcfsProvider {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Custom proc root, for tests against a synthetic tree.
    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: root.into(),
            clock_ticks_per_sec: clock_ticks_per_sec(),
            baselines: Mutex::new(Baselines::default()),
        }
    }

    /// Parse the aggregate `cpu` line of /proc/stat.
    fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
        let line = stat.lines().find(|line| line.starts_with("cpu "))?;
        let mut fields = line.split_whitespace().skip(1).map(|f| f.parse().ok());
        Some(CpuTimes {
            user: fields.next()??,
            nice: fields.next()??,
            system: fields.next()??,
            idle: fields.next()??,
            iowait: fields.next().flatten().unwrap_or(0),
            irq: fields.next().flatten().unwrap_or(0),
            softirq: fields.next().flatten().unwrap_or(0),
            steal: fields.next().flatten().unwrap_or(0),
        })
    }

    /// Boot time (`btime`, seconds since the epoch) from /proc/stat.
    fn parse_boot_time(stat: &str) -> Option<i64> {
        stat.lines()
            .find_map(|line| line.strip_prefix("btime "))
            .and_then(|rest| rest.trim().parse().ok())
    }

    /// Total and available memory in bytes from /proc/meminfo.
    fn parse_meminfo(content: &str) -> (u64, u64) {
        let mut total = 0u64;
        let mut available = 0u64;
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("MemTotal:"), Some(kb)) => total = kb.parse().unwrap_or(0) * 1024,
                (Some("MemAvailable:"), Some(kb)) => available = kb.parse().unwrap_or(0) * 1024,
                _ => {}
            }
        }
        (total, available)
    }

    /// Cumulative bytes read/written across all block devices from
    /// /proc/diskstats (sector counts in fields 6 and 10).
    fn parse_diskstats(content: &str) -> (u64, u64) {
        let mut read = 0u64;
        let mut written = 0u64;
        for line in content.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() >= 14 {
                read += fields[5].parse().unwrap_or(0u64) * SECTOR_SIZE;
                written += fields[9].parse().unwrap_or(0u64) * SECTOR_SIZE;
            }
        }
        (read, written)
    }

    /// Resident set size in bytes from the VmRSS line of /proc/<pid>/status.
    fn parse_vm_rss(status: &str) -> u64 {
        status
            .lines()
            .find_map(|line| line.strip_prefix("VmRSS:"))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    }

    /// Cumulative read/write bytes from /proc/<pid>/io.
    fn parse_proc_io(content: &str) -> (u64, u64) {
        let mut read = 0u64;
        let mut written = 0u64;
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("read_bytes:") {
                read = rest.trim().parse().unwrap_or(0);
            } else if let Some(rest) = line.strip_prefix("write_bytes:") {
                written = rest.trim().parse().unwrap_or(0);
            }
        }
        (read, written)
    }

    /// Parse /proc/<pid>/stat. The comm field may itself contain spaces and
    /// parentheses, so fields are split after the last `)`.
    fn parse_pid_stat(content: &str) -> Option<PidStat> {
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        let comm = content.get(open + 1..close)?.to_string();

        let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
        // After comm: state is field 3 overall, utime 14, stime 15,
        // starttime 22.
        let state = rest.first()?.chars().next()?;
        Some(PidStat {
            comm,
            state,
            utime: rest.get(11)?.parse().ok()?,
            stime: rest.get(12)?.parse().ok()?,
            starttime: rest.get(19)?.parse().ok()?,
        })
    }

    fn status_label(state: char) -> &'static str {
        match state {
            'R' => "running",
            'S' => "sleeping",
            'D' => "disk-sleep",
            'T' | 't' => "stopped",
            'Z' => "zombie",
            'I' => "idle",
            'X' | 'x' => "dead",
            _ => "unknown",
        }
    }

    /// CPU% between two tick readings; no baseline means a cold start.
    fn cpu_percent(prev: Option<CpuTimes>, current: CpuTimes) -> f64 {
        let Some(prev) = prev else {
            return 0.0;
        };
        let total = current.total_ticks().saturating_sub(prev.total_ticks());
        let idle = current.idle_ticks().saturating_sub(prev.idle_ticks());
        if total == 0 {
            return 0.0;
        }
        total.saturating_sub(idle) as f64 / total as f64 * 100.0
    }

    async fn read_proc_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.proc_root.join(name)).await.ok()
    }

    /// Gather one process's raw fields; `None` when the process vanished or
    /// its stat file is unreadable mid-scan.
    async fn read_process(&self, pid: u32) -> Option<RawProcess> {
        let dir = self.proc_root.join(pid.to_string());

        let stat_content = fs::read_to_string(dir.join("stat")).await.ok()?;
        let stat = Self::parse_pid_stat(&stat_content)?;

        // status and io are best-effort: io in particular needs privileges
        // for foreign processes.
        let status = fs::read_to_string(dir.join("status")).await.unwrap_or_default();
        let memory_bytes = Self::parse_vm_rss(&status);
        let io = fs::read_to_string(dir.join("io")).await.unwrap_or_default();
        let (io_read_bytes, io_write_bytes) = Self::parse_proc_io(&io);

        Some(RawProcess {
            pid,
            stat,
            memory_bytes,
            io_read_bytes,
            io_write_bytes,
        })
    }

    async fn numeric_entries(&self) -> Result<Vec<u32>, MonitorError> {
        let mut dir = fs::read_dir(&self.proc_root)
            .await
            .map_err(|e| MonitorError::Sample(format!("cannot list {}: {e}", self.proc_root.display())))?;

        let mut pids = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| MonitorError::Sample(format!("proc scan failed: {e}")))?
        {
            if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }
}

impl Default for ProcfsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsProvider for ProcfsProvider {
    async fn initialize(&self) -> Result<(), MonitorError> {
        let stat = fs::read_to_string(self.proc_root.join("stat"))
            .await
            .map_err(|e| {
                MonitorError::Init(format!("cannot read {}/stat: {e}", self.proc_root.display()))
            })?;
        let cpu = Self::parse_cpu_times(&stat)
            .ok_or_else(|| MonitorError::Init("no aggregate cpu line in /proc/stat".to_string()))?;

        let mut baselines = self.baselines.lock().unwrap();
        // First reading becomes the baseline; the first sample reports 0%.
        baselines.cpu = Some(cpu);
        baselines.boot_time = Self::parse_boot_time(&stat);

        debug!(proc_root = %self.proc_root.display(), "procfs provider initialized");
        Ok(())
    }

    async fn system_sample(&self) -> Result<SystemSample, MonitorError> {
        let stat = fs::read_to_string(self.proc_root.join("stat"))
            .await
            .map_err(|e| MonitorError::Sample(format!("cannot read /proc/stat: {e}")))?;
        let cpu = Self::parse_cpu_times(&stat)
            .ok_or_else(|| MonitorError::Sample("no aggregate cpu line in /proc/stat".to_string()))?;

        let meminfo = self.read_proc_file("meminfo").await.unwrap_or_default();
        let (memory_total, memory_available) = Self::parse_meminfo(&meminfo);
        let memory_used = memory_total.saturating_sub(memory_available);

        let diskstats = self.read_proc_file("diskstats").await.unwrap_or_default();
        let (disk_read, disk_written) = Self::parse_diskstats(&diskstats);

        let process_count = self.numeric_entries().await.map(|p| p.len()).unwrap_or(0) as u32;

        let now = Instant::now();
        let mut baselines = self.baselines.lock().unwrap();
        let cpu_percent = Self::cpu_percent(baselines.cpu.replace(cpu), cpu);
        let read_rate = baselines.rates.rate("disk_read", disk_read, now);
        let write_rate = baselines.rates.rate("disk_written", disk_written, now);

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
        let mut raw = Vec::new();
        for pid in self.numeric_entries().await? {
            if let Some(process) = self.read_process(pid).await {
                raw.push(process);
            }
        }

        let now = Instant::now();
        let mut baselines = self.baselines.lock().unwrap();
        let live: HashSet<String> = raw.iter().map(|p| pid_key(p.pid)).collect();

        let mut processes = Vec::with_capacity(raw.len());
        for entry in raw {
            let ticks_per_sec =
                baselines
                    .rates
                    .rate(&pid_key(entry.pid), entry.stat.utime + entry.stat.stime, now);
            let cpu_percent = ticks_per_sec / self.clock_ticks_per_sec * 100.0;
            let started_at = baselines.boot_time.and_then(|boot| {
                let offset = (entry.stat.starttime as f64 / self.clock_ticks_per_sec) as i64;
                DateTime::from_timestamp(boot + offset, 0)
            });

            processes.push(ProcessSample {
                pid: entry.pid,
                name: entry.stat.comm,
                cpu_percent,
                memory_bytes: entry.memory_bytes,
                memory_percent: 0.0,
                io_read_bytes: entry.io_read_bytes,
                io_write_bytes: entry.io_write_bytes,
                status: Self::status_label(entry.stat.state).to_string(),
                started_at,
            });
        }

        // Forget baselines of exited pids so a recycled pid starts cold.
        baselines
            .rates
            .retain(|key| !key.starts_with("pid_") || live.contains(key));

        Ok(processes)
    }

    fn terminate(&self, pid: u32) -> bool {
        // SAFETY: kill(2) takes plain integers and touches no memory.
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
    }
}

fn pid_key(pid: u32) -> String {
    format!("pid_{pid}")
}

fn clock_ticks_per_sec() -> f64 {
    // SAFETY: sysconf takes a plain integer and touches no memory.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  100 0 100 800 0 0 0 0 0 0\n\
                        cpu0 50 0 50 400 0 0 0 0 0 0\n\
                        ctxt 12345\n\
                        btime 1700000000\n\
                        processes 999\n";

    #[test]
    fn parses_aggregate_cpu_line() {
        let cpu = ProcfsProvider::parse_cpu_times(STAT).unwrap();
        assert_eq!(cpu.user, 100);
        assert_eq!(cpu.system, 100);
        assert_eq!(cpu.idle, 800);
        assert_eq!(cpu.total_ticks(), 1000);
        assert_eq!(cpu.idle_ticks(), 800);
    }

    #[test]
    fn parses_boot_time() {
        assert_eq!(ProcfsProvider::parse_boot_time(STAT), Some(1_700_000_000));
    }

    #[test]
    fn cpu_percent_needs_a_baseline() {
        let current = ProcfsProvider::parse_cpu_times(STAT).unwrap();
        assert_eq!(ProcfsProvider::cpu_percent(None, current), 0.0);
    }

    #[test]
    fn cpu_percent_from_tick_deltas() {
        let prev = ProcfsProvider::parse_cpu_times(STAT).unwrap();
        let current = ProcfsProvider::parse_cpu_times(
            "cpu  200 0 200 1400 0 0 0 0 0 0\n",
        )
        .unwrap();

        // 800 new ticks, 600 of them idle.
        let percent = ProcfsProvider::cpu_percent(Some(prev), current);
        assert!((percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_percent_survives_counter_regression() {
        let prev = ProcfsProvider::parse_cpu_times(STAT).unwrap();
        let current = CpuTimes::default();
        assert_eq!(ProcfsProvider::cpu_percent(Some(prev), current), 0.0);
    }

    #[test]
    fn parses_meminfo_kilobytes() {
        let meminfo = "MemTotal:       16384 kB\n\
                       MemFree:         8192 kB\n\
                       MemAvailable:   12288 kB\n\
                       Buffers:          512 kB\n";
        let (total, available) = ProcfsProvider::parse_meminfo(meminfo);
        assert_eq!(total, 16_384 * 1024);
        assert_eq!(available, 12_288 * 1024);
    }

    #[test]
    fn parses_diskstats_sectors() {
        let diskstats = "   8       0 sda 15362 0 1201386 3764 7 0 9222 2 0 4 6\n\
                         short line ignored\n\
                            8      16 sdb 100 0 614 10 3 0 1024 1 0 1 1\n";
        let (read, written) = ProcfsProvider::parse_diskstats(diskstats);
        assert_eq!(read, (1_201_386 + 614) * SECTOR_SIZE);
        assert_eq!(written, (9_222 + 1_024) * SECTOR_SIZE);
    }

    #[test]
    fn parses_vm_rss() {
        let status = "Name:\tstress\nState:\tR (running)\nVmRSS:\t    2048 kB\n";
        assert_eq!(ProcfsProvider::parse_vm_rss(status), 2_048 * 1024);
        assert_eq!(ProcfsProvider::parse_vm_rss("Name:\tkthreadd\n"), 0);
    }

    #[test]
    fn parses_proc_io_counters() {
        let io = "rchar: 100\nwchar: 50\nread_bytes: 4096\nwrite_bytes: 8192\n";
        assert_eq!(ProcfsProvider::parse_proc_io(io), (4_096, 8_192));
    }

    #[test]
    fn parses_pid_stat_fields() {
        let stat = "4242 (stress) S 1 4242 4242 0 -1 4194304 100 0 0 0 50 25 0 0 \
                    20 0 1 0 12345 1000000 500 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        let parsed = ProcfsProvider::parse_pid_stat(stat).unwrap();
        assert_eq!(parsed.comm, "stress");
        assert_eq!(parsed.state, 'S');
        assert_eq!(parsed.utime, 50);
        assert_eq!(parsed.stime, 25);
        assert_eq!(parsed.starttime, 12345);
    }

    #[test]
    fn pid_stat_comm_may_contain_parens_and_spaces() {
        let stat = "77 (weird (name)) R 1 77 77 0 -1 0 0 0 0 0 7 3 0 0 \
                    20 0 1 0 999 0 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        let parsed = ProcfsProvider::parse_pid_stat(stat).unwrap();
        assert_eq!(parsed.comm, "weird (name)");
        assert_eq!(parsed.state, 'R');
        assert_eq!(parsed.utime, 7);
        assert_eq!(parsed.stime, 3);
        assert_eq!(parsed.starttime, 999);
    }

    #[test]
    fn status_labels_cover_common_states() {
        assert_eq!(ProcfsProvider::status_label('R'), "running");
        assert_eq!(ProcfsProvider::status_label('S'), "sleeping");
        assert_eq!(ProcfsProvider::status_label('Z'), "zombie");
        assert_eq!(ProcfsProvider::status_label('?'), "unknown");
    }

    mod synthetic_tree {
        use super::*;
        use std::fs as std_fs;

        const PID_STAT: &str = "4242 (stress) S 1 4242 4242 0 -1 4194304 100 0 0 0 50 25 0 0 \
                                20 0 1 0 12345 1000000 500 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";

        fn build_tree(dir: &std::path::Path) {
            std_fs::write(dir.join("stat"), STAT).unwrap();
            std_fs::write(
                dir.join("meminfo"),
                "MemTotal:       16384 kB\nMemAvailable:   12288 kB\n",
            )
            .unwrap();
            std_fs::write(
                dir.join("diskstats"),
                "   8       0 sda 15362 0 1201386 3764 7 0 9222 2 0 4 6\n",
            )
            .unwrap();

            let pid_dir = dir.join("4242");
            std_fs::create_dir(&pid_dir).unwrap();
            std_fs::write(pid_dir.join("stat"), PID_STAT).unwrap();
            std_fs::write(pid_dir.join("status"), "VmRSS:\t    2048 kB\n").unwrap();
            std_fs::write(pid_dir.join("io"), "read_bytes: 4096\nwrite_bytes: 8192\n").unwrap();
        }

        #[tokio::test]
        async fn first_sample_is_a_cold_start() {
            let dir = tempfile::tempdir().unwrap();
            build_tree(dir.path());

            let provider = ProcfsProvider::with_proc_root(dir.path());
            provider.initialize().await.unwrap();

            let sample = provider.system_sample().await.unwrap();
            assert_eq!(sample.cpu_percent, 0.0);
            assert_eq!(sample.disk_io_read_rate, 0.0);
            assert_eq!(sample.memory_total_bytes, 16_384 * 1024);
            assert_eq!(sample.memory_used_bytes, (16_384 - 12_288) * 1024);
            assert!((sample.memory_percent - 25.0).abs() < 1e-9);
            assert_eq!(sample.process_count, 1);
        }

        #[tokio::test]
        async fn second_sample_derives_cpu_from_deltas() {
            let dir = tempfile::tempdir().unwrap();
            build_tree(dir.path());

            let provider = ProcfsProvider::with_proc_root(dir.path());
            provider.initialize().await.unwrap();
            provider.system_sample().await.unwrap();

            // 800 new ticks, 600 idle -> 25% busy.
            std_fs::write(dir.path().join("stat"), "cpu  200 0 200 1400 0 0 0 0 0 0\n").unwrap();
            let sample = provider.system_sample().await.unwrap();
            assert!((sample.cpu_percent - 25.0).abs() < 1e-9);
        }

        #[tokio::test]
        async fn process_list_reads_per_process_files() {
            let dir = tempfile::tempdir().unwrap();
            build_tree(dir.path());

            let provider = ProcfsProvider::with_proc_root(dir.path());
            provider.initialize().await.unwrap();

            let processes = provider.process_list().await.unwrap();
            assert_eq!(processes.len(), 1);

            let process = &processes[0];
            assert_eq!(process.pid, 4242);
            assert_eq!(process.name, "stress");
            assert_eq!(process.status, "sleeping");
            assert_eq!(process.memory_bytes, 2_048 * 1024);
            assert_eq!(process.io_read_bytes, 4_096);
            assert_eq!(process.io_write_bytes, 8_192);
            // Cold start for this pid.
            assert_eq!(process.cpu_percent, 0.0);
            assert!(process.started_at.is_some());
        }

        #[tokio::test]
        async fn initialize_fails_without_proc_stat() {
            let dir = tempfile::tempdir().unwrap();
            let provider = ProcfsProvider::with_proc_root(dir.path());

            let result = provider.initialize().await;
            assert!(matches!(result, Err(MonitorError::Init(_))));
        }
    }
}
