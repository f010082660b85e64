//! Platform statistics providers.
//!
//! Exactly one concrete provider is selected when the engine is brought up
//! and bound for the process lifetime; the sampling loop never switches
//! variants at runtime. On Linux the procfs reader is preferred, everywhere
//! else (or when procfs is not mounted) the sysinfo-backed provider is used.

mod generic;
#[cfg(target_os = "linux")]
mod procfs;

pub use generic::GenericProvider;
#[cfg(target_os = "linux")]
pub use procfs::ProcfsProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MonitorError;
use crate::models::{ProcessSample, SystemSample};

/// Capability interface over the operating system's statistics sources.
///
/// The collector's background task is the only caller of the sampling
/// methods while running; `terminate` is stateless and safe from any
/// thread.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Acquire OS handles and record the first counter baselines. Must
    /// complete before the first `system_sample`; failure is fatal to
    /// starting the collector.
    async fn initialize(&self) -> Result<(), MonitorError>;

    /// Point-in-time system metrics: CPU%, memory used/total, disk I/O
    /// rates and process count. The first call after `initialize` reports
    /// zero CPU and zero I/O rates since no prior reading exists.
    async fn system_sample(&self) -> Result<SystemSample, MonitorError>;

    /// Enumerate all visible processes with best-effort metrics. Processes
    /// that disappear or deny access mid-scan are skipped, not fatal.
    async fn process_list(&self) -> Result<Vec<ProcessSample>, MonitorError>;

    /// Best-effort termination request for `pid`; reports whether the
    /// request was accepted.
    fn terminate(&self, pid: u32) -> bool;
}

/// Select and construct the platform provider.
pub fn create_provider() -> Arc<dyn StatsProvider> {
    #[cfg(target_os = "linux")]
    {
        if std::path::Path::new("/proc/stat").exists() {
            tracing::info!("using procfs statistics provider");
            return Arc::new(ProcfsProvider::new());
        }
        tracing::warn!("procfs not available, falling back to sysinfo provider");
    }

    tracing::info!("using sysinfo statistics provider");
    Arc::new(GenericProvider::new())
}
