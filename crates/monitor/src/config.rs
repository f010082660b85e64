//! Daemon configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use monitor_lib::{AlertThresholds, CollectorConfig};
use serde::Deserialize;

/// Daemon configuration, read from `MONITOR_`-prefixed environment
/// variables with defaults matching the library's.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Bounded history length in samples
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Sampling cadence in milliseconds
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// System CPU alert threshold in percent
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    /// Memory alert threshold in percent
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    /// Combined disk I/O alert threshold in MB/s
    #[serde(default = "default_io_threshold_mbps")]
    pub io_threshold_mbps: f64,

    /// Per-key alert cooldown in seconds
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,

    /// Where to restore history from on startup and export it on shutdown
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

fn default_max_history() -> usize {
    1_000
}

fn default_sample_interval_ms() -> u64 {
    1_000
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_memory_threshold() -> f64 {
    85.0
}

fn default_io_threshold_mbps() -> f64 {
    100.0
}

fn default_alert_cooldown_secs() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            sample_interval_ms: default_sample_interval_ms(),
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            io_threshold_mbps: default_io_threshold_mbps(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            snapshot_path: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MONITOR"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            max_history: self.max_history,
            interval: Duration::from_millis(self.sample_interval_ms),
            thresholds: AlertThresholds {
                cpu_percent: self.cpu_threshold,
                memory_percent: self.memory_threshold,
                io_mbps: self.io_threshold_mbps,
                cooldown: Duration::from_secs(self.alert_cooldown_secs),
            },
        }
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot_path.as_ref().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.max_history, 1_000);
        assert_eq!(config.sample_interval_ms, 1_000);
        assert_eq!(config.cpu_threshold, 80.0);
        assert_eq!(config.memory_threshold, 85.0);
        assert_eq!(config.io_threshold_mbps, 100.0);
        assert_eq!(config.alert_cooldown_secs, 60);
        assert!(config.snapshot_path.is_none());
    }

    #[test]
    fn collector_config_carries_thresholds() {
        let config = MonitorConfig {
            sample_interval_ms: 250,
            cpu_threshold: 70.0,
            ..MonitorConfig::default()
        };

        let collector = config.collector_config();
        assert_eq!(collector.interval, Duration::from_millis(250));
        assert_eq!(collector.thresholds.cpu_percent, 70.0);
        assert_eq!(collector.thresholds.cooldown, Duration::from_secs(60));
    }
}
