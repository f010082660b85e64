//! Threshold evaluation with per-key cooldown suppression.
//!
//! A breach only produces an alert when its key has not fired within the
//! cooldown window. Keys are per category (`cpu`, `memory`, `io`) and per
//! process (`process_<pid>`), so a noisy process does not suppress system
//! alerts and vice versa.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ProcessSample, SystemSample};

/// A single process above this CPU share trips a process alert.
const HIGH_PROCESS_CPU_PERCENT: f64 = 50.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Callback invoked synchronously for every emitted alert, in emission
/// order. Implementations must return quickly; slow consumers should hand
/// the alert off to their own queue.
pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// What kind of threshold was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Cpu,
    Memory,
    Io,
    Process,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::Cpu => write!(f, "cpu"),
            AlertCategory::Memory => write!(f, "memory"),
            AlertCategory::Io => write!(f, "io"),
            AlertCategory::Process => write!(f, "process"),
        }
    }
}

/// An emitted alert. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub category: AlertCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Thresholds evaluated against every tick.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Combined read+write disk throughput, MB/s.
    pub io_mbps: f64,
    /// Minimum spacing between two alerts sharing a key.
    pub cooldown: Duration,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_percent: 85.0,
            io_mbps: 100.0,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Evaluates samples against thresholds and suppresses repeats per key.
pub struct AlertEngine {
    thresholds: RwLock<AlertThresholds>,
    last_fired: RwLock<HashMap<String, Instant>>,
    callback: RwLock<Option<AlertCallback>>,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds: RwLock::new(thresholds),
            last_fired: RwLock::new(HashMap::new()),
            callback: RwLock::new(None),
        }
    }

    /// Replace the thresholds. Safe to call while `evaluate` runs on the
    /// sampling task; the next evaluation sees the new values.
    pub fn set_thresholds(&self, thresholds: AlertThresholds) {
        *self.thresholds.write().unwrap() = thresholds;
    }

    pub fn thresholds(&self) -> AlertThresholds {
        *self.thresholds.read().unwrap()
    }

    /// Register the synchronous alert sink.
    pub fn set_callback(&self, callback: impl Fn(&Alert) + Send + Sync + 'static) {
        *self.callback.write().unwrap() = Some(Arc::new(callback));
    }

    /// Check a sample and its process list, returning the alerts emitted
    /// this tick. Each alert is also delivered to the registered callback
    /// before this returns.
    pub fn evaluate(&self, sample: &SystemSample, processes: &[ProcessSample]) -> Vec<Alert> {
        let thresholds = self.thresholds();
        let now = Instant::now();
        let mut alerts = Vec::new();

        if sample.cpu_percent > thresholds.cpu_percent && self.should_alert("cpu", now) {
            self.emit(
                &mut alerts,
                AlertCategory::Cpu,
                format!("high system CPU: {:.1}%", sample.cpu_percent),
            );
        }

        if sample.memory_percent > thresholds.memory_percent && self.should_alert("memory", now) {
            self.emit(
                &mut alerts,
                AlertCategory::Memory,
                format!(
                    "high memory usage: {:.1}% ({} MB of {} MB)",
                    sample.memory_percent,
                    sample.memory_used_bytes / (1024 * 1024),
                    sample.memory_total_bytes / (1024 * 1024),
                ),
            );
        }

        let io_mbps = (sample.disk_io_read_rate + sample.disk_io_write_rate) / BYTES_PER_MB;
        if io_mbps > thresholds.io_mbps && self.should_alert("io", now) {
            self.emit(
                &mut alerts,
                AlertCategory::Io,
                format!("heavy disk I/O: {:.1} MB/s", io_mbps),
            );
        }

        for process in processes {
            if process.cpu_percent > HIGH_PROCESS_CPU_PERCENT {
                let key = format!("process_{}", process.pid);
                if self.should_alert(&key, now) {
                    self.emit(
                        &mut alerts,
                        AlertCategory::Process,
                        format!(
                            "process {} (pid {}) at {:.1}% CPU",
                            process.name, process.pid, process.cpu_percent
                        ),
                    );
                }
            }
        }

        alerts
    }

    /// Per-key cooldown gate. Returns true and records `now` when the key
    /// has never fired or its cooldown has elapsed; otherwise leaves the
    /// record untouched.
    pub fn should_alert(&self, key: &str, now: Instant) -> bool {
        let cooldown = self.thresholds.read().unwrap().cooldown;
        let mut fired = self.last_fired.write().unwrap();

        if let Some(last) = fired.get(key) {
            if now.saturating_duration_since(*last) < cooldown {
                return false;
            }
        }
        fired.insert(key.to_string(), now);
        // Expired records would fire again anyway; drop them here so the
        // map does not accumulate keys of long-gone processes.
        fired.retain(|_, at| now.saturating_duration_since(*at) < cooldown);
        true
    }

    fn emit(&self, alerts: &mut Vec<Alert>, category: AlertCategory, message: String) {
        let alert = Alert {
            category,
            message,
            timestamp: Utc::now(),
        };

        let callback = self.callback.read().unwrap().clone();
        if let Some(callback) = callback {
            callback(&alert);
        }
        debug!(category = %alert.category, message = %alert.message, "alert emitted");
        alerts.push(alert);
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}
