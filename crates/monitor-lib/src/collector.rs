//! Orchestration: the background sampling task and thread-safe accessors.
//!
//! One dedicated tokio task performs all sampling; every other operation
//! (reads, configuration changes, stop) may arrive from any thread. The
//! task owns the provider's sampling entry points exclusively and suspends
//! only at the inter-tick sleep, never while a lock is held.

use std::cmp::Ordering as CmpOrdering;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertEngine, AlertThresholds};
use crate::error::MonitorError;
use crate::history::HistoryStore;
use crate::models::{ProcessSample, SystemSample};
use crate::provider::StatsProvider;

/// Callback invoked once per tick with the fresh sample and the process
/// list sorted by descending CPU usage. Must return quickly; slow consumers
/// should hand the data off to their own queue.
pub type DataCallback = Arc<dyn Fn(&SystemSample, &[ProcessSample]) + Send + Sync>;

/// Collector tunables.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Bounded history length (default 1000 samples).
    pub max_history: usize,
    /// Sampling cadence (default 1 second).
    pub interval: Duration,
    /// Initial alert thresholds.
    pub thresholds: AlertThresholds,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_history: 1_000,
            interval: Duration::from_millis(1_000),
            thresholds: AlertThresholds::default(),
        }
    }
}

/// Owns the sampling task and composes provider, history and alerting.
///
/// State machine: Stopped -> Running on `start`, Running -> Stopped on
/// `stop`; both transitions are idempotent.
pub struct Collector {
    provider: Arc<dyn StatsProvider>,
    history: Arc<HistoryStore>,
    alerts: Arc<AlertEngine>,
    interval: Arc<RwLock<Duration>>,
    data_callback: Arc<RwLock<Option<DataCallback>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl Collector {
    pub fn new(provider: Arc<dyn StatsProvider>, config: CollectorConfig) -> Self {
        Self {
            provider,
            history: Arc::new(HistoryStore::new(config.max_history)),
            alerts: Arc::new(AlertEngine::new(config.thresholds)),
            interval: Arc::new(RwLock::new(config.interval.max(Duration::from_millis(1)))),
            data_callback: Arc::new(RwLock::new(None)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Start the background sampling task. A no-op when already running.
    /// The provider is initialized on the first successful call; an
    /// initialization failure leaves the collector stopped.
    pub async fn start(&self) -> Result<(), MonitorError> {
        if self.is_running() {
            debug!("collector already running");
            return Ok(());
        }

        if !self.initialized.load(Ordering::Acquire) {
            self.provider.initialize().await?;
            self.initialized.store(true, Ordering::Release);
        }

        let mut shutdown = self.shutdown.lock().unwrap();
        if shutdown.is_some() {
            return Ok(());
        }

        let (tx, rx) = watch::channel(false);
        let task = SamplerTask {
            provider: self.provider.clone(),
            history: self.history.clone(),
            alerts: self.alerts.clone(),
            interval: self.interval.clone(),
            data_callback: self.data_callback.clone(),
        };
        *self.worker.lock().unwrap() = Some(tokio::spawn(task.run(rx)));
        *shutdown = Some(tx);

        info!("collector started");
        Ok(())
    }

    /// Signal the sampling task to end and wait for the in-flight iteration
    /// to finish. After this returns no further callback is invoked. A
    /// no-op when already stopped.
    pub async fn stop(&self) {
        let Some(tx) = self.shutdown.lock().unwrap().take() else {
            return;
        };
        let _ = tx.send(true);

        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(error = %error, "sampling task ended abnormally");
            }
        }
        info!("collector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().unwrap().is_some()
    }

    /// Most recent sample, if any tick has completed.
    pub fn latest_sample(&self) -> Option<SystemSample> {
        self.history.latest()
    }

    /// The most recent `count` samples (0 for everything), oldest first.
    pub fn history(&self, count: usize) -> Vec<SystemSample> {
        self.history.snapshot(count)
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }

    /// Write the history snapshot to `path`.
    pub fn export_history(&self, path: &Path) -> Result<(), MonitorError> {
        self.history.export_to(path)
    }

    /// Replace the history with a previously exported snapshot.
    pub fn import_history(&self, path: &Path) -> Result<(), MonitorError> {
        self.history.import_from(path)
    }

    /// Forward a termination request to the platform provider.
    pub fn kill_process(&self, pid: u32) -> bool {
        let killed = self.provider.terminate(pid);
        debug!(pid, killed, "process termination requested");
        killed
    }

    pub fn set_data_callback(
        &self,
        callback: impl Fn(&SystemSample, &[ProcessSample]) + Send + Sync + 'static,
    ) {
        *self.data_callback.write().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_alert_callback(&self, callback: impl Fn(&Alert) + Send + Sync + 'static) {
        self.alerts.set_callback(callback);
    }

    pub fn set_thresholds(&self, thresholds: AlertThresholds) {
        self.alerts.set_thresholds(thresholds);
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.alerts.thresholds()
    }

    /// Change the sampling cadence; the loop picks it up next iteration.
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.write().unwrap() = interval.max(Duration::from_millis(1));
    }

    /// Change the history bound; shrinking discards the oldest entries.
    pub fn set_max_history(&self, max_history: usize) {
        self.history.set_capacity(max_history);
    }
}

/// The background loop. Holds the only handles that touch the provider's
/// sampling entry points while running.
struct SamplerTask {
    provider: Arc<dyn StatsProvider>,
    history: Arc<HistoryStore>,
    alerts: Arc<AlertEngine>,
    interval: Arc<RwLock<Duration>>,
    data_callback: Arc<RwLock<Option<DataCallback>>>,
}

impl SamplerTask {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("sampling loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            let interval = *self.interval.read().unwrap();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped without an explicit stop.
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("sampling loop stopped");
    }

    /// One collection cycle: sample, append, evaluate, notify. Sampling
    /// errors are absorbed here; a tick never unwinds the loop.
    async fn tick(&self) {
        let sample = match self.provider.system_sample().await {
            Ok(sample) => sample,
            Err(error) => {
                warn!(error = %error, "system sample failed, recording placeholder");
                SystemSample::placeholder(Utc::now())
            }
        };
        let mut processes = match self.provider.process_list().await {
            Ok(processes) => processes,
            Err(error) => {
                warn!(error = %error, "process enumeration failed");
                Vec::new()
            }
        };

        // Derive per-process memory share against this tick's total and
        // order the list for consumers: hottest first.
        let total_memory = sample.memory_total_bytes;
        for process in &mut processes {
            process.memory_percent = if total_memory > 0 {
                process.memory_bytes as f64 / total_memory as f64 * 100.0
            } else {
                0.0
            };
        }
        processes.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(CmpOrdering::Equal)
        });

        self.history.append(sample.clone());

        let alerts = self.alerts.evaluate(&sample, &processes);
        if !alerts.is_empty() {
            debug!(count = alerts.len(), "alerts emitted this tick");
        }

        let callback = self.data_callback.read().unwrap().clone();
        if let Some(callback) = callback {
            callback(&sample, &processes);
        }
    }
}
