//! System telemetry daemon.
//!
//! Thin shell around `monitor-lib`: wires the collector's callbacks to
//! structured log output, restores and exports history snapshots, and runs
//! until interrupted. All sampling, alerting and retention logic lives in
//! the library.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use monitor_lib::{provider, Collector};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

/// Log a full summary every N ticks to keep the output readable.
const SUMMARY_EVERY: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = config::MonitorConfig::load()?;
    info!(
        interval_ms = config.sample_interval_ms,
        max_history = config.max_history,
        "monitor configured"
    );

    let provider = provider::create_provider();
    let collector = Arc::new(Collector::new(provider, config.collector_config()));

    if let Some(path) = config.snapshot_path() {
        if path.exists() {
            match collector.import_history(&path) {
                Ok(()) => info!(
                    path = %path.display(),
                    entries = collector.history(0).len(),
                    "previous history restored"
                ),
                Err(error) => warn!(error = %error, "could not restore previous history"),
            }
        }
    }

    collector.set_alert_callback(|alert| {
        warn!(category = %alert.category, "{}", alert.message);
    });

    let ticks = Arc::new(AtomicU64::new(0));
    let tick_counter = ticks.clone();
    collector.set_data_callback(move |sample, processes| {
        let n = tick_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SUMMARY_EVERY != 0 {
            return;
        }
        info!(
            cpu_percent = %format_args!("{:.1}", sample.cpu_percent),
            memory_percent = %format_args!("{:.1}", sample.memory_percent),
            disk_read_mbps = %format_args!("{:.2}", sample.disk_io_read_rate / (1024.0 * 1024.0)),
            disk_write_mbps = %format_args!("{:.2}", sample.disk_io_write_rate / (1024.0 * 1024.0)),
            processes = sample.process_count,
            "system sample"
        );
        if let Some(top) = processes.first() {
            info!(
                pid = top.pid,
                name = %top.name,
                cpu_percent = %format_args!("{:.1}", top.cpu_percent),
                "top process"
            );
        }
    });

    collector.start().await?;
    info!("collection started, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    collector.stop().await;

    if let Some(path) = config.snapshot_path() {
        match collector.export_history(&path) {
            Ok(()) => info!(path = %path.display(), "history snapshot saved"),
            Err(error) => warn!(error = %error, "history snapshot failed"),
        }
    }

    Ok(())
}
