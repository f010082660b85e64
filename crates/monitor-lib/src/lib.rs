//! Continuous system-telemetry engine
//!
//! This crate provides the core functionality for:
//! - Platform statistics providers (procfs on Linux, sysinfo elsewhere)
//! - Rate derivation from cumulative OS counters
//! - Threshold alerting with per-key cooldown suppression
//! - Bounded rolling history with snapshot export/import
//! - A background collector composing the above

pub mod alerts;
pub mod collector;
pub mod error;
pub mod history;
pub mod models;
pub mod provider;
pub mod sampler;

pub use alerts::{Alert, AlertCallback, AlertCategory, AlertEngine, AlertThresholds};
pub use collector::{Collector, CollectorConfig, DataCallback};
pub use error::MonitorError;
pub use history::HistoryStore;
pub use models::{ProcessSample, SystemSample};
pub use provider::{create_provider, StatsProvider};
pub use sampler::RateSampler;
