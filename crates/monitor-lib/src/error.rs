//! Error taxonomy for the telemetry engine.

use thiserror::Error;

/// Errors that cross the library boundary.
///
/// Only initialization and persistence failures reach callers. Transient
/// sampling errors are absorbed inside the collection loop: the affected
/// tick continues with defaulted metrics and the error is logged.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The platform monitoring backend could not be brought up. Fatal to
    /// `Collector::start`; the collector stays stopped until retried.
    #[error("monitoring backend initialization failed: {0}")]
    Init(String),

    /// A point-in-time OS query failed.
    #[error("system sampling failed: {0}")]
    Sample(String),

    /// Reading or writing a history snapshot file failed.
    #[error("snapshot file error: {0}")]
    SnapshotIo(#[from] std::io::Error),

    /// A snapshot file did not parse as a valid history export.
    #[error("malformed snapshot: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}
