//! Core data model for system-wide and per-process samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One visible process as observed at a single tick.
///
/// Rebuilt from scratch every tick and handed to the data callback; process
/// samples are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// Share of total physical memory, derived by the collector once the
    /// tick's memory total is known.
    pub memory_percent: f64,
    /// Cumulative bytes read since process start.
    pub io_read_bytes: u64,
    /// Cumulative bytes written since process start.
    pub io_write_bytes: u64,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
}

/// System-wide snapshot produced once per tick and appended to history.
///
/// Immutable once constructed. The serialized form is the snapshot-file
/// entry format, with the timestamp rendered as `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// Bytes per second.
    pub disk_io_read_rate: f64,
    /// Bytes per second.
    pub disk_io_write_rate: f64,
    pub process_count: u32,
}

impl SystemSample {
    /// Build a sample, deriving `memory_percent` from used/total. A zero
    /// memory total yields zero percent rather than dividing by zero.
    pub fn new(
        timestamp: DateTime<Utc>,
        cpu_percent: f64,
        memory_used_bytes: u64,
        memory_total_bytes: u64,
        disk_io_read_rate: f64,
        disk_io_write_rate: f64,
        process_count: u32,
    ) -> Self {
        let memory_percent = if memory_total_bytes > 0 {
            memory_used_bytes as f64 / memory_total_bytes as f64 * 100.0
        } else {
            0.0
        };

        Self {
            timestamp,
            cpu_percent,
            memory_percent,
            memory_used_bytes,
            memory_total_bytes,
            disk_io_read_rate,
            disk_io_write_rate,
            process_count,
        }
    }

    /// Zeroed stand-in for a tick whose system query failed outright, so the
    /// history keeps one entry per tick.
    pub(crate) fn placeholder(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, 0.0, 0, 0, 0.0, 0.0, 0)
    }
}

/// Serde adapter rendering timestamps as `YYYY-MM-DD HH:MM:SS` (UTC), the
/// format used by history snapshot files.
pub(crate) mod timestamp_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
