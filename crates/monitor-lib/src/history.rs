//! Bounded rolling history of system samples with snapshot persistence.
//!
//! All locking for the shared history lives inside `HistoryStore`; readers
//! always receive independent copies, never references into the live
//! buffer. Snapshot files are written atomically (temp file then rename) so
//! a failed export can never corrupt a previous snapshot, and an import
//! replaces the buffer only after the whole file has parsed.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::MonitorError;
use crate::models::{timestamp_format, SystemSample};

/// On-disk snapshot layout: the scalar history entries plus the export time.
#[derive(Debug, Serialize, Deserialize)]
struct HistorySnapshot {
    system_history: Vec<SystemSample>,
    #[serde(with = "timestamp_format")]
    export_timestamp: DateTime<Utc>,
}

struct Inner {
    entries: VecDeque<SystemSample>,
    capacity: usize,
}

impl Inner {
    fn evict_to_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Thread-safe ring buffer of `SystemSample`s with FIFO eviction.
pub struct HistoryStore {
    inner: Mutex<Inner>,
}

impl HistoryStore {
    /// Create a store holding at most `capacity` samples. A capacity of
    /// zero is bumped to one so the latest sample is always retained.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(10_000)),
                capacity,
            }),
        }
    }

    /// Append a sample to the tail, evicting from the head once full.
    pub fn append(&self, sample: SystemSample) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.len() >= inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(sample);
    }

    /// Most recently appended sample, if any.
    pub fn latest(&self) -> Option<SystemSample> {
        self.inner.lock().unwrap().entries.back().cloned()
    }

    /// The most recent `count` samples in chronological order, as an
    /// independent copy. A `count` of zero (or one at least as large as the
    /// buffer) returns everything.
    pub fn snapshot(&self, count: usize) -> Vec<SystemSample> {
        let inner = self.inner.lock().unwrap();
        let len = inner.entries.len();
        let skip = if count == 0 || count >= len {
            0
        } else {
            len - count
        };
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    /// Change the bound at runtime; shrinking discards the oldest entries.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.capacity = capacity.max(1);
        inner.evict_to_capacity();
    }

    /// Serialize every entry's scalar fields plus an export timestamp to
    /// `path`. The buffer is copied under the lock and serialized outside
    /// it, so a slow disk never blocks the sampling task.
    pub fn export_to(&self, path: &Path) -> Result<(), MonitorError> {
        let entries: Vec<SystemSample> = {
            let inner = self.inner.lock().unwrap();
            inner.entries.iter().cloned().collect()
        };
        let count = entries.len();
        let snapshot = HistorySnapshot {
            system_history: entries,
            export_timestamp: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write to a sibling temp file and rename over the target.
        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;

        debug!(path = %path.display(), entries = count, "history snapshot written");
        Ok(())
    }

    /// Replace the buffer with the entries from a snapshot file, preserving
    /// file order. If the file holds more entries than the capacity, the
    /// oldest are discarded. Any read or parse failure leaves the current
    /// buffer untouched.
    pub fn import_from(&self, path: &Path) -> Result<(), MonitorError> {
        let data = fs::read_to_string(path)?;
        let snapshot: HistorySnapshot = serde_json::from_str(&data)?;

        let mut inner = self.inner.lock().unwrap();
        let excess = snapshot.system_history.len().saturating_sub(inner.capacity);
        inner.entries.clear();
        inner
            .entries
            .extend(snapshot.system_history.into_iter().skip(excess));

        info!(path = %path.display(), entries = inner.entries.len(), "history snapshot restored");
        Ok(())
    }
}
