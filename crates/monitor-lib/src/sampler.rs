//! Conversion of cumulative OS counters into per-second rates.
//!
//! CPU tick totals, disk transfer counters and per-process I/O counters all
//! only ever grow (until a process restarts or the kernel resets them). The
//! sampler keeps the previous reading per counter key and derives a rate
//! from consecutive observations.

use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Baseline {
    value: u64,
    at: Instant,
}

/// Tracks the last observed value of each cumulative counter.
#[derive(Debug, Default)]
pub struct RateSampler {
    baselines: HashMap<String, Baseline>,
}

impl RateSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-second rate for `key` given the current cumulative reading.
    ///
    /// The first reading for a key only records the baseline and returns 0.
    /// A reading below the stored baseline (counter reset, e.g. a restarted
    /// process) clamps the delta to zero instead of going negative. Elapsed
    /// time is wall clock between calls rather than the nominal tick
    /// interval, so scheduling drift and missed ticks do not skew the
    /// result. The baseline is advanced on every call, so a single reset
    /// does not poison later readings.
    pub fn rate(&mut self, key: &str, value: u64, now: Instant) -> f64 {
        let baseline = Baseline { value, at: now };
        let Some(prev) = self.baselines.insert(key.to_string(), baseline) else {
            return 0.0;
        };

        let elapsed = now.saturating_duration_since(prev.at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        value.saturating_sub(prev.value) as f64 / elapsed
    }

    /// Drop baselines whose key fails `keep`. Used to forget counters of
    /// processes that have exited, so a recycled pid starts cold.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.baselines.retain(|key, _| keep(key));
    }

    /// Number of tracked counter keys.
    pub fn tracked(&self) -> usize {
        self.baselines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_reading_is_zero_regardless_of_value() {
        let mut sampler = RateSampler::new();
        assert_eq!(sampler.rate("disk_read", u64::MAX, Instant::now()), 0.0);
        assert_eq!(sampler.rate("disk_written", 0, Instant::now()), 0.0);
    }

    #[test]
    fn steady_counter_growth_yields_rate() {
        let mut sampler = RateSampler::new();
        let start = Instant::now();

        sampler.rate("disk_read", 1_000, start);
        let rate = sampler.rate("disk_read", 5_096, start + Duration::from_secs(2));
        assert!((rate - 2_048.0).abs() < 1e-9);
    }

    #[test]
    fn counter_reset_clamps_to_zero() {
        let mut sampler = RateSampler::new();
        let start = Instant::now();

        sampler.rate("pid_42", 1_000_000, start);
        let rate = sampler.rate("pid_42", 10, start + Duration::from_secs(1));
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn baseline_recovers_after_reset() {
        let mut sampler = RateSampler::new();
        let start = Instant::now();

        sampler.rate("pid_42", 1_000_000, start);
        sampler.rate("pid_42", 10, start + Duration::from_secs(1));
        // The reset reading became the new baseline.
        let rate = sampler.rate("pid_42", 1_010, start + Duration::from_secs(2));
        assert!((rate - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn elapsed_is_wall_clock_not_tick_count() {
        let mut sampler = RateSampler::new();
        let start = Instant::now();

        sampler.rate("disk_read", 0, start);
        // A "missed" tick: four seconds pass instead of one.
        let rate = sampler.rate("disk_read", 4_000, start + Duration::from_secs(4));
        assert!((rate - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_does_not_divide() {
        let mut sampler = RateSampler::new();
        let start = Instant::now();

        sampler.rate("disk_read", 100, start);
        assert_eq!(sampler.rate("disk_read", 200, start), 0.0);
    }

    #[test]
    fn retain_forgets_stale_keys() {
        let mut sampler = RateSampler::new();
        let start = Instant::now();

        sampler.rate("pid_42", 100, start);
        sampler.rate("disk_read", 100, start);
        sampler.retain(|key| !key.starts_with("pid_"));
        assert_eq!(sampler.tracked(), 1);

        // The forgotten key is a cold start again.
        let rate = sampler.rate("pid_42", 500, start + Duration::from_secs(1));
        assert_eq!(rate, 0.0);
    }
}
