//! Progress reporting for long-running jobs, throttled at the source.
//!
//! Small inputs report roughly every 1% or 500 ms; multi-gigabyte inputs
//! every 5% or 2 s, whichever comes first.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    /// Percentage in `0..=100`.
    pub progress: f32,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub eta_seconds: f64,
    /// Bytes per second since the job started.
    pub speed: f64,
}

pub struct ProgressThrottle {
    total: u64,
    byte_step: u64,
    interval: Duration,
    started: Instant,
    last_bytes: u64,
    last_emit: Instant,
}

impl ProgressThrottle {
    pub fn new(total: u64) -> Self {
        Self::starting_at(total, Instant::now())
    }

    pub fn starting_at(total: u64, now: Instant) -> Self {
        let (percent, interval) = Self::cadence(total);
        Self {
            total,
            byte_step: (total * percent / 100).max(1),
            interval,
            started: now,
            last_bytes: 0,
            last_emit: now,
        }
    }

    /// Percent step and time interval for an input of `total` bytes.
    pub fn cadence(total: u64) -> (u64, Duration) {
        if total < 100 * MIB {
            (1, Duration::from_millis(500))
        } else if total < GIB {
            (2, Duration::from_millis(1_000))
        } else {
            (5, Duration::from_millis(2_000))
        }
    }

    pub fn update(&mut self, processed: u64) -> Option<ProgressStats> {
        self.update_at(processed, Instant::now())
    }

    /// Returns stats when enough bytes or time have passed since the last
    /// emission, `None` otherwise.
    pub fn update_at(&mut self, processed: u64, now: Instant) -> Option<ProgressStats> {
        let advanced = processed.saturating_sub(self.last_bytes) >= self.byte_step;
        let waited = now.saturating_duration_since(self.last_emit) >= self.interval;
        if !advanced && !waited {
            return None;
        }
        self.last_bytes = processed;
        self.last_emit = now;
        Some(self.stats_at(processed, now))
    }

    pub fn stats_at(&self, processed: u64, now: Instant) -> ProgressStats {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let speed = if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 };
        let remaining = self.total.saturating_sub(processed) as f64;
        let eta_seconds = if speed > 0.0 { remaining / speed } else { 0.0 };
        let progress = if self.total == 0 {
            100.0
        } else {
            (processed.min(self.total) as f64 / self.total as f64 * 100.0) as f32
        };

        ProgressStats {
            progress,
            processed_bytes: processed,
            total_bytes: self.total,
            eta_seconds,
            speed,
        }
    }
}
