//! Per-job run measurements.
//!
//! Three metrics per job, each a streaming aggregate updated once per task
//! execution. The activity is the only writer; snapshots are plain copies.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Streaming `{count, min, max, mean, m2}` aggregate over microsecond
/// samples, using Welford's update for the variance terms.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunningStats {
    pub count: u64,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub mean: f64,
    pub m2: f64,
}

impl RunningStats {
    pub fn record(&mut self, sample_us: i64) {
        self.count += 1;
        self.min = Some(self.min.map_or(sample_us, |m| m.min(sample_us)));
        self.max = Some(self.max.map_or(sample_us, |m| m.max(sample_us)));
        let s = sample_us as f64;
        let delta = s - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (s - self.mean);
    }

    /// Sample variance; `None` until there are at least two samples.
    pub fn variance(&self) -> Option<f64> {
        if self.count < 2 {
            None
        } else {
            Some(self.m2 / (self.count - 1) as f64)
        }
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// The three per-job metrics, in microseconds:
///
/// - `scheduling_delay`: actual start minus the quantized scheduled instant.
///   Normally non-negative; a timer going off early makes it negative.
/// - `quantization_error`: absolute difference between the quantized and the
///   exact logical instant.
/// - `execution_time`: task body duration.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobStats {
    pub scheduling_delay: RunningStats,
    pub quantization_error: RunningStats,
    pub execution_time: RunningStats,
}

impl JobStats {
    pub(crate) fn record(
        &mut self,
        scheduled_at: DateTime<Utc>,
        quantized_scheduled_at: DateTime<Utc>,
        actual_start: DateTime<Utc>,
        actual_end: DateTime<Utc>,
    ) {
        self.scheduling_delay
            .record(micros_between(quantized_scheduled_at, actual_start));
        self.quantization_error
            .record(micros_between(scheduled_at, quantized_scheduled_at).abs());
        self.execution_time
            .record(micros_between(actual_start, actual_end));
    }
}

fn micros_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    later
        .signed_duration_since(earlier)
        .num_microseconds()
        .unwrap_or(i64::MAX)
}
