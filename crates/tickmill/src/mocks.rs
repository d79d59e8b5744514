//! Test doubles for driving activities through controlled time.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tickmill = { path = "...", features = ["test-support"] }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::job::Task;
use crate::time_scale::TimeScale;

// ── FixedTimeScale ────────────────────────────────────────────────────────────

/// A clock pinned to one instant. Useful for exercising schedule evaluation
/// at literal times (DST transitions, year boundaries).
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeScale {
    now: DateTime<Utc>,
    speedup: f64,
}

impl FixedTimeScale {
    pub fn new(now: DateTime<Utc>, speedup: f64) -> Self {
        Self { now, speedup }
    }
}

impl TimeScale for FixedTimeScale {
    fn now(&self, tz: Tz) -> DateTime<Tz> {
        self.now.with_timezone(&tz)
    }

    fn speedup(&self) -> f64 {
        self.speedup
    }
}

// ── VirtualTimeScale ──────────────────────────────────────────────────────────

/// A clock that starts at a chosen instant and runs `speedup` times faster
/// than real time. With a speedup of 86 400 one real second carries a job
/// through a full logical day.
#[derive(Debug, Clone)]
pub struct VirtualTimeScale {
    start: DateTime<Utc>,
    origin: Instant,
    speedup: f64,
}

impl VirtualTimeScale {
    pub fn new(start: DateTime<Utc>, speedup: f64) -> Self {
        Self { start, origin: Instant::now(), speedup }
    }
}

impl TimeScale for VirtualTimeScale {
    fn now(&self, tz: Tz) -> DateTime<Tz> {
        let elapsed_us = self.origin.elapsed().as_secs_f64() * self.speedup * 1e6;
        (self.start + Duration::microseconds(elapsed_us as i64)).with_timezone(&tz)
    }

    fn speedup(&self) -> f64 {
        self.speedup
    }
}

// ── Recorder ──────────────────────────────────────────────────────────────────

/// Records the scheduled instant of every firing.
#[derive(Clone, Default)]
pub struct Recorder {
    fires: Arc<Mutex<Vec<DateTime<Utc>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// An arity-1 task that appends each fire's scheduled instant.
    pub fn task(&self) -> Task {
        let fires = Arc::clone(&self.fires);
        Task::with_instant(move |at| {
            fires.lock().unwrap().push(at);
        })
    }

    pub fn fires(&self) -> Vec<DateTime<Utc>> {
        self.fires.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.fires.lock().unwrap().len()
    }
}
