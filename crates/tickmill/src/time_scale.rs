//! Clock and speed abstraction for job activities.
//!
//! - `NaturalTimeScale`: real wall-clock time, speedup 1
//! - test scales (see the `mocks` module) can pin the clock or compress
//!   a day of logical time into a second of real time

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Abstraction over "what time is it" and "how fast do delays elapse".
///
/// An activity reads `now` whenever it needs the current instant (schedule
/// evaluation, stats timestamps) and divides every real delay it sleeps by
/// `speedup`. Implement this trait to drive an activity through virtual time.
///
/// `speedup` must return a finite positive number and must not change over
/// an activity's lifetime; the activity validates it once at start and
/// caches it.
pub trait TimeScale: Send + Sync {
    /// Current instant in the requested timezone.
    fn now(&self, tz: Tz) -> DateTime<Tz>;

    /// Divisor applied to every real delay the activity waits.
    fn speedup(&self) -> f64;
}

/// Live implementation: real UTC time, no compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalTimeScale;

impl TimeScale for NaturalTimeScale {
    fn now(&self, tz: Tz) -> DateTime<Tz> {
        Utc::now().with_timezone(&tz)
    }

    fn speedup(&self) -> f64 {
        1.0
    }
}
