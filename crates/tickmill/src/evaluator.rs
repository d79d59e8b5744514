//! Pure next-fire computation.
//!
//! Given the previous logical instant and a job's schedule, compute the next
//! logical instant, its wall-clock projection, and the real delay to sleep.
//! Cron schedules are evaluated as naive local time in the job's timezone and
//! re-localized afterwards, which keeps the DST rules in this module instead
//! of inheriting whatever a library default would do:
//!
//! - a local time that exists exactly once is used directly;
//! - an ambiguous local time (clocks fell back) resolves to the second
//!   occurrence, the later UTC instant;
//! - a nonexistent local time (clocks jumped forward) is resolved by the
//!   job's `GapStrategy`: `Skip` moves on to the next match that exists,
//!   `Adjust` keeps the same offset from local midnight inside the post-gap
//!   period.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Error, Result};
use crate::job::{GapStrategy, JobOptions, Schedule};
use crate::time_scale::TimeScale;

/// How many cron matches to examine while skipping over a DST gap. A gap is
/// at most a day wide, so even a per-second expression stays well under this.
const GAP_SCAN_LIMIT: usize = 100_000;

/// One armed firing, as computed by [`next_fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    /// The logical instant this firing represents.
    pub scheduled_at: DateTime<Utc>,
    /// Projection of when the timer is expected to go off, in the time
    /// scale's clock.
    pub quantized_scheduled_at: DateTime<Utc>,
    /// Real milliseconds to sleep, after speedup.
    pub delay_ms: u64,
}

/// Compute the next firing after `from` for the given schedule.
///
/// `from` is the previous logical instant (`scheduled_at`). Delay schedules
/// advance logically from it regardless of the current time; cron schedules
/// are queried from the current time, or from `from` itself when `overlap`
/// is set, which lets an overrunning task catch up on missed slots with
/// zero-delay firings.
pub fn next_fire(
    from: DateTime<Utc>,
    schedule: &Schedule,
    options: &JobOptions,
    time_scale: &dyn TimeScale,
    speedup: f64,
) -> Result<Firing> {
    let now_local = time_scale.now(options.timezone);
    let now = now_local.with_timezone(&Utc);

    match schedule {
        Schedule::Delay(delay) => {
            let raw_ms = delay.as_millis()?;
            let raw = i64::try_from(raw_ms).map_err(|_| Error::InvalidDelay)?;
            let delay_ms = scale_delay(raw_ms, speedup);
            let scheduled_at = from + Duration::milliseconds(raw);
            Ok(Firing {
                scheduled_at,
                quantized_scheduled_at: quantize(now, delay_ms, speedup),
                delay_ms,
            })
        }
        Schedule::Cron(cron) => {
            let base = if options.overlap { from.with_timezone(&options.timezone) } else { now_local };
            let scheduled_at = cron_next_in_tz(
                cron.inner(),
                base.naive_local(),
                options.timezone,
                options.nonexistent_time_strategy,
            )?;
            let raw_ms = scheduled_at
                .signed_duration_since(now)
                .num_milliseconds()
                .max(0) as u64;
            let delay_ms = scale_delay(raw_ms, speedup);
            Ok(Firing {
                scheduled_at,
                quantized_scheduled_at: quantize(now, delay_ms, speedup),
                delay_ms,
            })
        }
    }
}

/// Real delay after speedup, rounded to the nearest millisecond.
fn scale_delay(raw_ms: u64, speedup: f64) -> u64 {
    (raw_ms as f64 / speedup).round() as u64
}

/// Where the armed timer is expected to land on the time scale's clock.
/// Under speedup 1 this is `now + delay_ms`; under larger speedups the
/// millisecond rounding of the real delay shows up here as quantization
/// error against `scheduled_at`.
fn quantize(now: DateTime<Utc>, delay_ms: u64, speedup: f64) -> DateTime<Utc> {
    now + Duration::microseconds((delay_ms as f64 * speedup * 1_000.0).round() as i64)
}

/// Next cron match strictly after `base`, evaluated as naive local time in
/// `tz` and re-localized per the rules in the module docs.
fn cron_next_in_tz(
    schedule: &cron::Schedule,
    base: NaiveDateTime,
    tz: Tz,
    strategy: GapStrategy,
) -> Result<DateTime<Utc>> {
    // The cron engine walks naive local time; a fake-UTC probe carries the
    // naive value through its TimeZone-generic interface.
    let probe = DateTime::<Utc>::from_naive_utc_and_offset(base, Utc);
    for candidate in schedule.after(&probe).take(GAP_SCAN_LIMIT) {
        let naive = candidate.naive_utc();
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(local) => return Ok(local.with_timezone(&Utc)),
            LocalResult::Ambiguous(_, later) => return Ok(later.with_timezone(&Utc)),
            LocalResult::None => match strategy {
                GapStrategy::Skip => continue,
                GapStrategy::Adjust => return adjust_into_gap(naive, tz),
            },
        }
    }
    Err(Error::ScheduleExhausted)
}

/// Synthesize an instant for a nonexistent local time: local midnight of the
/// same date plus the match's offset from midnight. Midnight itself is valid
/// in every zone that moves its clocks during the night; the handful of
/// zones that transition at midnight make this unresolvable.
fn adjust_into_gap(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>> {
    let midnight = naive.date().and_time(NaiveTime::MIN);
    let offset = naive.signed_duration_since(midnight);
    let midnight_local = match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(_, later) => later,
        LocalResult::None => return Err(Error::ScheduleExhausted),
    };
    Ok(midnight_local.with_timezone(&Utc) + offset)
}
