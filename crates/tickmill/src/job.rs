use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time_scale::TimeScale;

/// Unit of a delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayUnit {
    #[serde(rename = "ms", alias = "milliseconds")]
    Millis,
    #[serde(rename = "s", alias = "sec", alias = "seconds")]
    Seconds,
    #[serde(rename = "m", alias = "min", alias = "minutes")]
    Minutes,
    #[serde(rename = "h", alias = "hours")]
    Hours,
    #[serde(rename = "d", alias = "days")]
    Days,
    #[serde(rename = "w", alias = "weeks")]
    Weeks,
}

impl DelayUnit {
    /// Milliseconds per unit.
    pub fn millis(self) -> u64 {
        match self {
            Self::Millis => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
            Self::Weeks => 604_800_000,
        }
    }
}

impl fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Millis => "ms",
            Self::Seconds => "s",
            Self::Minutes => "m",
            Self::Hours => "h",
            Self::Days => "d",
            Self::Weeks => "w",
        })
    }
}

impl FromStr for DelayUnit {
    type Err = Error;

    // Unknown units are rejected outright rather than mapped to a guess.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ms" | "milliseconds" => Ok(Self::Millis),
            "s" | "sec" | "seconds" => Ok(Self::Seconds),
            "m" | "min" | "minutes" => Ok(Self::Minutes),
            "h" | "hours" => Ok(Self::Hours),
            "d" | "days" => Ok(Self::Days),
            "w" | "weeks" => Ok(Self::Weeks),
            other => Err(Error::UnknownUnit(other.to_string())),
        }
    }
}

/// A relative delay: value plus unit. The value must be positive; a zero
/// delay is rejected when the schedule is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub value: u64,
    pub unit: DelayUnit,
}

impl Delay {
    pub fn new(value: u64, unit: DelayUnit) -> Self {
        Self { value, unit }
    }

    /// Total length in milliseconds. `InvalidDelay` if the value is zero or
    /// the total does not fit the millisecond range.
    pub fn as_millis(self) -> Result<u64> {
        if self.value == 0 {
            return Err(Error::InvalidDelay);
        }
        self.value
            .checked_mul(self.unit.millis())
            .ok_or(Error::InvalidDelay)
    }
}

/// Bare numbers are milliseconds.
impl From<u64> for Delay {
    fn from(ms: u64) -> Self {
        Self { value: ms, unit: DelayUnit::Millis }
    }
}

impl From<(u64, DelayUnit)> for Delay {
    fn from((value, unit): (u64, DelayUnit)) -> Self {
        Self { value, unit }
    }
}

/// A pre-parsed cron expression, standard or extended.
///
/// Standard form is the classic five fields (minute hour dom month dow) and
/// fires with a zero seconds field. Anything with more than five
/// whitespace-separated fields is treated as extended: six fields add a
/// seconds prefix, seven add a trailing year.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields = expr.split_whitespace().count();
        let normalized = if fields > 5 {
            expr.to_string()
        } else {
            format!("0 {expr}")
        };
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            Error::InvalidCronExpression {
                expr: expr.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { expr: expr.to_string(), schedule })
    }

    /// The expression as the user wrote it.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub(crate) fn inner(&self) -> &cron::Schedule {
        &self.schedule
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fire every `Delay` after the previous logical instant.
    Delay(Delay),
    /// Fire on cron matches, evaluated in the job's timezone.
    Cron(CronSchedule),
}

impl Schedule {
    /// Millisecond sugar, normalized to `Delay(n, ms)`.
    pub fn millis(n: u64) -> Self {
        Self::Delay(Delay::from(n))
    }

    pub fn delay(value: u64, unit: DelayUnit) -> Self {
        Self::Delay(Delay::new(value, unit))
    }

    pub fn cron(expr: &str) -> Result<Self> {
        Ok(Self::Cron(CronSchedule::parse(expr)?))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay(d) => write!(f, "every {}{}", d.value, d.unit),
            Self::Cron(c) => write!(f, "cron {}", c.expr),
        }
    }
}

/// How many firings the schedule loop will arm.
///
/// The budget is decremented as each firing is scheduled, not after it runs,
/// so a schedule failure mid-sequence ends the activity without owing a fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// No scheduled firings (a `run_once` bootstrap fire still happens).
    Never,
    /// Unbounded.
    Forever,
    /// Up to `n` firings, not counting the bootstrap fire.
    Times(u32),
}

impl Default for Repeat {
    fn default() -> Self {
        Self::Forever
    }
}

/// Wire shape: `false`, `true`, or a non-negative count. Anything else is a
/// deserialization error.
#[derive(Deserialize)]
#[serde(untagged)]
enum RepeatRepr {
    Flag(bool),
    Count(u32),
}

impl<'de> Deserialize<'de> for Repeat {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match RepeatRepr::deserialize(deserializer)? {
            RepeatRepr::Flag(false) => Self::Never,
            RepeatRepr::Flag(true) => Self::Forever,
            RepeatRepr::Count(n) => Self::Times(n),
        })
    }
}

impl Serialize for Repeat {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Never => serializer.serialize_bool(false),
            Self::Forever => serializer.serialize_bool(true),
            Self::Times(n) => serializer.serialize_u32(*n),
        }
    }
}

/// What to do when a cron match lands in a DST gap (a local time that does
/// not exist because clocks jumped forward).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStrategy {
    /// Skip the nonexistent occurrence; fire at the next match that exists.
    #[default]
    Skip,
    /// Keep the same offset from local midnight, landing inside the post-gap
    /// period.
    Adjust,
}

/// Per-job configuration.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// IANA zone the cron expression is interpreted in.
    pub timezone: Tz,
    /// See the activity docs: governs the cron query base when a task
    /// overruns its slot.
    pub overlap: bool,
    pub repeat: Repeat,
    /// Fire once at activity start, before the schedule loop.
    pub run_once: bool,
    pub nonexistent_time_strategy: GapStrategy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            timezone: Tz::Etc__UTC,
            overlap: false,
            repeat: Repeat::default(),
            run_once: false,
            nonexistent_time_strategy: GapStrategy::default(),
        }
    }
}

/// Parse an IANA timezone name. The bare `"utc"` spelling is a deprecated
/// alias for `"Etc/UTC"`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    if name == "utc" {
        tracing::warn!("timezone 'utc' is deprecated, use 'Etc/UTC'");
        return Ok(Tz::Etc__UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| Error::UnknownTimezone(name.to_string()))
}

/// The user-supplied work a job performs.
///
/// `Task::new` takes a plain closure; `Task::with_instant` takes a closure
/// receiving the scheduled instant of the firing (the logical slot, not the
/// wall-clock moment the timer went off).
pub struct Task(TaskKind);

enum TaskKind {
    Nullary(Box<dyn FnMut() + Send>),
    Unary(Box<dyn FnMut(DateTime<Utc>) + Send>),
}

impl Task {
    pub fn new(f: impl FnMut() + Send + 'static) -> Self {
        Self(TaskKind::Nullary(Box::new(f)))
    }

    pub fn with_instant(f: impl FnMut(DateTime<Utc>) + Send + 'static) -> Self {
        Self(TaskKind::Unary(Box::new(f)))
    }

    pub(crate) fn invoke(&mut self, scheduled_at: DateTime<Utc>) {
        match &mut self.0 {
            TaskKind::Nullary(f) => f(),
            TaskKind::Unary(f) => f(scheduled_at),
        }
    }
}

/// A job descriptor: what to run, when, and under which options.
pub struct Job {
    /// Optional identifier; named jobs are addressable through the
    /// scheduler registry for updates and cancellation.
    pub name: Option<String>,
    pub task: Task,
    pub schedule: Schedule,
    /// Opaque user data carried along with the job; never inspected.
    pub context: HashMap<String, serde_json::Value>,
    pub options: JobOptions,
}

impl Job {
    pub fn new(task: Task, schedule: Schedule) -> Self {
        Self {
            name: None,
            task,
            schedule,
            context: HashMap::new(),
            options: JobOptions::default(),
        }
    }

    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

/// Activity-level options, separate from the job descriptor.
#[derive(Clone, Default)]
pub struct TestOpts {
    /// Seed for `scheduled_at`; defaults to the time scale's current instant.
    pub start_time: Option<DateTime<Utc>>,
    /// Alternate clock; defaults to `NaturalTimeScale`.
    pub time_scale: Option<Arc<dyn TimeScale>>,
}
