//! # tickmill
//!
//! Per-job scheduling engine for tokio applications.
//!
//! ## Features
//!
//! - One tokio task per job: every job owns its timer, its schedule state,
//!   and its run measurements. No shared mutable state between jobs.
//! - Three schedule kinds: an absolute instant (`run_at`), a relative delay
//!   with unit (`run_in`), or a recurring cron expression (`run_every`),
//!   standard five-field or extended with seconds and year.
//! - Cron is evaluated in an IANA timezone with explicit DST rules:
//!   ambiguous local times resolve to the later UTC instant, nonexistent
//!   local times are skipped or adjusted per job configuration.
//! - Virtual time: a `TimeScale` injected per activity divides every real
//!   delay, so a test can push a job through a day of logical time in a
//!   second of wall clock.
//! - Live reconfigure and cancel through job handles, plus per-run stats
//!   (scheduling delay, quantization error, execution time).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tickmill::{RunOpts, Scheduler, Task};
//!
//! #[tokio::main]
//! async fn main() {
//!     let scheduler = Scheduler::new();
//!     let handle = scheduler
//!         .run_every(
//!             Task::new(|| println!("tick")),
//!             "*/5 * * * *",
//!             RunOpts { timezone: Some("America/Chicago".into()), ..RunOpts::default() },
//!         )
//!         .unwrap();
//!     handle.closed().await;
//! }
//! ```

pub mod activity;
pub mod error;
pub mod evaluator;
pub mod job;
pub mod scheduler;
pub mod stats;
pub mod time_scale;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use activity::{JobHandle, ScheduleInfo};
pub use error::{Error, Result};
pub use evaluator::{next_fire, Firing};
pub use job::{
    parse_timezone, CronSchedule, Delay, DelayUnit, GapStrategy, Job, JobOptions, Repeat,
    Schedule, Task, TestOpts,
};
pub use scheduler::{RunOpts, Scheduler};
pub use stats::{JobStats, RunningStats};
pub use time_scale::{NaturalTimeScale, TimeScale};
