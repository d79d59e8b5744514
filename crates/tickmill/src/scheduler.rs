//! Convenience façade over job activities.
//!
//! The `Scheduler` spawns activities and keeps a name to handle registry so
//! named jobs can be updated or cancelled later. It owns no timing logic;
//! everything after spawn happens inside the per-job activity.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::activity::{self, JobHandle};
use crate::error::{Error, Result};
use crate::job::{
    parse_timezone, Delay, GapStrategy, Job, JobOptions, Repeat, Schedule, Task, TestOpts,
};
use crate::time_scale::TimeScale;

/// Options accepted by the `run_*` entry points, covering both the job
/// configuration and the activity-level test options. The façade splits them
/// into [`JobOptions`] and [`TestOpts`].
#[derive(Clone, Default)]
pub struct RunOpts {
    pub name: Option<String>,
    /// IANA zone name; the bare `"utc"` spelling is a deprecated alias for
    /// `"Etc/UTC"`.
    pub timezone: Option<String>,
    pub overlap: bool,
    /// `None` takes the entry point's default: one firing for `run_at` and
    /// `run_in`, unbounded for `run_every`.
    pub repeat: Option<Repeat>,
    pub run_once: bool,
    pub nonexistent_time_strategy: GapStrategy,
    pub context: HashMap<String, serde_json::Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub time_scale: Option<std::sync::Arc<dyn TimeScale>>,
}

impl RunOpts {
    fn into_parts(
        self,
        default_repeat: Repeat,
    ) -> Result<(Option<String>, HashMap<String, serde_json::Value>, JobOptions, TestOpts)> {
        let timezone = match &self.timezone {
            Some(name) => parse_timezone(name)?,
            None => Tz::Etc__UTC,
        };
        let options = JobOptions {
            timezone,
            overlap: self.overlap,
            repeat: self.repeat.unwrap_or(default_repeat),
            run_once: self.run_once,
            nonexistent_time_strategy: self.nonexistent_time_strategy,
        };
        let test_opts = TestOpts {
            start_time: self.start_time,
            time_scale: self.time_scale,
        };
        Ok((self.name, self.context, options, test_opts))
    }
}

/// Spawns and tracks job activities.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JobHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once at `instant`. An instant in the past fires
    /// immediately: the delay is clamped to the one-millisecond minimum,
    /// the smallest delay a schedule accepts.
    pub fn run_at(&self, task: Task, instant: DateTime<Utc>, opts: RunOpts) -> Result<JobHandle> {
        let now = match &opts.time_scale {
            Some(scale) => scale.now(Tz::Etc__UTC).with_timezone(&Utc),
            None => Utc::now(),
        };
        let delay_ms = instant.signed_duration_since(now).num_milliseconds().max(1) as u64;
        self.launch(task, Schedule::millis(delay_ms), opts, Repeat::Times(1))
    }

    /// Run `task` after `delay` (bare numbers are milliseconds).
    pub fn run_in(&self, task: Task, delay: impl Into<Delay>, opts: RunOpts) -> Result<JobHandle> {
        self.launch(task, Schedule::Delay(delay.into()), opts, Repeat::Times(1))
    }

    /// Run `task` on every match of `cron`, parsed per the rules on
    /// [`crate::job::CronSchedule`].
    pub fn run_every(&self, task: Task, cron: &str, opts: RunOpts) -> Result<JobHandle> {
        self.launch(task, Schedule::cron(cron)?, opts, Repeat::Forever)
    }

    /// Direct entry point for a fully built [`Job`].
    pub fn run_job(&self, job: Job, test_opts: TestOpts) -> Result<JobHandle> {
        let handle = activity::spawn(job, &test_opts)?;
        self.register(&handle);
        Ok(handle)
    }

    /// Reconfigure the running activity registered under `job.name` with a
    /// new descriptor. The activity restarts its lifecycle from Bootstrap,
    /// so a descriptor with `run_once` fires immediately.
    pub async fn update_job(&self, job: Job, test_opts: TestOpts) -> Result<()> {
        let name = job.name.clone().ok_or(Error::UnnamedJob)?;
        let handle = self
            .jobs
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(name.clone()))?;
        let result = handle.reconfigure(job, test_opts).await;
        if result.is_err() {
            // The activity is gone, whichever error it was.
            self.jobs.lock().unwrap().remove(&name);
        }
        result
    }

    /// Cancel through the façade, dropping the registry entry as well.
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
        if let Some(name) = handle.name() {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.get(name).is_some_and(|h| h.same_activity(handle)) {
                jobs.remove(name);
            }
        }
    }

    fn launch(
        &self,
        task: Task,
        schedule: Schedule,
        opts: RunOpts,
        default_repeat: Repeat,
    ) -> Result<JobHandle> {
        let (name, context, options, test_opts) = opts.into_parts(default_repeat)?;
        let job = Job { name, task, schedule, context, options };
        self.run_job(job, test_opts)
    }

    fn register(&self, handle: &JobHandle) {
        if let Some(name) = handle.name() {
            // A name can only point at one activity; relaunching under the
            // same name supersedes the registry entry.
            self.jobs
                .lock()
                .unwrap()
                .insert(name.to_string(), handle.clone());
        }
    }
}
