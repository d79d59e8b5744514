//! The per-job activity: one tokio task owning one job.
//!
//! The activity is a mailbox loop. It computes the next firing, arms a
//! single sleep, and waits for whichever comes first: the timer or a control
//! message. Control messages win ties (the select is biased towards the
//! mailbox), so a cancel that races an elapsed timer prevents the fire.
//! While the task body runs nothing else is processed; messages queued
//! during a fire are handled once the activity is armed again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::evaluator;
use crate::job::{Job, Repeat, TestOpts};
use crate::stats::JobStats;
use crate::time_scale::{NaturalTimeScale, TimeScale};

pub(crate) enum Control {
    Reconfigure {
        job: Job,
        test_opts: TestOpts,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel,
    NextSchedule {
        reply: oneshot::Sender<ScheduleInfo>,
    },
}

/// Snapshot of the armed firing, as reported by [`JobHandle::next_schedule`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScheduleInfo {
    pub scheduled_at: DateTime<Utc>,
    pub quantized_scheduled_at: DateTime<Utc>,
    pub delay_ms: u64,
}

/// Handle to a running job activity.
///
/// Handles are cheap to clone. Dropping every handle does not stop the job;
/// use [`JobHandle::cancel`] for that.
#[derive(Clone, Debug)]
pub struct JobHandle {
    name: Option<String>,
    tx: mpsc::UnboundedSender<Control>,
    stats: Arc<Mutex<JobStats>>,
}

impl JobHandle {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stop the job. Idempotent: cancelling an already-terminated activity
    /// is a no-op. A task body that is currently running finishes first;
    /// cancellation only prevents future firings.
    pub fn cancel(&self) {
        let _ = self.tx.send(Control::Cancel);
    }

    /// The currently armed firing. Errors once the activity has terminated.
    pub async fn next_schedule(&self) -> Result<ScheduleInfo> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Control::NextSchedule { reply })
            .map_err(|_| Error::Terminated)?;
        rx.await.map_err(|_| Error::Terminated)
    }

    /// Copy of the job's run measurements. Remains available after the
    /// activity terminates.
    pub fn stats(&self) -> JobStats {
        *self.stats.lock().unwrap()
    }

    pub fn is_terminated(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether two handles point at the same activity.
    pub(crate) fn same_activity(&self, other: &JobHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Resolves once the activity has terminated, for any reason.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Swap the job descriptor in place. Replies `Ok` once the new schedule
    /// is armed (or ran to normal completion), `Err` if the activity is gone
    /// or the new schedule has no upcoming occurrence.
    pub(crate) async fn reconfigure(&self, job: Job, test_opts: TestOpts) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Control::Reconfigure { job, test_opts, reply })
            .map_err(|_| Error::Terminated)?;
        rx.await.map_err(|_| Error::Terminated)?
    }
}

/// Validate and launch an activity for `job`. Must be called from within a
/// tokio runtime.
///
/// Schedule problems that would stop the activity on its very first
/// evaluation are reported here instead of spawning a dead-on-arrival task.
pub(crate) fn spawn(job: Job, test_opts: &TestOpts) -> Result<JobHandle> {
    let time_scale: Arc<dyn TimeScale> = test_opts
        .time_scale
        .clone()
        .unwrap_or_else(|| Arc::new(NaturalTimeScale));
    let speedup = time_scale.speedup();
    if !speedup.is_finite() || speedup <= 0.0 {
        return Err(Error::InvalidSpeedup(speedup));
    }

    let start_time = test_opts
        .start_time
        .unwrap_or_else(|| time_scale.now(job.options.timezone).with_timezone(&Utc));

    if will_schedule(job.options.repeat) {
        evaluator::next_fire(
            start_time,
            &job.schedule,
            &job.options,
            time_scale.as_ref(),
            speedup,
        )?;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(Mutex::new(JobStats::default()));
    let handle = JobHandle {
        name: job.name.clone(),
        tx,
        stats: Arc::clone(&stats),
    };

    let budget = job.options.repeat;
    let activity = Activity {
        job,
        time_scale,
        speedup,
        budget,
        scheduled_at: start_time,
        quantized_scheduled_at: start_time,
        delay_ms: 0,
        stats,
        rx,
        mailbox_open: true,
    };
    tokio::spawn(activity.run());
    Ok(handle)
}

fn will_schedule(budget: Repeat) -> bool {
    !matches!(budget, Repeat::Never | Repeat::Times(0))
}

/// Take one firing from the budget. Returns false when exhausted. The
/// budget shrinks when a firing is scheduled, not when it runs.
fn consume_budget(budget: &mut Repeat) -> bool {
    match *budget {
        Repeat::Never | Repeat::Times(0) => false,
        Repeat::Forever => true,
        Repeat::Times(n) => {
            *budget = Repeat::Times(n - 1);
            true
        }
    }
}

struct Activity {
    job: Job,
    time_scale: Arc<dyn TimeScale>,
    speedup: f64,
    budget: Repeat,
    scheduled_at: DateTime<Utc>,
    quantized_scheduled_at: DateTime<Utc>,
    delay_ms: u64,
    stats: Arc<Mutex<JobStats>>,
    rx: mpsc::UnboundedReceiver<Control>,
    mailbox_open: bool,
}

impl Activity {
    async fn run(mut self) {
        tracing::info!(
            job = self.job.display_name(),
            schedule = %self.job.schedule,
            "job activity started"
        );

        if self.job.options.run_once {
            self.fire();
        }

        // Outstanding reconfigure reply; answered by the outcome of the
        // next schedule evaluation.
        let mut pending_reply: Option<oneshot::Sender<Result<()>>> = None;

        'schedule: loop {
            if !consume_budget(&mut self.budget) {
                if let Some(reply) = pending_reply.take() {
                    let _ = reply.send(Ok(()));
                }
                tracing::debug!(job = self.job.display_name(), "repeat budget exhausted");
                break;
            }

            let firing = match evaluator::next_fire(
                self.scheduled_at,
                &self.job.schedule,
                &self.job.options,
                self.time_scale.as_ref(),
                self.speedup,
            ) {
                Ok(firing) => firing,
                Err(e) => {
                    // A schedule running out of occurrences is a normal way
                    // for an activity to end, not a crash.
                    tracing::debug!(
                        job = self.job.display_name(),
                        error = %e,
                        "no next occurrence, stopping"
                    );
                    if let Some(reply) = pending_reply.take() {
                        let _ = reply.send(Err(e));
                    }
                    break;
                }
            };

            self.scheduled_at = firing.scheduled_at;
            self.quantized_scheduled_at = firing.quantized_scheduled_at;
            self.delay_ms = firing.delay_ms;
            if let Some(reply) = pending_reply.take() {
                let _ = reply.send(Ok(()));
            }

            // Armed: the pinned sleep is the activity's one timer. It is
            // dropped, never re-armed, on cancel and reconfigure.
            let timer = tokio::time::sleep(Duration::from_millis(self.delay_ms));
            tokio::pin!(timer);
            loop {
                tokio::select! {
                    biased;
                    msg = self.rx.recv(), if self.mailbox_open => match msg {
                        Some(Control::Cancel) => {
                            tracing::info!(job = self.job.display_name(), "job cancelled");
                            break 'schedule;
                        }
                        Some(Control::NextSchedule { reply }) => {
                            let _ = reply.send(ScheduleInfo {
                                scheduled_at: self.scheduled_at,
                                quantized_scheduled_at: self.quantized_scheduled_at,
                                delay_ms: self.delay_ms,
                            });
                        }
                        Some(Control::Reconfigure { job, test_opts, reply }) => {
                            match self.apply_reconfigure(job, test_opts) {
                                Ok(()) => {
                                    pending_reply = Some(reply);
                                    continue 'schedule;
                                }
                                Err(e) => {
                                    let _ = reply.send(Err(e));
                                    break 'schedule;
                                }
                            }
                        }
                        None => {
                            // Every handle dropped: nobody can signal this
                            // activity anymore, but the job keeps firing.
                            self.mailbox_open = false;
                        }
                    },
                    () = &mut timer => {
                        self.fire();
                        continue 'schedule;
                    }
                }
            }
        }

        tracing::info!(job = self.job.display_name(), "job activity terminated");
    }

    /// Swap the descriptor and restart the lifecycle from Bootstrap. The
    /// reply to the caller is deferred until the next schedule evaluation.
    fn apply_reconfigure(&mut self, job: Job, test_opts: TestOpts) -> Result<()> {
        if let Some(time_scale) = test_opts.time_scale {
            let speedup = time_scale.speedup();
            if !speedup.is_finite() || speedup <= 0.0 {
                return Err(Error::InvalidSpeedup(speedup));
            }
            self.time_scale = time_scale;
            self.speedup = speedup;
        }
        self.job = job;
        self.budget = self.job.options.repeat;
        let reset_to = test_opts.start_time.unwrap_or_else(|| self.now());
        self.scheduled_at = reset_to;
        self.quantized_scheduled_at = reset_to;
        tracing::info!(
            job = self.job.display_name(),
            schedule = %self.job.schedule,
            "job reconfigured"
        );
        if self.job.options.run_once {
            self.fire();
        }
        Ok(())
    }

    fn fire(&mut self) {
        let actual_start = self.now();
        self.job.task.invoke(self.scheduled_at);
        let actual_end = self.now();
        tracing::debug!(
            job = self.job.display_name(),
            scheduled_at = %self.scheduled_at,
            "job fired"
        );
        self.stats.lock().unwrap().record(
            self.scheduled_at,
            self.quantized_scheduled_at,
            actual_start,
            actual_end,
        );
    }

    fn now(&self) -> DateTime<Utc> {
        self.time_scale
            .now(self.job.options.timezone)
            .with_timezone(&Utc)
    }
}
