//! End-to-end tests driving real job activities.
//!
//! Delay-based lifecycle tests run under `start_paused = true` so tokio
//! auto-advances the timers and the tests finish instantly. Virtual-time
//! tests (`VirtualTimeScale`) must run against the real clock, since the
//! scale converts real elapsed time into logical time; they keep their
//! speedups high enough that each test stays in the millisecond range.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tickmill::mocks::{Recorder, VirtualTimeScale};
use tickmill::{
    DelayUnit, Error, Job, JobHandle, Repeat, RunOpts, Schedule, Scheduler, Task, TestOpts,
};

fn counter() -> (Arc<AtomicUsize>, Task) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let task = Task::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    (count, task)
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

// ── one-shot lifecycle ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn run_in_fires_exactly_once() {
    let scheduler = Scheduler::new();
    let (count, task) = counter();

    let handle = scheduler.run_in(task, 50, RunOpts::default()).unwrap();
    handle.closed().await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(handle.is_terminated());
    // The activity is gone, introspection is no longer available.
    assert!(matches!(handle.next_schedule().await, Err(Error::Terminated)));
}

#[tokio::test(start_paused = true)]
async fn repeat_count_bounds_the_number_of_firings() {
    let scheduler = Scheduler::new();
    let (count, task) = counter();

    let opts = RunOpts { repeat: Some(Repeat::Times(3)), ..RunOpts::default() };
    let handle = scheduler
        .run_in(task, (10, DelayUnit::Millis), opts)
        .unwrap();
    handle.closed().await;

    assert_eq!(count.load(Ordering::SeqCst), 3);
    let stats = handle.stats();
    assert_eq!(stats.scheduling_delay.count, 3);
    assert_eq!(stats.quantization_error.count, 3);
    assert_eq!(stats.execution_time.count, 3);
}

#[tokio::test(start_paused = true)]
async fn run_once_fires_before_the_schedule_loop() {
    let scheduler = Scheduler::new();
    let (count, task) = counter();

    let opts = RunOpts {
        run_once: true,
        repeat: Some(Repeat::Times(2)),
        ..RunOpts::default()
    };
    let handle = scheduler.run_in(task, 20, opts).unwrap();
    handle.closed().await;

    // One bootstrap fire plus the two scheduled ones.
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(handle.stats().execution_time.count, 3);
}

// ── cancellation ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancel_before_the_fire_prevents_it() {
    let scheduler = Scheduler::new();
    let (count, task) = counter();

    let handle = scheduler
        .run_in(task, (10, DelayUnit::Seconds), RunOpts::default())
        .unwrap();
    handle.cancel();
    handle.cancel(); // cancelling twice is fine
    handle.closed().await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(handle.stats().execution_time.count, 0);
    handle.cancel(); // and so is cancelling a terminated activity
}

#[tokio::test(start_paused = true)]
async fn cancel_from_inside_the_task_applies_after_it_returns() {
    let scheduler = Scheduler::new();
    let slot: Arc<Mutex<Option<JobHandle>>> = Arc::new(Mutex::new(None));
    let count = Arc::new(AtomicUsize::new(0));

    let slot2 = Arc::clone(&slot);
    let c = Arc::clone(&count);
    let task = Task::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = slot2.lock().unwrap().as_ref() {
            handle.cancel();
        }
    });

    let opts = RunOpts { repeat: Some(Repeat::Forever), ..RunOpts::default() };
    let handle = scheduler.run_in(task, 10, opts).unwrap();
    *slot.lock().unwrap() = Some(handle.clone());
    handle.closed().await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

// ── scheduled instants ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn task_receives_the_logical_instants_of_its_slots() {
    let scheduler = Scheduler::new();
    let recorder = Recorder::new();

    let opts = RunOpts {
        repeat: Some(Repeat::Times(3)),
        start_time: Some(t0()),
        ..RunOpts::default()
    };
    let handle = scheduler
        .run_in(recorder.task(), (100, DelayUnit::Millis), opts)
        .unwrap();
    handle.closed().await;

    // The logical chain advances by the raw delay from the seed instant,
    // independent of when the timers actually went off.
    let expected: Vec<_> = (1..=3)
        .map(|i| t0() + chrono::Duration::milliseconds(100 * i))
        .collect();
    assert_eq!(recorder.fires(), expected);
}

#[tokio::test(start_paused = true)]
async fn next_schedule_reports_the_armed_firing() {
    let scheduler = Scheduler::new();
    let opts = RunOpts {
        repeat: Some(Repeat::Forever),
        start_time: Some(t0()),
        ..RunOpts::default()
    };
    let handle = scheduler
        .run_in(Task::new(|| {}), (5, DelayUnit::Seconds), opts)
        .unwrap();

    let info = handle.next_schedule().await.unwrap();
    assert_eq!(info.scheduled_at, t0() + chrono::Duration::seconds(5));
    assert_eq!(info.delay_ms, 5_000);

    handle.cancel();
    handle.closed().await;
}

// ── virtual time ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn speedup_compresses_real_delays_but_not_logical_time() {
    let scheduler = Scheduler::new();
    let recorder = Recorder::new();
    // One logical hour per real millisecond.
    let scale = Arc::new(VirtualTimeScale::new(t0(), 3_600_000.0));

    let opts = RunOpts {
        repeat: Some(Repeat::Times(3)),
        start_time: Some(t0()),
        time_scale: Some(scale),
        ..RunOpts::default()
    };
    let handle = scheduler
        .run_in(recorder.task(), (1, DelayUnit::Hours), opts)
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle.closed())
        .await
        .expect("three compressed hours should elapse in milliseconds");

    let expected: Vec<_> = (1..=3).map(|i| t0() + chrono::Duration::hours(i)).collect();
    assert_eq!(recorder.fires(), expected);
}

#[tokio::test]
async fn daily_cron_fires_at_the_literal_slot_under_speedup() {
    let scheduler = Scheduler::new();
    let recorder = Recorder::new();
    // One logical day per real second.
    let scale = Arc::new(VirtualTimeScale::new(t0(), 86_400.0));

    let opts = RunOpts { time_scale: Some(scale), ..RunOpts::default() };
    let handle = scheduler
        .run_every(recorder.task(), "0 10 * * *", opts)
        .unwrap();

    // 10:00 logical is ~417 real ms away; leave room for jitter.
    tokio::time::sleep(Duration::from_millis(900)).await;
    handle.cancel();

    let fires = recorder.fires();
    assert!(!fires.is_empty(), "no fire within the window");
    assert_eq!(fires[0], Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap());
}

#[tokio::test]
async fn extended_expression_fires_once_then_stops_quietly() {
    let scheduler = Scheduler::new();
    let recorder = Recorder::new();
    let start = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 0).unwrap();
    let scale = Arc::new(VirtualTimeScale::new(start, 1_000.0));

    let opts = RunOpts { time_scale: Some(scale), ..RunOpts::default() };
    let handle = scheduler
        .run_every(recorder.task(), "50 59 23 31 12 * 1999", opts)
        .unwrap();

    // The schedule runs dry after its single match; the activity ends on
    // its own, and that is a normal termination.
    tokio::time::timeout(Duration::from_secs(5), handle.closed())
        .await
        .expect("activity should stop once the schedule is exhausted");

    assert_eq!(
        recorder.fires(),
        vec![Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 50).unwrap()]
    );
    assert_eq!(handle.stats().execution_time.count, 1);
}

// ── reconfigure ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconfigure_swaps_descriptor_and_reruns_bootstrap() {
    let scheduler = Scheduler::new();
    let (old_count, old_task) = counter();
    let (new_count, new_task) = counter();

    let opts = RunOpts {
        name: Some("worker".to_string()),
        repeat: Some(Repeat::Forever),
        ..RunOpts::default()
    };
    let handle = scheduler
        .run_in(old_task, (1, DelayUnit::Hours), opts)
        .unwrap();
    let info = handle.next_schedule().await.unwrap();
    assert_eq!(info.delay_ms, 3_600_000);

    let mut job = Job::new(new_task, Schedule::millis(50));
    job.name = Some("worker".to_string());
    job.options.repeat = Repeat::Times(2);
    job.options.run_once = true;
    scheduler.update_job(job, TestOpts::default()).await.unwrap();
    handle.closed().await;

    // The hour timer never elapsed; the replacement descriptor fired its
    // bootstrap immediately plus its two budgeted firings.
    assert_eq!(old_count.load(Ordering::SeqCst), 0);
    assert_eq!(new_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn reconfigure_to_an_exhausted_schedule_reports_and_terminates() {
    let scheduler = Scheduler::new();
    let opts = RunOpts {
        name: Some("doomed".to_string()),
        repeat: Some(Repeat::Forever),
        ..RunOpts::default()
    };
    let handle = scheduler
        .run_in(Task::new(|| {}), (1, DelayUnit::Hours), opts)
        .unwrap();

    let mut job = Job::new(Task::new(|| {}), Schedule::cron("50 59 23 31 12 * 1999").unwrap());
    job.name = Some("doomed".to_string());

    let err = scheduler
        .update_job(job, TestOpts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ScheduleExhausted));

    tokio::time::timeout(Duration::from_secs(1), handle.closed())
        .await
        .expect("activity should terminate after the failed reschedule");
    assert!(handle.is_terminated());
}
