#![forbid(unsafe_code)]

//! Periodic jobs.
//!
//! The monitor needs two fixed-rate timers: the tail highlight tick and the
//! summary poll. Both are [`Scheduler`] jobs whose body only posts an event
//! back to the event loop, so a job never touches monitor state itself.
//!
//! [`ThreadScheduler`] runs each job on its own named thread and sleeps on a
//! [`StopSignal`] between runs, so stopping is immediate. [`ManualScheduler`]
//! runs jobs only when told to advance, for deterministic tests.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Identifier of a scheduled job, unique within one scheduler.
pub type JobId = u64;

/// Job body. Returning `false` ends the job (e.g. its receiver is gone).
pub type Job = Box<dyn FnMut() -> bool + Send>;

/// Signal observed by a background thread to know when to exit.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl StopSignal {
    /// Create a connected (signal, trigger) pair.
    #[must_use]
    pub fn new() -> (Self, StopTrigger) {
        let inner = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Self {
            inner: inner.clone(),
        };
        (signal, StopTrigger { inner })
    }

    /// Check if the trigger has fired.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for either the stop signal or a timeout.
    ///
    /// Returns `true` if stopped, `false` if the full duration elapsed.
    /// Spurious wakeups are absorbed.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            return true;
        }

        let start = Instant::now();
        let mut remaining = duration;
        loop {
            let (guard, result) = cvar
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
            if *stopped {
                return true;
            }
            if result.timed_out() {
                return false;
            }
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return false;
            }
            remaining = duration - elapsed;
        }
    }
}

/// Owner side of a [`StopSignal`].
pub struct StopTrigger {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl std::fmt::Debug for StopTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StopTrigger")
    }
}

impl StopTrigger {
    /// Fire the signal and wake every waiter. Idempotent.
    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        cvar.notify_all();
    }
}

/// Starts and stops fixed-rate jobs.
pub trait Scheduler {
    /// Run `job` every `period` until stopped or until it returns `false`.
    /// The first run happens one period after start.
    fn start(&mut self, name: &str, period: Duration, job: Job) -> JobId;

    /// Stop one job. Returns `false` if it was not running.
    fn stop(&mut self, id: JobId) -> bool;

    /// Stop every job.
    fn stop_all(&mut self);

    /// Number of jobs still scheduled.
    fn active_count(&self) -> usize;
}

struct RunningJob {
    id: JobId,
    name: String,
    trigger: StopTrigger,
    thread: Option<thread::JoinHandle<()>>,
}

impl RunningJob {
    /// Stop the job and join its thread.
    fn stop(mut self) {
        self.trigger.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        self.trigger.stop();
    }
}

/// Deadline of the run after the one that was due at `due`.
///
/// Runs keep a fixed rate measured from the start. A run that overran one or
/// more whole periods skips the missed slots instead of firing in a burst.
fn next_due(due: Instant, period: Duration, now: Instant) -> Instant {
    let next = due + period;
    if next > now || period.is_zero() {
        return next;
    }
    let behind = now.duration_since(next).as_nanos() / period.as_nanos();
    let skipped = u32::try_from(behind + 1).unwrap_or(u32::MAX);
    next + period.saturating_mul(skipped)
}

/// One thread per job.
#[derive(Default)]
pub struct ThreadScheduler {
    jobs: Vec<RunningJob>,
    next_id: JobId,
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.jobs.iter().map(|j| j.name.as_str()).collect();
        f.debug_struct("ThreadScheduler").field("jobs", &names).finish()
    }
}

impl ThreadScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadScheduler {
    fn start(&mut self, name: &str, period: Duration, mut job: Job) -> JobId {
        self.next_id += 1;
        let id = self.next_id;
        let (signal, trigger) = StopSignal::new();
        let job_name = name.to_owned();

        let spawned = thread::Builder::new()
            .name(format!("tailmon-{name}"))
            .spawn(move || {
                let mut runs: u64 = 0;
                let mut due = Instant::now() + period;
                loop {
                    if signal.wait_timeout(due.saturating_duration_since(Instant::now())) {
                        break;
                    }
                    runs += 1;
                    due = next_due(due, period, Instant::now());
                    if !job() {
                        tracing::debug!(job = %job_name, runs, "job receiver closed");
                        break;
                    }
                }
                tracing::trace!(job = %job_name, runs, "job thread exiting");
            });

        match spawned {
            Ok(thread) => {
                tracing::debug!(
                    job = name,
                    id,
                    period_ms = period.as_millis() as u64,
                    "job started"
                );
                self.jobs.push(RunningJob {
                    id,
                    name: name.to_owned(),
                    trigger,
                    thread: Some(thread),
                });
            }
            Err(err) => {
                tracing::warn!(job = name, error = %err, "failed to spawn job thread");
            }
        }
        id
    }

    fn stop(&mut self, id: JobId) -> bool {
        let Some(slot) = self.jobs.iter().position(|j| j.id == id) else {
            return false;
        };
        let job = self.jobs.remove(slot);
        tracing::debug!(job = %job.name, id, "job stopped");
        job.stop();
        true
    }

    fn stop_all(&mut self) {
        for job in self.jobs.drain(..) {
            job.stop();
        }
    }

    fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.thread.as_ref().is_some_and(|t| !t.is_finished()))
            .count()
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

struct ManualJob {
    id: JobId,
    name: String,
    period: Duration,
    due: Duration,
    job: Job,
}

#[derive(Default)]
struct ManualState {
    elapsed: Duration,
    next_id: JobId,
    jobs: Vec<ManualJob>,
}

/// Scheduler driven by [`ManualScheduler::advance`]. Clones share jobs, so a
/// test can keep one handle after giving another to the monitor.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let names: Vec<&str> = state.jobs.iter().map(|j| j.name.as_str()).collect();
        f.debug_struct("ManualScheduler")
            .field("elapsed", &state.elapsed)
            .field("jobs", &names)
            .finish()
    }
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move time forward, running every job that comes due in order of due
    /// time. Returns the number of job runs.
    pub fn advance(&self, by: Duration) -> usize {
        let mut state = self.lock();
        let target = state.elapsed + by;
        let mut runs = 0;
        loop {
            let next = state
                .jobs
                .iter()
                .enumerate()
                .filter(|(_, j)| j.due <= target)
                .min_by_key(|(_, j)| (j.due, j.id))
                .map(|(slot, _)| slot);
            let Some(slot) = next else { break };

            let job = &mut state.jobs[slot];
            let due = job.due;
            job.due += job.period;
            let keep = (job.job)();
            runs += 1;
            state.elapsed = due;
            if !keep {
                state.jobs.remove(slot);
            }
        }
        state.elapsed = target;
        runs
    }

    /// Time advanced so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Names of scheduled jobs, in start order.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        self.lock().jobs.iter().map(|j| j.name.clone()).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn start(&mut self, name: &str, period: Duration, job: Job) -> JobId {
        let period = period.max(Duration::from_millis(1));
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        let due = state.elapsed + period;
        state.jobs.push(ManualJob {
            id,
            name: name.to_owned(),
            period,
            due,
            job,
        });
        id
    }

    fn stop(&mut self, id: JobId) -> bool {
        let mut state = self.lock();
        let before = state.jobs.len();
        state.jobs.retain(|j| j.id != id);
        state.jobs.len() != before
    }

    fn stop_all(&mut self) {
        self.lock().jobs.clear();
    }

    fn active_count(&self) -> usize {
        self.lock().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn counter() -> (Arc<AtomicUsize>, Job) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        (
            hits,
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
                true
            }),
        )
    }

    // ====================================================================
    // StopSignal
    // ====================================================================

    #[test]
    fn stop_signal_starts_false() {
        let (signal, _trigger) = StopSignal::new();
        assert!(!signal.is_stopped());
    }

    #[test]
    fn stop_signal_becomes_true_after_trigger() {
        let (signal, trigger) = StopSignal::new();
        trigger.stop();
        assert!(signal.is_stopped());
        assert!(signal.wait_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn stop_signal_wait_returns_false_on_timeout() {
        let (signal, _trigger) = StopSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn stop_wakes_a_blocked_waiter() {
        let (signal, trigger) = StopSignal::new();
        let waiter = thread::spawn(move || signal.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(10));
        let started = Instant::now();
        trigger.stop();
        assert!(waiter.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // ====================================================================
    // ThreadScheduler
    // ====================================================================

    #[test]
    fn thread_job_fires_repeatedly() {
        let mut scheduler = ThreadScheduler::new();
        let (hits, job) = counter();
        scheduler.start("tick", Duration::from_millis(5), job);
        thread::sleep(Duration::from_millis(60));
        scheduler.stop_all();
        assert!(hits.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn thread_job_stops_on_request() {
        let mut scheduler = ThreadScheduler::new();
        let (hits, job) = counter();
        let id = scheduler.start("tick", Duration::from_millis(5), job);
        thread::sleep(Duration::from_millis(20));
        assert!(scheduler.stop(id));
        assert!(!scheduler.stop(id));
        let frozen = hits.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(hits.load(Ordering::SeqCst), frozen);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn next_due_keeps_a_fixed_rate() {
        let start = Instant::now();
        let period = Duration::from_millis(100);
        let due = start + period;
        // The run took 30ms; the next one stays on the 100ms grid.
        let now = due + Duration::from_millis(30);
        assert_eq!(next_due(due, period, now), start + period * 2);
    }

    #[test]
    fn next_due_skips_overrun_periods() {
        let start = Instant::now();
        let period = Duration::from_millis(100);
        let due = start + period;
        let now = due + Duration::from_millis(250);
        assert_eq!(next_due(due, period, now), start + period * 4);
        let exact = due + period;
        assert_eq!(next_due(due, period, exact), start + period * 3);
    }

    #[test]
    fn slow_job_still_runs_at_the_period_rate() {
        let mut scheduler = ThreadScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        scheduler.start(
            "slow",
            Duration::from_millis(40),
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(25));
                true
            }),
        );
        thread::sleep(Duration::from_millis(430));
        scheduler.stop_all();
        // Fixed delay would give about 430 / 65 = 6 runs; fixed rate gives 10.
        assert!(hits.load(Ordering::SeqCst) >= 8, "{hits:?}");
    }

    #[test]
    fn thread_job_ends_when_receiver_drops() {
        let mut scheduler = ThreadScheduler::new();
        let (tx, rx) = mpsc::channel::<()>();
        scheduler.start("poll", Duration::from_millis(2), Box::new(move || tx.send(()).is_ok()));
        drop(rx);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(scheduler.active_count(), 0);
    }

    // ====================================================================
    // ManualScheduler
    // ====================================================================

    #[test]
    fn manual_job_fires_once_per_period() {
        let mut scheduler = ManualScheduler::new();
        let (hits, job) = counter();
        scheduler.start("tick", Duration::from_millis(100), job);

        assert_eq!(scheduler.advance(Duration::from_millis(99)), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(scheduler.advance(Duration::from_millis(350)), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.elapsed(), Duration::from_millis(450));
    }

    #[test]
    fn manual_jobs_interleave_by_due_time() {
        let mut scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, period) in [("fast", 100), ("slow", 250)] {
            let order = order.clone();
            scheduler.start(
                name,
                Duration::from_millis(period),
                Box::new(move || {
                    order.lock().unwrap().push(name);
                    true
                }),
            );
        }
        scheduler.advance(Duration::from_millis(500));
        assert_eq!(
            *order.lock().unwrap(),
            vec!["fast", "fast", "slow", "fast", "fast", "fast", "slow"]
        );
    }

    #[test]
    fn manual_job_returning_false_is_removed() {
        let mut scheduler = ManualScheduler::new();
        scheduler.start("once", Duration::from_millis(10), Box::new(|| false));
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.advance(Duration::from_millis(100)), 1);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn manual_clones_share_jobs() {
        let mut scheduler = ManualScheduler::new();
        let driver = scheduler.clone();
        let (hits, job) = counter();
        let id = scheduler.start("tick", Duration::from_millis(10), job);
        driver.advance(Duration::from_millis(30));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(scheduler.stop(id));
        assert!(driver.job_names().is_empty());
    }
}
