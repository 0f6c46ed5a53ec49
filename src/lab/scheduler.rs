//! The deterministic virtual-time scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::{CancelableRef, FnCancelable};
use crate::error::Fault;
use crate::scheduler::{ExecutionModel, Runnable, Scheduler};

/// Fully-ordered queue key: due time, then submission order.
type TaskKey = (Duration, u64);

struct LabState {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<TaskKey, Runnable>,
    failures: Vec<Fault>,
}

/// A deterministic scheduler driven by virtual time.
///
/// Nothing runs until the clock is driven: `execute` enqueues at the
/// current instant, `schedule_once` enqueues in the future, and
/// [`tick`](TestScheduler::tick) / [`advance`](TestScheduler::advance)
/// drain the queue in `(due, submission)` order. Runnables that enqueue
/// more work at the same instant are drained in the same call, so a
/// single `tick()` runs a whole synchronous cascade.
///
/// Canceling a timer removes it from the queue outright;
/// [`pending_count`](TestScheduler::pending_count) observes the
/// removal. Failures reported through the scheduler are captured for
/// inspection via
/// [`reported_failures`](TestScheduler::reported_failures).
#[derive(Clone)]
pub struct TestScheduler {
    state: Arc<Mutex<LabState>>,
    model: ExecutionModel,
}

impl TestScheduler {
    /// Creates a scheduler at virtual time zero with the default
    /// execution model.
    #[must_use]
    pub fn new() -> Self {
        Self::with_model(ExecutionModel::default())
    }

    /// Creates a scheduler with the given execution model.
    #[must_use]
    pub fn with_model(model: ExecutionModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(LabState {
                now: Duration::ZERO,
                next_seq: 0,
                queue: BTreeMap::new(),
                failures: Vec::new(),
            })),
            model,
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Returns the number of queued runnables (including pending
    /// timers).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns the failures reported so far.
    #[must_use]
    pub fn reported_failures(&self) -> Vec<Fault> {
        self.state.lock().failures.clone()
    }

    /// Runs everything due at the current instant, including work those
    /// runnables enqueue at the same instant.
    pub fn tick(&self) {
        self.drain_due_through(self.now());
    }

    /// Advances virtual time by `delta`, running everything that falls
    /// due along the way in order.
    pub fn advance(&self, delta: Duration) {
        let target = self.now() + delta;
        self.advance_to(target);
    }

    /// Advances virtual time to `target`, running everything that falls
    /// due along the way in order.
    pub fn advance_to(&self, target: Duration) {
        self.drain_due_through(target);
        let mut state = self.state.lock();
        if state.now < target {
            state.now = target;
        }
    }

    /// Runs ticks until the immediate queue is empty.
    ///
    /// Pending timers strictly in the future are left alone; use
    /// [`advance`](TestScheduler::advance) to reach them.
    pub fn run_until_quiescent(&self) {
        self.tick();
    }

    /// Pops and runs queued runnables with `due <= target`, advancing
    /// the clock to each runnable's due time. The lock is never held
    /// while a runnable executes, so runnables may re-enter the
    /// scheduler freely.
    fn drain_due_through(&self, target: Duration) {
        loop {
            let runnable = {
                let mut state = self.state.lock();
                let Some((&key, _)) = state.queue.first_key_value() else {
                    return;
                };
                let (due, _) = key;
                if due > target {
                    return;
                }
                if state.now < due {
                    state.now = due;
                }
                state.queue.remove(&key).expect("entry vanished")
            };
            runnable();
        }
    }

    fn enqueue(&self, due: Duration, runnable: Runnable) -> TaskKey {
        let mut state = self.state.lock();
        let key = (due, state.next_seq);
        state.next_seq += 1;
        state.queue.insert(key, runnable);
        key
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TestScheduler {
    fn execute(&self, runnable: Runnable) {
        let now = self.now();
        let _ = self.enqueue(now, runnable);
    }

    fn schedule_once(&self, delay: Duration, runnable: Runnable) -> CancelableRef {
        let due = self.now() + delay;
        let key = self.enqueue(due, runnable);
        let state = self.state.clone();
        FnCancelable::arc(move || {
            state.lock().queue.remove(&key);
        })
    }

    fn report_failure(&self, fault: Fault) {
        self.state.lock().failures.push(fault);
    }

    fn execution_model(&self) -> ExecutionModel {
        self.model
    }
}

impl core::fmt::Debug for TestScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TestScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn execute_runs_on_tick_in_submission_order() {
        let scheduler = TestScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            scheduler.execute(Box::new(move || order.lock().push(i)));
        }
        assert_eq!(scheduler.pending_count(), 3);
        scheduler.tick();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn tick_drains_same_instant_cascades() {
        let scheduler = TestScheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let inner_ran = ran.clone();
        let inner_scheduler = scheduler.clone();
        scheduler.execute(Box::new(move || {
            inner_scheduler.execute(Box::new(move || {
                inner_ran.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        scheduler.tick();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timers_fire_at_their_due_time() {
        let scheduler = TestScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _ = scheduler.schedule_once(
            Duration::from_millis(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.advance(Duration::from_millis(5));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        scheduler.advance(Duration::from_millis(5));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.now(), Duration::from_millis(10));
    }

    #[test]
    fn canceled_timer_is_removed_from_the_queue() {
        let scheduler = TestScheduler::new();
        let token = scheduler.schedule_once(Duration::from_millis(10), Box::new(|| {}));
        assert_eq!(scheduler.pending_count(), 1);
        token.cancel();
        assert_eq!(scheduler.pending_count(), 0);
        scheduler.advance(Duration::from_millis(20));
        assert_eq!(scheduler.now(), Duration::from_millis(20));
    }

    #[test]
    fn failures_are_captured() {
        let scheduler = TestScheduler::new();
        scheduler.report_failure(Fault::failed("stray"));
        let failures = scheduler.reported_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].to_string(), "Failed: stray");
    }
}
