//! The memoization cell behind `Task::memoize`.
//!
//! State machine: `Unstarted` → `Pending` → `Resolved`, transitions
//! forward only. The first run to reach the cell becomes the initiator:
//! it takes the underlying program out, registers its own continuation
//! as the first waiter, and schedules the evaluation under a scope
//! owned by the cell. Every later run that arrives while the evaluation is in
//! flight registers a waiter. Resolution stores the attempt and drains
//! the waiter list; the cached attempt then serves all later runs
//! synchronously.
//!
//! Canceling a waiting run only detaches that run's waiter; the
//! evaluation keeps going for the remaining waiters, and an evaluation
//! that loses every waiter still completes and caches its result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::raw::{BindFn, RawAttempt, RawCallback, RawTask};
use super::run_loop;
use crate::cancel::{FnCancelable, StackedCancelable};
use crate::scheduler::SchedulerRef;

type Waiter = Box<dyn FnOnce(RawAttempt) + Send>;

enum MemoState {
    Unstarted(RawTask),
    Pending(Vec<(u64, Waiter)>),
    Resolved(RawAttempt),
}

/// What `enter` decided while holding the state lock.
enum Entry {
    Resume(RawAttempt),
    Parked,
    Evaluate(RawTask),
}

/// Shared memoization cell.
pub(crate) struct MemoCell {
    state: Mutex<MemoState>,
    next_waiter: AtomicU64,
}

impl MemoCell {
    pub(crate) fn new(underlying: RawTask) -> Self {
        Self {
            state: Mutex::new(MemoState::Unstarted(underlying)),
            next_waiter: AtomicU64::new(0),
        }
    }

    /// Returns the cached attempt when the cell has resolved.
    pub(crate) fn try_resolved(&self) -> Option<RawAttempt> {
        match &*self.state.lock() {
            MemoState::Resolved(attempt) => Some(attempt.clone()),
            _ => None,
        }
    }

    /// Returns true once an evaluation has been started.
    pub(crate) fn is_started(&self) -> bool {
        !matches!(&*self.state.lock(), MemoState::Unstarted(_))
    }

    /// Joins a run to the cell: resumes synchronously when resolved,
    /// registers a waiter when pending, starts the evaluation when
    /// unstarted.
    pub(crate) fn enter(
        self: Arc<Self>,
        scheduler: SchedulerRef,
        conn: StackedCancelable,
        cb: RawCallback,
        binds: Vec<BindFn>,
    ) {
        let waiter_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let mut resume = Some(make_resume(scheduler.clone(), conn.clone(), cb, binds));

        let action = {
            let mut state = self.state.lock();
            match &mut *state {
                MemoState::Resolved(attempt) => Entry::Resume(attempt.clone()),
                MemoState::Pending(waiters) => {
                    let parked = park(resume.take().expect("resume consumed"), conn.clone());
                    waiters.push((waiter_id, parked));
                    Entry::Parked
                }
                MemoState::Unstarted(_) => {
                    let parked = park(resume.take().expect("resume consumed"), conn.clone());
                    let underlying = match core::mem::replace(
                        &mut *state,
                        MemoState::Pending(vec![(waiter_id, parked)]),
                    ) {
                        MemoState::Unstarted(underlying) => underlying,
                        _ => unreachable!("state changed under the lock"),
                    };
                    Entry::Evaluate(underlying)
                }
            }
        };

        match action {
            Entry::Resume(attempt) => {
                // Resolved between the run loop's fast path and here;
                // forward synchronously, nothing was parked.
                if let Some(resume) = resume {
                    resume(attempt);
                }
            }
            Entry::Parked => {
                attach_detach_token(&self, waiter_id, &conn);
            }
            Entry::Evaluate(underlying) => {
                attach_detach_token(&self, waiter_id, &conn);
                crate::tracing_compat::trace!("starting memoized evaluation");
                let cell = self.clone();
                let eval_conn = StackedCancelable::with_reporter(scheduler.clone());
                let eval_scheduler = scheduler.clone();
                // The evaluation is always scheduled, never run on the
                // entering thread; `fork` relies on this when it leaves
                // an unstarted memoized task unchanged.
                scheduler.execute(Box::new(move || {
                    let on_done = RawCallback::new(move |attempt| cell.resolve(attempt));
                    run_loop::start(underlying, eval_scheduler, eval_conn, on_done);
                }));
            }
        }
    }

    /// Stores the attempt and drains every parked waiter.
    fn resolve(&self, attempt: RawAttempt) {
        let waiters = {
            let mut state = self.state.lock();
            match core::mem::replace(&mut *state, MemoState::Resolved(attempt.clone())) {
                MemoState::Pending(waiters) => waiters,
                MemoState::Resolved(previous) => {
                    // A second resolution is a protocol violation;
                    // keep the first result.
                    *state = MemoState::Resolved(previous);
                    return;
                }
                MemoState::Unstarted(_) => unreachable!("resolved before started"),
            }
        };
        crate::tracing_compat::trace!(
            "memoized evaluation resolved; waking {} waiters",
            waiters.len()
        );
        for (_, waiter) in waiters {
            waiter(attempt.clone());
        }
    }
}

impl core::fmt::Debug for MemoCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match &*self.state.lock() {
            MemoState::Unstarted(_) => "unstarted",
            MemoState::Pending(_) => "pending",
            MemoState::Resolved(_) => "resolved",
        };
        f.debug_struct("MemoCell").field("state", &state).finish()
    }
}

/// Parks a token in the caller's scope that removes this waiter if the
/// caller is canceled while the evaluation is in flight.
fn attach_detach_token(cell: &Arc<MemoCell>, waiter_id: u64, conn: &StackedCancelable) {
    let cell = cell.clone();
    conn.push(FnCancelable::arc(move || {
        if let MemoState::Pending(waiters) = &mut *cell.state.lock() {
            waiters.retain(|(id, _)| *id != waiter_id);
        }
    }));
}

/// Builds the continuation that re-enters the caller's run loop with
/// the memoized attempt.
fn make_resume(
    scheduler: SchedulerRef,
    conn: StackedCancelable,
    cb: RawCallback,
    binds: Vec<BindFn>,
) -> Waiter {
    Box::new(move |attempt: RawAttempt| match attempt {
        Ok(value) => {
            run_loop::execute(RawTask::Pure(value), scheduler, conn, cb, binds, 1);
        }
        Err(fault) => cb.on_error(fault),
    })
}

/// Wraps a parked continuation so that its detach token is retired
/// before the run resumes. The token is on top of the run's scope for
/// the whole wait: the run pushes nothing else while suspended.
fn park(resume: Waiter, conn: StackedCancelable) -> Waiter {
    Box::new(move |attempt| {
        let _ = conn.pop();
        resume(attempt);
    })
}
