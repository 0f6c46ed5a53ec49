//! Parallel pairing: run two tasks at once, combine both results.
//!
//! [`map_both`] starts both sides asynchronously under their own child
//! scopes. An atomic arrival cell coordinates the two completions:
//! whichever side lands first parks its value, the second arrival pops
//! the parent scope and applies the combining function. The function
//! receives the values in program order (first task's value first)
//! regardless of arrival order.
//!
//! On the first failure the sibling's scope is canceled and the failure
//! is delivered; a failure arriving after the pair has stopped goes to
//! [`Scheduler::report_failure`](crate::Scheduler::report_failure).
//!
//! [`sequence`] folds a vector of tasks through the same pairing,
//! preserving positional order of the results no matter how completion
//! times interleave.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::Callback;
use crate::cancel::{CancelableRef, CompositeCancelable, StackedCancelable};
use crate::error::Fault;
use crate::scheduler::SchedulerRef;
use crate::task::{start_with_conn, Task, Value};

enum BothState<A, B> {
    Neither,
    GotFirst(A),
    GotSecond(B),
    Stopped,
}

/// Runs `fa` and `fb` in parallel and combines their successes with
/// `f`, which receives the values positionally.
pub fn map_both<A, B, C, F>(fa: Task<A>, fb: Task<B>, f: F) -> Task<C>
where
    A: Value,
    B: Value,
    C: Value,
    F: Fn(A, B) -> C + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Task::unsafe_create(move |scheduler, conn, cb| {
        let state = Arc::new(Mutex::new(BothState::<A, B>::Neither));
        let sink = Arc::new(Mutex::new(Some(cb)));

        let first_conn = StackedCancelable::with_reporter(scheduler.clone());
        let second_conn = StackedCancelable::with_reporter(scheduler.clone());
        conn.push(CompositeCancelable::arc(vec![
            Arc::new(first_conn.clone()) as CancelableRef,
            Arc::new(second_conn.clone()) as CancelableRef,
        ]));

        spawn_side(
            scheduler,
            &first_conn,
            fa.clone(),
            on_first(state.clone(), sink.clone(), conn.clone(), second_conn.clone(), scheduler.clone(), f.clone()),
        );
        spawn_side(
            scheduler,
            &second_conn,
            fb.clone(),
            on_second(state, sink, conn.clone(), first_conn, scheduler.clone(), f.clone()),
        );
    })
}

/// Runs the tasks in parallel, collecting their successes in positional
/// order. An empty input completes immediately with an empty vector.
pub fn sequence<A: Value>(tasks: Vec<Task<A>>) -> Task<Vec<A>> {
    tasks.into_iter().fold(Task::now(Vec::new()), |acc, task| {
        map_both(acc, task, |mut items, item| {
            items.push(item);
            items
        })
    })
}

type Sink<C> = Arc<Mutex<Option<Callback<C>>>>;

fn spawn_side<A: Value>(
    scheduler: &SchedulerRef,
    conn: &StackedCancelable,
    task: Task<A>,
    cb: Callback<A>,
) {
    let child_scheduler = scheduler.clone();
    let child_conn = conn.clone();
    scheduler.execute(Box::new(move || {
        if child_conn.is_canceled() {
            return;
        }
        start_with_conn(task, &child_scheduler, &child_conn, cb);
    }));
}

fn on_first<A, B, C, F>(
    state: Arc<Mutex<BothState<A, B>>>,
    sink: Sink<C>,
    parent: StackedCancelable,
    sibling: StackedCancelable,
    scheduler: SchedulerRef,
    f: Arc<F>,
) -> Callback<A>
where
    A: Value,
    B: Value,
    C: Value,
    F: Fn(A, B) -> C + Send + Sync + 'static,
{
    Callback::new(move |outcome| match outcome {
        Ok(a) => {
            let ready = {
                let mut state = state.lock();
                match core::mem::replace(&mut *state, BothState::Stopped) {
                    BothState::Neither => {
                        *state = BothState::GotFirst(a);
                        None
                    }
                    BothState::GotSecond(b) => Some((a, b)),
                    BothState::GotFirst(_) | BothState::Stopped => None,
                }
            };
            if let Some((a, b)) = ready {
                deliver(&sink, &parent, &f, a, b);
            }
        }
        Err(fault) => fail_side(&state, &sink, &parent, &sibling, &scheduler, fault),
    })
}

fn on_second<A, B, C, F>(
    state: Arc<Mutex<BothState<A, B>>>,
    sink: Sink<C>,
    parent: StackedCancelable,
    sibling: StackedCancelable,
    scheduler: SchedulerRef,
    f: Arc<F>,
) -> Callback<B>
where
    A: Value,
    B: Value,
    C: Value,
    F: Fn(A, B) -> C + Send + Sync + 'static,
{
    Callback::new(move |outcome| match outcome {
        Ok(b) => {
            let ready = {
                let mut state = state.lock();
                match core::mem::replace(&mut *state, BothState::Stopped) {
                    BothState::Neither => {
                        *state = BothState::GotSecond(b);
                        None
                    }
                    BothState::GotFirst(a) => Some((a, b)),
                    BothState::GotSecond(_) | BothState::Stopped => None,
                }
            };
            if let Some((a, b)) = ready {
                deliver(&sink, &parent, &f, a, b);
            }
        }
        Err(fault) => fail_side(&state, &sink, &parent, &sibling, &scheduler, fault),
    })
}

/// Second arrival: retire the composite token, apply `f`, deliver.
fn deliver<A, B, C, F>(
    sink: &Sink<C>,
    parent: &StackedCancelable,
    f: &Arc<F>,
    a: A,
    b: B,
) where
    A: Value,
    B: Value,
    C: Value,
    F: Fn(A, B) -> C + Send + Sync + 'static,
{
    let Some(cb) = sink.lock().take() else { return };
    let _ = parent.pop();
    match catch_unwind(AssertUnwindSafe(|| f(a, b))) {
        Ok(value) => cb.on_success(value),
        Err(payload) => cb.on_error(Fault::from_panic(payload)),
    }
}

/// A side failed: stop the pair, cancel the sibling, deliver the fault.
/// Late failures (after the pair stopped) go to the failure sink.
fn fail_side<A, B, C>(
    state: &Arc<Mutex<BothState<A, B>>>,
    sink: &Sink<C>,
    parent: &StackedCancelable,
    sibling: &StackedCancelable,
    scheduler: &SchedulerRef,
    fault: Fault,
) where
    A: Value,
    B: Value,
    C: Value,
{
    let already_stopped = {
        let mut state = state.lock();
        matches!(
            core::mem::replace(&mut *state, BothState::Stopped),
            BothState::Stopped
        )
    };
    if already_stopped {
        scheduler.report_failure(fault);
        return;
    }
    let Some(cb) = sink.lock().take() else {
        scheduler.report_failure(fault);
        return;
    };
    sibling.cancel();
    let _ = parent.pop();
    cb.on_error(fault);
}
