//! The deferred-effect type and its run entry points.
//!
//! A [`Task<A>`] is an immutable, lazy description of a computation
//! that, when run against a [`Scheduler`](crate::Scheduler), eventually
//! produces either a success of `A` or a [`Fault`]. Construction is
//! pure: nothing executes until one of the run entry points is called.
//!
//! ```rust
//! use std::sync::Arc;
//! use deft::{lab::TestScheduler, SchedulerRef, Task};
//!
//! let scheduler = TestScheduler::new();
//! let sched: SchedulerRef = Arc::new(scheduler.clone());
//!
//! let program = Task::now(2)
//!     .flat_map(|x| Task::now(x * 3))
//!     .map(|x| x + 1);
//!
//! let future = program.run_as_future(&sched);
//! scheduler.run_until_quiescent();
//! assert_eq!(future.value().unwrap().unwrap(), 7);
//! ```
//!
//! Tasks are cheap to clone and clones share interior caches: running a
//! program twice means cloning the handle, and an
//! [`eval_once`](Task::eval_once) or [`memoize`](Task::memoize) cell is
//! shared across all clones.
//!
//! # Values
//!
//! Payloads satisfy the [`Value`] bound (`Clone + Send + Sync`):
//! programs are re-runnable and memoized results fan out to many
//! waiters, so values must be duplicable. Wrap non-clonable data in an
//! `Arc`.
//!
//! # Errors
//!
//! Failures short-circuit: binds only ever see successes. A panic
//! inside a thunk or bind function is caught and reified as a
//! [`Fault`]; recovery goes through [`materialize`](Task::materialize)
//! or [`on_error_handle_with`](Task::on_error_handle_with).

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::callback::Callback;
use crate::cancel::{AssignableCancelable, CancelableRef, StackedCancelable};
use crate::error::Fault;
use crate::future::CancelableFuture;
use crate::scheduler::SchedulerRef;

mod eval_once;
mod memoize;
pub(crate) mod raw;
pub(crate) mod run_loop;
mod sync_run;

use eval_once::OnceEval;
use memoize::MemoCell;
use raw::{erase, extract, BindFn, ErasedValue, NodeFn, RawAttempt, RawCallback, RawTask, RegisterFn, ThunkFn};
use sync_run::TrySync;

/// Marker for payloads a task can carry. Blanket-implemented for every
/// `Clone + Send + Sync + 'static` type.
pub trait Value: Any + Clone + Send + Sync {}

impl<T: Any + Clone + Send + Sync> Value for T {}

/// A resolved program: a success of `A` or a fault.
pub type Attempt<A> = Result<A, Fault>;

/// Outcome of [`Task::run_sync_maybe`]: a value produced synchronously,
/// or a future for a run that crossed an asynchronous boundary.
pub enum SyncMaybe<A> {
    /// The program completed on the calling thread.
    Value(A),
    /// The program suspended (or failed); await the future.
    Future(CancelableFuture<A>),
}

/// An immutable, lazy, possibly-asynchronous computation.
pub struct Task<A> {
    raw: RawTask,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for Task<A> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A> core::fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task").field("node", &self.raw.kind()).finish()
    }
}

impl<A: Value> Task<A> {
    pub(crate) fn from_raw(raw: RawTask) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    // === Builders ===

    /// A resolved successful task.
    #[must_use]
    pub fn now(value: A) -> Self {
        Self::from_raw(RawTask::Pure(erase(value)))
    }

    /// A resolved failed task.
    #[must_use]
    pub fn fail(fault: Fault) -> Self {
        Self::from_raw(RawTask::Faulted(fault))
    }

    /// A lazy task re-evaluating `thunk` on every run.
    ///
    /// A panic inside the thunk is caught per run and surfaces as a
    /// fault of that run.
    pub fn eval(thunk: impl Fn() -> A + Send + Sync + 'static) -> Self {
        let thunk: Arc<ThunkFn> = Arc::new(move || erase(thunk()));
        Self::from_raw(RawTask::Always(thunk))
    }

    /// A lazy task evaluating `thunk` at most once across all runs and
    /// clones; the first outcome (success or fault) is cached.
    pub fn eval_once(thunk: impl Fn() -> A + Send + Sync + 'static) -> Self {
        let thunk: Arc<ThunkFn> = Arc::new(move || erase(thunk()));
        Self::from_raw(RawTask::Once(Arc::new(OnceEval::new(thunk))))
    }

    /// Defers construction of the task itself until the run reaches it.
    pub fn defer(factory: impl Fn() -> Self + Send + Sync + 'static) -> Self {
        let thunk: Arc<NodeFn> = Arc::new(move || factory().raw);
        Self::from_raw(RawTask::Suspend(thunk))
    }

    /// An asynchronous task with a forced boundary: `register` itself
    /// runs through [`Scheduler::execute`](crate::Scheduler::execute),
    /// never on the caller's thread.
    ///
    /// The registration receives the scheduler, the run's cancellation
    /// scope, and a one-shot callback; it may complete the callback at
    /// most once, from any thread.
    pub fn create(
        register: impl Fn(&SchedulerRef, &StackedCancelable, Callback<A>) + Send + Sync + 'static,
    ) -> Self {
        let register = Arc::new(register);
        let raw_register: RegisterFn = Arc::new(move |scheduler, conn, cb| {
            let register = register.clone();
            let inner_scheduler = scheduler.clone();
            let inner_conn = conn.clone();
            scheduler.execute(Box::new(move || {
                if inner_conn.is_canceled() {
                    return;
                }
                register(&inner_scheduler, &inner_conn, typed_callback(cb));
            }));
        });
        Self::from_raw(RawTask::Register(raw_register))
    }

    /// An asynchronous task whose registration runs on the calling
    /// thread, without the forced boundary of [`Task::create`].
    pub fn unsafe_create(
        register: impl Fn(&SchedulerRef, &StackedCancelable, Callback<A>) + Send + Sync + 'static,
    ) -> Self {
        let raw_register: RegisterFn = Arc::new(move |scheduler, conn, cb| {
            register(scheduler, conn, typed_callback(cb));
        });
        Self::from_raw(RawTask::Register(raw_register))
    }

    /// A task that completes when the given future does.
    ///
    /// If the run's scope is canceled by the time the future completes,
    /// the result is dropped silently.
    #[must_use]
    pub fn from_future(future: CancelableFuture<A>) -> Self {
        Self::unsafe_create(move |_scheduler, conn, cb| {
            let conn = conn.clone();
            future.on_complete(move |outcome| {
                if conn.is_canceled() {
                    return;
                }
                cb.complete(outcome);
            });
        })
    }

    /// A task that never completes.
    #[must_use]
    pub fn never() -> Self {
        let register: RegisterFn = Arc::new(|_scheduler, _conn, _cb| {});
        Self::from_raw(RawTask::Register(register))
    }

    // === Combinators ===

    /// Transforms the success value.
    pub fn map<B: Value>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Task<B> {
        let bind: BindFn = Arc::new(move |value| RawTask::Pure(erase(f(extract::<A>(value)))));
        Task::from_raw(self.raw.flat_map(bind))
    }

    /// Sequences a continuation after the success value.
    ///
    /// Normalized at build time so that arbitrarily long and deeply
    /// nested chains interpret iteratively.
    pub fn flat_map<B: Value>(self, f: impl Fn(A) -> Task<B> + Send + Sync + 'static) -> Task<B> {
        let bind: BindFn = Arc::new(move |value| f(extract::<A>(value)).raw);
        Task::from_raw(self.raw.flat_map(bind))
    }

    /// Reifies the outcome into the value domain: failures — including
    /// panics inside bind functions — become `Err` successes.
    #[must_use]
    pub fn materialize(self) -> Task<Attempt<A>> {
        let lifted = raw::materialize(self.raw);
        let lower: BindFn = Arc::new(|value: ErasedValue| {
            let attempt = extract::<RawAttempt>(value);
            RawTask::Pure(erase(attempt.map(extract::<A>)))
        });
        Task::from_raw(lifted.flat_map(lower))
    }

    /// Recovers from a failure with a fallback task.
    pub fn on_error_handle_with(
        self,
        f: impl Fn(Fault) -> Self + Send + Sync + 'static,
    ) -> Self {
        self.materialize().flat_map(move |attempt| match attempt {
            Ok(value) => Self::now(value),
            Err(fault) => f(fault),
        })
    }

    /// Recovers from a failure with a fallback value.
    pub fn on_error_handle(self, f: impl Fn(Fault) -> A + Send + Sync + 'static) -> Self {
        self.on_error_handle_with(move |fault| Self::now(f(fault)))
    }

    /// Caches the first outcome across all runs and clones.
    ///
    /// The underlying program evaluates at most once no matter how many
    /// runs race into it; every run observes the same attempt.
    /// Idempotent: memoizing a memoized (or already resolved) task
    /// returns it unchanged.
    #[must_use]
    pub fn memoize(self) -> Self {
        match self.raw {
            RawTask::Pure(_) | RawTask::Faulted(_) | RawTask::Memoized(_) | RawTask::Once(_) => {
                self
            }
            raw => Self::from_raw(RawTask::Memoized(Arc::new(MemoCell::new(raw)))),
        }
    }

    /// Guarantees an asynchronous boundary before the task starts: the
    /// calling thread returns before any of its binds execute.
    ///
    /// Already-asynchronous tasks and unstarted memoized tasks are
    /// returned unchanged.
    #[must_use]
    pub fn fork(self) -> Self {
        match &self.raw {
            RawTask::Register(_) | RawTask::BindRegister(_, _) => self,
            RawTask::Memoized(cell) if !cell.is_started() => self,
            _ => {
                let source = self.raw;
                let register: RegisterFn = Arc::new(move |scheduler, conn, cb| {
                    let source = source.clone();
                    let child_scheduler = scheduler.clone();
                    let child_conn = conn.clone();
                    scheduler.execute(Box::new(move || {
                        if child_conn.is_canceled() {
                            return;
                        }
                        run_loop::start(source, child_scheduler, child_conn, cb);
                    }));
                });
                Self::from_raw(RawTask::Register(register))
            }
        }
    }

    /// Delays the start of the task by `delay`.
    #[must_use]
    pub fn delay_execution(self, delay: Duration) -> Self {
        Task::sleep(delay).flat_map(move |()| self.clone())
    }

    /// Delays the delivery of the result by `delay`.
    #[must_use]
    pub fn delay_result(self, delay: Duration) -> Self {
        self.flat_map(move |value| Task::sleep(delay).map(move |()| value.clone()))
    }

    /// Fails with a timeout fault unless the task completes within
    /// `after`. Built by racing against a delayed failure; not a
    /// primitive.
    #[must_use]
    pub fn timeout(self, after: Duration) -> Self {
        let fallback = Task::sleep(after).flat_map(move |()| Self::fail(Fault::timeout(after)));
        crate::combinator::first_completed_of(vec![self, fallback])
    }

    // === Run entry points ===

    /// Runs the task, delivering the outcome to `callback`.
    ///
    /// Returns the run's cancel token. Canceling it converts the rest
    /// of the run into silent termination: the callback is never
    /// invoked.
    pub fn run_with_callback(self, scheduler: &SchedulerRef, callback: Callback<A>) -> CancelableRef {
        let conn = StackedCancelable::with_reporter(scheduler.clone());
        let callback = callback.guarded(scheduler.clone());
        let terminal = RawCallback::new(move |attempt: RawAttempt| match attempt {
            Ok(value) => callback.on_success(extract::<A>(value)),
            Err(fault) => callback.on_error(fault),
        });
        run_loop::start(self.raw, scheduler.clone(), conn.clone(), terminal);
        Arc::new(conn)
    }

    /// Runs the task eagerly, returning a resolved value when no
    /// asynchronous boundary is crossed.
    ///
    /// An immediate failure is returned as an already-failed future so
    /// that it is delivered rather than dropped.
    pub fn run_sync_maybe(self, scheduler: &SchedulerRef) -> SyncMaybe<A> {
        match sync_run::try_sync(self.raw, scheduler) {
            TrySync::Value(Ok(value)) => SyncMaybe::Value(extract::<A>(value)),
            TrySync::Value(Err(fault)) => SyncMaybe::Future(CancelableFuture::failed(fault)),
            TrySync::Suspended(current, binds, frame) => {
                let conn = StackedCancelable::with_reporter(scheduler.clone());
                let (future, completer) =
                    CancelableFuture::pending(Arc::new(conn.clone()) as CancelableRef);
                let reporter = scheduler.clone();
                let terminal = RawCallback::new(move |attempt: RawAttempt| {
                    let outcome = attempt.map(extract::<A>);
                    if !completer.complete(outcome) {
                        reporter.report_failure(Fault::double_completion());
                    }
                });
                run_loop::execute(current, scheduler.clone(), conn, terminal, binds, frame);
                SyncMaybe::Future(future)
            }
        }
    }

    /// Runs the task, returning a cancelable future for the outcome.
    pub fn run_as_future(self, scheduler: &SchedulerRef) -> CancelableFuture<A> {
        match self.run_sync_maybe(scheduler) {
            SyncMaybe::Value(value) => CancelableFuture::resolved(Ok(value)),
            SyncMaybe::Future(future) => future,
        }
    }
}

impl Task<()> {
    /// The resolved unit task.
    #[must_use]
    pub fn unit() -> Self {
        Self::now(())
    }

    /// Completes with `()` after `delay`, through the scheduler's
    /// timer. Canceling the run removes the pending timer.
    #[must_use]
    pub fn sleep(delay: Duration) -> Self {
        Self::unsafe_create(move |scheduler, conn, cb| {
            let slot = AssignableCancelable::arc();
            conn.push(slot.clone());
            let timer_conn = conn.clone();
            let token = scheduler.schedule_once(
                delay,
                Box::new(move || {
                    // Retire the timer token parked below.
                    let _ = timer_conn.pop();
                    if timer_conn.is_canceled() {
                        return;
                    }
                    cb.on_success(());
                }),
            );
            slot.set(token);
        })
    }
}

impl<A: Value> Task<Attempt<A>> {
    /// Lowers a reified outcome back into the task's error channel;
    /// the inverse of [`Task::materialize`].
    #[must_use]
    pub fn dematerialize(self) -> Task<A> {
        self.flat_map(|attempt| match attempt {
            Ok(value) => Task::now(value),
            Err(fault) => Task::fail(fault),
        })
    }
}

/// Starts a task under a caller-supplied scope. Used by combinators to
/// run children whose cancellation is linked to a parent run.
pub(crate) fn start_with_conn<A: Value>(
    task: Task<A>,
    scheduler: &SchedulerRef,
    conn: &StackedCancelable,
    cb: Callback<A>,
) {
    let terminal = RawCallback::new(move |attempt: RawAttempt| match attempt {
        Ok(value) => cb.on_success(extract::<A>(value)),
        Err(fault) => cb.on_error(fault),
    });
    run_loop::start(task.raw, scheduler.clone(), conn.clone(), terminal);
}

/// Adapts an erased run-loop callback into a typed one.
fn typed_callback<A: Value>(raw: RawCallback) -> Callback<A> {
    Callback::new(move |outcome: Result<A, Fault>| raw.complete(outcome.map(erase::<A>)))
}

impl RawTask {
    /// Node tag for debug output.
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Pure(_) => "now",
            Self::Faulted(_) => "fail",
            Self::Once(_) => "eval-once",
            Self::Always(_) => "eval",
            Self::Suspend(_) => "suspend",
            Self::BindSuspend(_, _) => "bind",
            Self::Register(_) => "async",
            Self::BindRegister(_, _) => "bind-async",
            Self::Memoized(_) => "memoized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::TestScheduler;

    fn run<A: Value>(task: Task<A>) -> Option<Attempt<A>> {
        let scheduler = TestScheduler::new();
        let sched: SchedulerRef = Arc::new(scheduler.clone());
        let future = task.run_as_future(&sched);
        scheduler.run_until_quiescent();
        future.value()
    }

    #[test]
    fn now_is_immediate() {
        let scheduler = TestScheduler::new();
        let sched: SchedulerRef = Arc::new(scheduler);
        match Task::now(5).run_sync_maybe(&sched) {
            SyncMaybe::Value(v) => assert_eq!(v, 5),
            SyncMaybe::Future(_) => panic!("expected a synchronous value"),
        }
    }

    #[test]
    fn map_and_flat_map_compose() {
        let program = Task::now(2).flat_map(|x| Task::now(x * 3)).map(|x| x + 1);
        assert_eq!(run(program).unwrap().unwrap(), 7);
    }

    #[test]
    fn fail_short_circuits() {
        let program = Task::<i32>::fail(Fault::failed("nope"))
            .flat_map(|_| -> Task<i32> { panic!("bind must not run") });
        let fault = run(program).unwrap().unwrap_err();
        assert_eq!(fault.to_string(), "Failed: nope");
    }

    #[test]
    fn eval_panic_is_reified() {
        let program: Task<i32> = Task::eval(|| panic!("thunk broke"));
        let fault = run(program).unwrap().unwrap_err();
        assert!(fault.is_panic());
    }

    #[test]
    fn on_error_handle_recovers() {
        let program: Task<i32> = Task::eval(|| panic!("boom")).on_error_handle(|_| 42);
        assert_eq!(run(program).unwrap().unwrap(), 42);
    }

    #[test]
    fn materialize_dematerialize_round_trips() {
        let ok = Task::now(3).materialize().dematerialize();
        assert_eq!(run(ok).unwrap().unwrap(), 3);

        let err = Task::<i32>::fail(Fault::failed("kept")).materialize().dematerialize();
        assert_eq!(run(err).unwrap().unwrap_err().to_string(), "Failed: kept");
    }

    #[test]
    fn memoize_is_idempotent() {
        let memoized = Task::eval(|| 1).memoize();
        let again = memoized.clone().memoize();
        assert_eq!(format!("{memoized:?}"), format!("{again:?}"));
    }

    #[test]
    fn debug_prints_node_kind() {
        assert_eq!(format!("{:?}", Task::now(1)), "Task { node: \"now\" }");
    }
}
