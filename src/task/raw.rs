//! The type-erased program tree.
//!
//! A [`Task`](crate::Task) is a thin typed wrapper over [`RawTask`], an
//! immutable tagged tree whose values travel as
//! `Arc<dyn Any + Send + Sync>` and whose binds are erased
//! `Fn(value) -> RawTask` closures. Types are erased at the bind
//! boundary and recovered by downcast exactly where a typed closure or
//! terminal callback was created, so the downcasts cannot fail unless
//! the tree itself was corrupted.
//!
//! `flat_map` is normalized at build time: binding onto an
//! already-bound node re-associates the chain to the right, which is
//! what keeps the interpreter's bind stack shallow and the whole run
//! stack-safe.
//!
//! Panic capture happens here, once, in the `attempt_*` helpers: every
//! user thunk and bind function is invoked under `catch_unwind`, and
//! the caught payload is reified as a [`Fault`]. Non-unwinding failures
//! (aborts, OOM) are not representable by `catch_unwind` and propagate,
//! which is the required fatal/non-fatal split.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::eval_once::OnceEval;
use super::memoize::MemoCell;
use super::run_loop;
use crate::cancel::StackedCancelable;
use crate::error::Fault;
use crate::scheduler::SchedulerRef;
use crate::task::Value;

/// An erased task value.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// An erased resolved program: success value or fault.
pub(crate) type RawAttempt = Result<ErasedValue, Fault>;

/// A thunk producing a value, rerun on every evaluation.
pub(crate) type ThunkFn = dyn Fn() -> ErasedValue + Send + Sync;

/// A thunk producing the next program node.
pub(crate) type NodeFn = dyn Fn() -> RawTask + Send + Sync;

/// An erased continuation pushed by `flat_map`.
pub(crate) type BindFn = Arc<dyn Fn(ErasedValue) -> RawTask + Send + Sync>;

/// An erased asynchronous registration.
pub(crate) type RegisterFn =
    Arc<dyn Fn(&SchedulerRef, &StackedCancelable, RawCallback) + Send + Sync>;

/// One-shot erased completion sink used inside the run loop.
pub(crate) struct RawCallback {
    handler: Box<dyn FnOnce(RawAttempt) + Send>,
}

impl RawCallback {
    pub(crate) fn new(handler: impl FnOnce(RawAttempt) + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    pub(crate) fn complete(self, attempt: RawAttempt) {
        (self.handler)(attempt);
    }

    pub(crate) fn on_success(self, value: ErasedValue) {
        self.complete(Ok(value));
    }

    pub(crate) fn on_error(self, fault: Fault) {
        self.complete(Err(fault));
    }
}

/// The immutable program tree.
#[derive(Clone)]
pub(crate) enum RawTask {
    /// A resolved success.
    Pure(ErasedValue),
    /// A resolved failure.
    Faulted(Fault),
    /// A lazy value cached after its first evaluation.
    Once(Arc<OnceEval>),
    /// A lazy value recomputed on every run.
    Always(Arc<ThunkFn>),
    /// Deferred construction of the next node.
    Suspend(Arc<NodeFn>),
    /// `flat_map` over a deferred node.
    BindSuspend(Arc<NodeFn>, BindFn),
    /// An asynchronous registration.
    Register(RegisterFn),
    /// `flat_map` over an asynchronous registration.
    BindRegister(RegisterFn, BindFn),
    /// A memoized subtree shared across runs and clones.
    Memoized(Arc<MemoCell>),
}

impl RawTask {
    /// Returns true for nodes that are themselves asynchronous
    /// boundaries; the forced yield skips these.
    pub(crate) const fn is_async(&self) -> bool {
        matches!(self, Self::Register(_) | Self::BindRegister(_, _))
    }

    /// Build-time `flat_map` with the re-association rewrites.
    pub(crate) fn flat_map(self, bind: BindFn) -> Self {
        match self {
            Self::Pure(value) => {
                Self::Suspend(Arc::new(move || attempt_bind(&bind, value.clone())))
            }
            Self::Faulted(fault) => Self::Faulted(fault),
            Self::Once(cell) => Self::Suspend(Arc::new(move || match cell.force() {
                Ok(value) => attempt_bind(&bind, value),
                Err(fault) => Self::Faulted(fault),
            })),
            Self::Always(thunk) => Self::Suspend(Arc::new(move || match attempt_thunk(&thunk) {
                Ok(value) => attempt_bind(&bind, value),
                Err(fault) => Self::Faulted(fault),
            })),
            Self::Suspend(thunk) => Self::BindSuspend(thunk, bind),
            Self::BindSuspend(thunk, first) => Self::Suspend(Arc::new(move || {
                Self::BindSuspend(thunk.clone(), compose_binds(first.clone(), bind.clone()))
            })),
            Self::Register(register) => Self::BindRegister(register, bind),
            Self::BindRegister(register, first) => Self::Suspend(Arc::new(move || {
                Self::BindRegister(register.clone(), compose_binds(first.clone(), bind.clone()))
            })),
            Self::Memoized(cell) => {
                Self::BindSuspend(Arc::new(move || Self::Memoized(cell.clone())), bind)
            }
        }
    }
}

/// Right-associates two binds: `x -> first(x).flat_map(second)`.
fn compose_binds(first: BindFn, second: BindFn) -> BindFn {
    Arc::new(move |value| first(value).flat_map(second.clone()))
}

/// Converts a resolved attempt back into a node.
pub(crate) fn from_attempt(attempt: RawAttempt) -> RawTask {
    match attempt {
        Ok(value) => RawTask::Pure(value),
        Err(fault) => RawTask::Faulted(fault),
    }
}

/// Erases a typed value.
pub(crate) fn erase<A: Value>(value: A) -> ErasedValue {
    Arc::new(value)
}

/// Recovers a typed value, unwrapping the `Arc` when it is unshared.
pub(crate) fn extract<A: Value>(value: ErasedValue) -> A {
    let typed = value
        .downcast::<A>()
        .unwrap_or_else(|_| panic!("task value type confusion"));
    Arc::try_unwrap(typed).unwrap_or_else(|shared| (*shared).clone())
}

/// Runs a value thunk, reifying an unwinding panic.
pub(crate) fn attempt_thunk(thunk: &Arc<ThunkFn>) -> RawAttempt {
    catch_unwind(AssertUnwindSafe(|| thunk())).map_err(Fault::from_panic)
}

/// Runs a node thunk, reifying an unwinding panic.
pub(crate) fn attempt_node(thunk: &Arc<NodeFn>) -> RawTask {
    match catch_unwind(AssertUnwindSafe(|| thunk())) {
        Ok(node) => node,
        Err(payload) => RawTask::Faulted(Fault::from_panic(payload)),
    }
}

/// Applies a bind, reifying an unwinding panic.
pub(crate) fn attempt_bind(bind: &BindFn, value: ErasedValue) -> RawTask {
    match catch_unwind(AssertUnwindSafe(|| bind(value))) {
        Ok(node) => node,
        Err(payload) => RawTask::Faulted(Fault::from_panic(payload)),
    }
}

/// Structural `materialize`: rewrites the tree so that every failure —
/// including one thrown inside a bind function — surfaces as a success
/// carrying a [`RawAttempt`].
///
/// The lift is pushed into each node kind rather than wrapped around
/// the whole tree, so the resulting program never travels the error
/// path of the run loop.
pub(crate) fn materialize(raw: RawTask) -> RawTask {
    match raw {
        RawTask::Pure(value) => RawTask::Pure(reify(Ok(value))),
        RawTask::Faulted(fault) => RawTask::Pure(reify(Err(fault))),
        RawTask::Once(cell) => {
            RawTask::Suspend(Arc::new(move || RawTask::Pure(reify(cell.force()))))
        }
        RawTask::Always(thunk) => {
            RawTask::Always(Arc::new(move || reify(attempt_thunk(&thunk))))
        }
        RawTask::Suspend(thunk) => {
            RawTask::Suspend(Arc::new(move || materialize(attempt_node(&thunk))))
        }
        RawTask::BindSuspend(thunk, bind) => RawTask::BindSuspend(
            Arc::new(move || materialize(attempt_node(&thunk))),
            materialize_bind(bind),
        ),
        RawTask::Register(register) => RawTask::Register(reify_register(register)),
        RawTask::BindRegister(register, bind) => {
            RawTask::BindRegister(reify_register(register), materialize_bind(bind))
        }
        RawTask::Memoized(cell) => {
            // A memoized subtree resolves through its own waiter
            // machinery; reify its outcome by running it as a child.
            RawTask::Register(Arc::new(move |scheduler, conn, cb| {
                let source = RawTask::Memoized(cell.clone());
                let reified = RawCallback::new(move |attempt| cb.on_success(reify(attempt)));
                run_loop::start(source, scheduler.clone(), conn.clone(), reified);
            }))
        }
    }
}

/// Wraps a materialized attempt as an erased value.
fn reify(attempt: RawAttempt) -> ErasedValue {
    Arc::new(attempt)
}

/// A bind over materialized values: failures flow around the original
/// bind, successes flow through it and are materialized in turn.
fn materialize_bind(bind: BindFn) -> BindFn {
    Arc::new(move |value| {
        let attempt = extract::<RawAttempt>(value);
        match attempt {
            Ok(inner) => materialize(attempt_bind(&bind, inner)),
            Err(fault) => RawTask::Pure(reify(Err(fault))),
        }
    })
}

/// Routes a register's completion through the materialized channel.
fn reify_register(register: RegisterFn) -> RegisterFn {
    Arc::new(move |scheduler, conn, cb| {
        let reified = RawCallback::new(move |attempt| cb.on_success(reify(attempt)));
        register(scheduler, conn, reified);
    })
}
