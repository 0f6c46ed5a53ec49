//! The bind-stack trampoline.
//!
//! The interpreter consumes the program tree iteratively while carrying
//! a LIFO stack of pending binds. State is `(current, binds, frame)`:
//!
//! - A `Pure` value pops the top bind and feeds it the value; with no
//!   binds left it is the final success. Each pop advances the frame
//!   index through the scheduler's [`ExecutionModel`]; when the index
//!   comes back as `0` the loop submits the rest of the run to the
//!   scheduler and returns, bounding synchronous work per tick.
//! - A `Faulted` node discards the remaining binds — binds are
//!   success-only — and short-circuits to the terminal callback.
//! - `Register` nodes hand off to the async runner: the registration
//!   receives a restart callback that re-enters the loop with the
//!   surviving binds on whatever thread completes it.
//!
//! Cancellation is checked before every asynchronous register and
//! before every scheduled re-entry; a canceled run delivers nothing.
//!
//! [`ExecutionModel`]: crate::ExecutionModel

use super::raw::{
    attempt_bind, attempt_node, attempt_thunk, from_attempt, BindFn, RawCallback, RawTask,
    RegisterFn,
};
use crate::cancel::StackedCancelable;
use crate::scheduler::SchedulerRef;

/// Starts a fresh run with an empty bind stack.
pub(crate) fn start(
    source: RawTask,
    scheduler: SchedulerRef,
    conn: StackedCancelable,
    cb: RawCallback,
) {
    execute(source, scheduler, conn, cb, Vec::new(), 1);
}

/// The trampoline proper. `frame` starts at 1 on every (re-)entry so a
/// single node is always handled before a yield can trigger.
pub(crate) fn execute(
    mut current: RawTask,
    scheduler: SchedulerRef,
    conn: StackedCancelable,
    cb: RawCallback,
    mut binds: Vec<BindFn>,
    mut frame: u32,
) {
    let model = scheduler.execution_model();
    loop {
        if frame == 0 && !current.is_async() {
            force_restart(current, scheduler, conn, cb, binds);
            return;
        }
        match current {
            RawTask::Pure(value) => match binds.pop() {
                Some(bind) => {
                    current = attempt_bind(&bind, value);
                    frame = model.next_frame_index(frame);
                }
                None => {
                    cb.on_success(value);
                    return;
                }
            },
            RawTask::Faulted(fault) => {
                // Binds are success-only; drop them and short-circuit.
                binds.clear();
                cb.on_error(fault);
                return;
            }
            RawTask::Once(cell) => {
                current = from_attempt(cell.force());
            }
            RawTask::Always(thunk) => {
                current = from_attempt(attempt_thunk(&thunk));
            }
            RawTask::Suspend(thunk) => {
                current = attempt_node(&thunk);
            }
            RawTask::BindSuspend(thunk, bind) => {
                binds.push(bind);
                current = attempt_node(&thunk);
            }
            RawTask::Memoized(cell) => match cell.try_resolved() {
                Some(attempt) => current = from_attempt(attempt),
                None => {
                    cell.enter(scheduler, conn, cb, binds);
                    return;
                }
            },
            RawTask::Register(register) => {
                register_async(&register, scheduler, conn, cb, binds);
                return;
            }
            RawTask::BindRegister(register, bind) => {
                binds.push(bind);
                register_async(&register, scheduler, conn, cb, binds);
                return;
            }
        }
    }
}

/// Forced asynchronous yield: submit a re-entry and unwind.
fn force_restart(
    current: RawTask,
    scheduler: SchedulerRef,
    conn: StackedCancelable,
    cb: RawCallback,
    binds: Vec<BindFn>,
) {
    if conn.is_canceled() {
        return;
    }
    crate::tracing_compat::trace!("frame budget exhausted; forcing asynchronous yield");
    let resumed_scheduler = scheduler.clone();
    let resumed_conn = conn.clone();
    scheduler.execute(Box::new(move || {
        if resumed_conn.is_canceled() {
            return;
        }
        execute(current, resumed_scheduler, resumed_conn, cb, binds, 1);
    }));
}

/// Asynchronous boundary: invoke the registration with a restart
/// callback that re-enters the loop with the surviving binds.
fn register_async(
    register: &RegisterFn,
    scheduler: SchedulerRef,
    conn: StackedCancelable,
    cb: RawCallback,
    binds: Vec<BindFn>,
) {
    if conn.is_canceled() {
        return;
    }
    let resumed_scheduler = scheduler.clone();
    let resumed_conn = conn.clone();
    let restart = RawCallback::new(move |attempt| match attempt {
        Ok(value) => execute(
            RawTask::Pure(value),
            resumed_scheduler,
            resumed_conn,
            cb,
            binds,
            1,
        ),
        // Errors never enter binds; deliver straight to the terminal
        // callback.
        Err(fault) => cb.on_error(fault),
    });
    register(&scheduler, &conn, restart);
}
