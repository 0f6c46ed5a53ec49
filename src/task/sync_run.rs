//! The eager-sync runner.
//!
//! A second, shorter interpretation loop with the same semantics as the
//! trampoline but a different return type: while only strict, lazy and
//! synchronous nodes are encountered it produces a resolved attempt
//! directly on the calling thread. The first asynchronous boundary — a
//! register node, an unresolved memoized cell, or an exhausted frame
//! budget — suspends, handing the residual `(current, binds, frame)`
//! state back to the caller to continue through the full trampoline
//! behind a promise.
//!
//! Failures reached synchronously are returned as resolved attempts,
//! so the caller delivers them (as an already-failed future) instead of
//! dropping them.

use super::raw::{attempt_bind, attempt_node, attempt_thunk, from_attempt, BindFn, RawAttempt, RawTask};
use crate::scheduler::SchedulerRef;

/// Outcome of the eager-sync walk.
pub(crate) enum TrySync {
    /// The program resolved without crossing an asynchronous boundary.
    Value(RawAttempt),
    /// The walk suspended; interpretation continues in the full loop
    /// from the carried `(current, binds, frame)` state. A frame of `0`
    /// means the budget forced this suspension and the full loop must
    /// yield before touching the next node.
    Suspended(RawTask, Vec<BindFn>, u32),
}

/// Walks the program eagerly on the calling thread.
pub(crate) fn try_sync(mut current: RawTask, scheduler: &SchedulerRef) -> TrySync {
    let model = scheduler.execution_model();
    let mut binds: Vec<BindFn> = Vec::new();
    let mut frame: u32 = 1;
    loop {
        if frame == 0 {
            return TrySync::Suspended(current, binds, 0);
        }
        match current {
            RawTask::Pure(value) => match binds.pop() {
                Some(bind) => {
                    current = attempt_bind(&bind, value);
                    frame = model.next_frame_index(frame);
                }
                None => return TrySync::Value(Ok(value)),
            },
            RawTask::Faulted(fault) => {
                binds.clear();
                return TrySync::Value(Err(fault));
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
                None => return TrySync::Suspended(RawTask::Memoized(cell), binds, frame),
            },
            RawTask::Register(_) | RawTask::BindRegister(_, _) => {
                return TrySync::Suspended(current, binds, frame);
            }
        }
    }
}
