//! The at-most-once thunk cell behind `Task::eval_once`.
//!
//! State machine: `Thunk` → `Running` → `Done`. The first forcer takes
//! the thunk out and evaluates it without holding the lock; concurrent
//! forcers block on a condvar until the result lands. The thunk is
//! released as soon as evaluation starts, and the cached attempt (a
//! success or the captured fault) is shared by every later run.

use parking_lot::{Condvar, Mutex};

use super::raw::{attempt_thunk, RawAttempt, ThunkFn};
use std::sync::Arc;

enum OnceState {
    Thunk(Arc<ThunkFn>),
    Running,
    Done(RawAttempt),
}

/// A lazily evaluated, cached computation.
pub(crate) struct OnceEval {
    state: Mutex<OnceState>,
    done: Condvar,
}

impl OnceEval {
    pub(crate) fn new(thunk: Arc<ThunkFn>) -> Self {
        Self {
            state: Mutex::new(OnceState::Thunk(thunk)),
            done: Condvar::new(),
        }
    }

    /// Forces the cell, evaluating the thunk on the first call and
    /// returning the cached attempt on every later one.
    pub(crate) fn force(&self) -> RawAttempt {
        let mut state = self.state.lock();
        loop {
            match &*state {
                OnceState::Done(attempt) => return attempt.clone(),
                OnceState::Running => self.done.wait(&mut state),
                OnceState::Thunk(_) => {
                    let thunk = match core::mem::replace(&mut *state, OnceState::Running) {
                        OnceState::Thunk(thunk) => thunk,
                        _ => unreachable!("state changed under the lock"),
                    };
                    drop(state);
                    let attempt = attempt_thunk(&thunk);
                    state = self.state.lock();
                    *state = OnceState::Done(attempt.clone());
                    self.done.notify_all();
                    return attempt;
                }
            }
        }
    }
}

impl core::fmt::Debug for OnceEval {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match &*self.state.lock() {
            OnceState::Thunk(_) => "thunk",
            OnceState::Running => "running",
            OnceState::Done(_) => "done",
        };
        f.debug_struct("OnceEval").field("state", &state).finish()
    }
}
