//! The per-run cancellation scope.
//!
//! A [`StackedCancelable`] is an ordered stack of cancel tokens plus a
//! monotonic canceled flag. The run loop pushes a token before every
//! asynchronous wait and pops it when the wait resolves, so the stack
//! always describes how to interrupt the run at its current depth.
//!
//! The cancel/push race is linearized: either the canceler observes the
//! pushed token and cancels it, or the pusher observes the canceled
//! flag and cancels the token itself. Both can never observe success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{noop, Cancelable, CancelableRef};
use crate::error::Fault;
use crate::scheduler::SchedulerRef;

/// An ordered, cancellable stack of child cancel tokens owned by one run.
///
/// Cloning shares the scope; all clones observe the same flag and stack.
#[derive(Clone)]
pub struct StackedCancelable {
    inner: Arc<Inner>,
}

struct Inner {
    canceled: AtomicBool,
    stack: Mutex<Vec<CancelableRef>>,
    reporter: Option<SchedulerRef>,
}

impl StackedCancelable {
    /// Creates an empty scope with no failure reporter.
    ///
    /// A token whose cancel handler panics is then only logged; prefer
    /// [`StackedCancelable::with_reporter`] inside runners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                stack: Mutex::new(Vec::new()),
                reporter: None,
            }),
        }
    }

    /// Creates an empty scope that routes cancel-handler panics to
    /// `scheduler.report_failure`.
    #[must_use]
    pub fn with_reporter(scheduler: SchedulerRef) -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                stack: Mutex::new(Vec::new()),
                reporter: Some(scheduler),
            }),
        }
    }

    /// Returns true once the scope has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Pushes a token on top of the stack.
    ///
    /// If the scope is already canceled the token is canceled
    /// immediately instead of being retained.
    pub fn push(&self, token: CancelableRef) {
        {
            let mut stack = self.inner.stack.lock();
            if !self.inner.canceled.load(Ordering::Acquire) {
                stack.push(token);
                return;
            }
        }
        self.cancel_token(token);
    }

    /// Removes and returns the top token.
    ///
    /// Returns the inert token if the stack is empty. Never touches the
    /// canceled flag.
    pub fn pop(&self) -> CancelableRef {
        self.inner.stack.lock().pop().unwrap_or_else(noop)
    }

    /// Replaces the top token with `token`.
    ///
    /// Equivalent to `pop` followed by `push`, atomically with respect
    /// to a concurrent `cancel`.
    pub fn pop_and_collapse(&self, token: CancelableRef) {
        {
            let mut stack = self.inner.stack.lock();
            let _ = stack.pop();
            if !self.inner.canceled.load(Ordering::Acquire) {
                stack.push(token);
                return;
            }
        }
        self.cancel_token(token);
    }

    /// Cancels the scope: sets the flag and cancels every token from
    /// the top of the stack to the bottom. Idempotent.
    pub fn cancel(&self) {
        if self.inner.canceled.load(Ordering::Acquire) {
            return;
        }
        let drained = {
            let mut stack = self.inner.stack.lock();
            if self.inner.canceled.swap(true, Ordering::AcqRel) {
                return;
            }
            core::mem::take(&mut *stack)
        };
        crate::tracing_compat::debug!("cancelling scope with {} parked tokens", drained.len());
        for token in drained.into_iter().rev() {
            self.cancel_token(token);
        }
    }

    /// Cancels one token, keeping a panicking cancel handler from
    /// unwinding through the scope.
    fn cancel_token(&self, token: CancelableRef) {
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || token.cancel()));
        if let Err(payload) = outcome {
            let fault = Fault::from_panic(payload).with_context("cancel handler panicked");
            match &self.inner.reporter {
                Some(scheduler) => scheduler.report_failure(fault),
                None => {
                    crate::tracing_compat::error!("unreported cancel-handler panic: {}", fault);
                }
            }
        }
    }
}

impl Default for StackedCancelable {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancelable for StackedCancelable {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl core::fmt::Debug for StackedCancelable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StackedCancelable")
            .field("canceled", &self.is_canceled())
            .field("depth", &self.inner.stack.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::BooleanCancelable;

    #[test]
    fn push_after_cancel_cancels_immediately() {
        let scope = StackedCancelable::new();
        scope.cancel();
        let flag = BooleanCancelable::arc();
        scope.push(flag.clone());
        assert!(flag.is_canceled());
    }

    #[test]
    fn cancel_drains_top_to_bottom() {
        let scope = StackedCancelable::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            scope.push(super::super::FnCancelable::arc(move || {
                order.lock().push(i);
            }));
        }
        scope.cancel();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn pop_returns_last_pushed_token() {
        let scope = StackedCancelable::new();
        let first = BooleanCancelable::arc();
        let second = BooleanCancelable::arc();
        scope.push(first.clone());
        scope.push(second.clone());
        let top = scope.pop();
        top.cancel();
        assert!(!first.is_canceled());
        assert!(second.is_canceled());
    }

    #[test]
    fn pop_on_empty_stack_is_inert() {
        let scope = StackedCancelable::new();
        let token = scope.pop();
        token.cancel();
        assert!(!scope.is_canceled());
    }

    #[test]
    fn pop_and_collapse_replaces_top() {
        let scope = StackedCancelable::new();
        let displaced = BooleanCancelable::arc();
        let replacement = BooleanCancelable::arc();
        scope.push(displaced.clone());
        scope.pop_and_collapse(replacement.clone());
        scope.cancel();
        assert!(!displaced.is_canceled());
        assert!(replacement.is_canceled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let scope = StackedCancelable::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = calls.clone();
        scope.push(super::super::FnCancelable::arc(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        scope.cancel();
        scope.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_token_does_not_poison_the_scope() {
        let scope = StackedCancelable::new();
        scope.push(super::super::FnCancelable::arc(|| panic!("bad token")));
        let flag = BooleanCancelable::arc();
        scope.push(flag.clone());
        scope.cancel();
        assert!(flag.is_canceled());
        assert!(scope.is_canceled());
    }
}
