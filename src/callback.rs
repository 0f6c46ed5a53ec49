//! One-shot completion sinks.
//!
//! A [`Callback`] receives the outcome of a run: either a success of
//! `A` or a [`Fault`]. Exactly one of the two, at most once — enforced
//! statically by consuming the callback by value.
//!
//! A callback handed to consumer code should first be passed through
//! [`Callback::guarded`], which routes a panic inside the handler to
//! [`Scheduler::report_failure`](crate::Scheduler::report_failure); at
//! that point the run is already complete and there is nowhere else
//! for the panic to go.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{Fault, PanicPayload};
use crate::scheduler::SchedulerRef;

/// A one-shot sink for the outcome of a run.
pub struct Callback<A> {
    handler: Box<dyn FnOnce(Result<A, Fault>) + Send>,
}

impl<A: Send + 'static> Callback<A> {
    /// Creates a callback from a single handler over the outcome.
    pub fn new(handler: impl FnOnce(Result<A, Fault>) + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Creates a callback from separate success and error handlers.
    pub fn from_handlers(
        on_success: impl FnOnce(A) + Send + 'static,
        on_error: impl FnOnce(Fault) + Send + 'static,
    ) -> Self {
        Self::new(move |outcome| match outcome {
            Ok(value) => on_success(value),
            Err(fault) => on_error(fault),
        })
    }

    /// Completes with a success.
    pub fn on_success(self, value: A) {
        self.complete(Ok(value));
    }

    /// Completes with a failure.
    pub fn on_error(self, fault: Fault) {
        self.complete(Err(fault));
    }

    /// Completes with the given outcome.
    pub fn complete(self, outcome: Result<A, Fault>) {
        (self.handler)(outcome);
    }

    /// Wraps the callback so that a panic inside the handler is caught
    /// and reported to the scheduler instead of unwinding the run loop.
    #[must_use]
    pub fn guarded(self, scheduler: SchedulerRef) -> Self {
        Self::new(move |outcome| {
            let delivery = catch_unwind(AssertUnwindSafe(move || self.complete(outcome)));
            if let Err(payload) = delivery {
                scheduler
                    .report_failure(Fault::callback_panicked(PanicPayload::from_any(&*payload)));
            }
        })
    }
}

impl<A> core::fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}
