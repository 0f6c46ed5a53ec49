//! Promise-backed cancelable futures.
//!
//! [`CancelableFuture`] is the value returned by
//! [`Task::run_as_future`](crate::Task::run_as_future): a shared cell
//! that is completed at most once, can be inspected without blocking
//! through [`CancelableFuture::value`], can register completion
//! listeners, implements [`std::future::Future`], and carries the
//! cancel token of the run that feeds it.
//!
//! A canceled run never completes its future; the future stays pending
//! forever and `value()` keeps returning `None`. That is the silent
//! termination contract of cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::cancel::{noop, Cancelable, CancelableRef};
use crate::error::Fault;

type Listener<A> = Box<dyn FnOnce(Result<A, Fault>) + Send>;

struct Shared<A> {
    inner: Mutex<Inner<A>>,
}

struct Inner<A> {
    outcome: Option<Result<A, Fault>>,
    listeners: Vec<Listener<A>>,
    wakers: Vec<Waker>,
}

/// Fills the future's cell. Internal to the runners.
pub(crate) struct Completer<A> {
    shared: Arc<Shared<A>>,
}

impl<A: Clone + Send + 'static> Completer<A> {
    /// Completes the future. Returns false if it was already complete,
    /// in which case the outcome is dropped by the caller's policy.
    pub(crate) fn complete(&self, outcome: Result<A, Fault>) -> bool {
        let (listeners, wakers) = {
            let mut inner = self.shared.inner.lock();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome.clone());
            (
                core::mem::take(&mut inner.listeners),
                core::mem::take(&mut inner.wakers),
            )
        };
        for listener in listeners {
            listener(outcome.clone());
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// A future that can be canceled and inspected without blocking.
pub struct CancelableFuture<A> {
    shared: Arc<Shared<A>>,
    token: CancelableRef,
}

impl<A: Clone + Send + 'static> CancelableFuture<A> {
    /// Creates a pending future together with its completer.
    pub(crate) fn pending(token: CancelableRef) -> (Self, Completer<A>) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                outcome: None,
                listeners: Vec::new(),
                wakers: Vec::new(),
            }),
        });
        (
            Self {
                shared: shared.clone(),
                token,
            },
            Completer { shared },
        )
    }

    /// Creates an already-completed future.
    #[must_use]
    pub fn resolved(outcome: Result<A, Fault>) -> Self {
        let (future, completer) = Self::pending(noop());
        let _ = completer.complete(outcome);
        future
    }

    /// Creates an already-failed future.
    #[must_use]
    pub fn failed(fault: Fault) -> Self {
        Self::resolved(Err(fault))
    }

    /// Creates a future that never completes.
    #[must_use]
    pub fn never() -> Self {
        Self::pending(noop()).0
    }

    /// Returns the outcome if the future has completed.
    #[must_use]
    pub fn value(&self) -> Option<Result<A, Fault>> {
        self.shared.inner.lock().outcome.clone()
    }

    /// Returns true once the future has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.inner.lock().outcome.is_some()
    }

    /// Registers a listener for the outcome.
    ///
    /// Runs immediately on the calling thread if the future has already
    /// completed, otherwise on the completing thread.
    pub fn on_complete(&self, listener: impl FnOnce(Result<A, Fault>) + Send + 'static) {
        let mut listener = Some(Box::new(listener) as Listener<A>);
        let immediate = {
            let mut inner = self.shared.inner.lock();
            match &inner.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    inner.listeners.push(listener.take().expect("listener consumed"));
                    None
                }
            }
        };
        if let (Some(outcome), Some(listener)) = (immediate, listener) {
            listener(outcome);
        }
    }

    /// Cancels the run feeding this future.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the cancel token of the run feeding this future.
    #[must_use]
    pub fn cancel_token(&self) -> CancelableRef {
        self.token.clone()
    }
}

impl<A> Clone for CancelableFuture<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            token: self.token.clone(),
        }
    }
}

impl<A: Clone + Send + 'static> Future for CancelableFuture<A> {
    type Output = Result<A, Fault>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        if let Some(outcome) = &inner.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<A: Send> Cancelable for CancelableFuture<A> {
    fn cancel(&self) {
        self.token.cancel();
    }
}

impl<A> core::fmt::Debug for CancelableFuture<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CancelableFuture")
            .field("completed", &self.shared.inner.lock().outcome.is_some())
            .finish()
    }
}
