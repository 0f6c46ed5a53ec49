//! Cancellation tokens.
//!
//! Cancellation in deft is cooperative and first-class: every run of a
//! task owns a [`StackedCancelable`] scope, and every asynchronous
//! registration may park a token in it. Canceling the scope cancels
//! every parked token; a canceled scope converts the rest of the run
//! into silent termination.
//!
//! This module provides the token zoo:
//!
//! - [`Cancelable`]: the trait — `cancel` is idempotent, best-effort.
//! - [`noop`]: the inert token.
//! - [`FnCancelable`]: runs a closure at most once.
//! - [`BooleanCancelable`]: a flag that work can poll before running.
//! - [`AssignableCancelable`]: a slot assigned after registration.
//! - [`CompositeCancelable`]: cancels a batch of children together.
//! - [`StackedCancelable`]: the ordered per-run scope (see `stacked`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

mod stacked;

pub use stacked::StackedCancelable;

/// A one-way switch that releases or interrupts an ongoing operation.
///
/// `cancel` must be idempotent: the second and later calls are no-ops.
/// Propagation is best-effort; implementations must not panic on
/// repeated cancellation.
pub trait Cancelable: Send + Sync {
    /// Requests cancellation.
    fn cancel(&self);
}

/// Shared handle to a cancelation token.
pub type CancelableRef = Arc<dyn Cancelable>;

/// A token that does nothing when canceled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCancelable;

impl Cancelable for NoopCancelable {
    fn cancel(&self) {}
}

/// Returns the inert token.
#[must_use]
pub fn noop() -> CancelableRef {
    Arc::new(NoopCancelable)
}

/// A token that runs a closure at most once when canceled.
pub struct FnCancelable {
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FnCancelable {
    /// Creates a token from the given closure.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Mutex::new(Some(Box::new(f))),
        }
    }

    /// Creates a shared token from the given closure.
    pub fn arc(f: impl FnOnce() + Send + 'static) -> CancelableRef {
        Arc::new(Self::new(f))
    }
}

impl Cancelable for FnCancelable {
    fn cancel(&self) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl core::fmt::Debug for FnCancelable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnCancelable")
            .field("armed", &self.callback.lock().is_some())
            .finish()
    }
}

/// A token that records cancellation in a flag.
///
/// Deferred work polls [`BooleanCancelable::is_canceled`] before running
/// its body; canceling the token turns the pending work into a no-op.
#[derive(Debug, Default)]
pub struct BooleanCancelable {
    canceled: AtomicBool,
}

impl BooleanCancelable {
    /// Creates a fresh, un-canceled flag.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
        }
    }

    /// Creates a shared flag token.
    #[must_use]
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns true once `cancel` has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

impl Cancelable for BooleanCancelable {
    fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }
}

/// A token slot that is assigned after the underlying work is scheduled.
///
/// Registration order sometimes requires parking a token in a scope
/// before the real token exists (a timer id, for example). The slot is
/// pushed first and assigned later; if cancellation arrives in between,
/// the assignment is canceled on the spot. Re-assignment replaces the
/// held token without canceling it.
#[derive(Default)]
pub struct AssignableCancelable {
    inner: Mutex<AssignState>,
}

#[derive(Default)]
enum AssignState {
    #[default]
    Empty,
    Assigned(CancelableRef),
    Canceled,
}

impl AssignableCancelable {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared empty slot.
    #[must_use]
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Assigns the underlying token.
    ///
    /// If the slot was already canceled the token is canceled
    /// immediately.
    pub fn set(&self, token: CancelableRef) {
        let mut state = self.inner.lock();
        match &*state {
            AssignState::Canceled => {
                drop(state);
                token.cancel();
            }
            AssignState::Empty | AssignState::Assigned(_) => {
                *state = AssignState::Assigned(token);
            }
        }
    }
}

impl Cancelable for AssignableCancelable {
    fn cancel(&self) {
        let previous = {
            let mut state = self.inner.lock();
            core::mem::replace(&mut *state, AssignState::Canceled)
        };
        if let AssignState::Assigned(token) = previous {
            token.cancel();
        }
    }
}

impl core::fmt::Debug for AssignableCancelable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match &*self.inner.lock() {
            AssignState::Empty => "empty",
            AssignState::Assigned(_) => "assigned",
            AssignState::Canceled => "canceled",
        };
        f.debug_struct("AssignableCancelable")
            .field("state", &state)
            .finish()
    }
}

/// A token that cancels a fixed batch of children together.
pub struct CompositeCancelable {
    children: Mutex<Option<Vec<CancelableRef>>>,
}

impl CompositeCancelable {
    /// Creates a composite over the given children.
    #[must_use]
    pub fn new(children: Vec<CancelableRef>) -> Self {
        Self {
            children: Mutex::new(Some(children)),
        }
    }

    /// Creates a shared composite over the given children.
    #[must_use]
    pub fn arc(children: Vec<CancelableRef>) -> CancelableRef {
        Arc::new(Self::new(children))
    }
}

impl Cancelable for CompositeCancelable {
    fn cancel(&self) {
        let children = self.children.lock().take();
        if let Some(children) = children {
            for child in children {
                child.cancel();
            }
        }
    }
}

impl core::fmt::Debug for CompositeCancelable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompositeCancelable")
            .field("armed", &self.children.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fn_cancelable_runs_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let token = FnCancelable::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        token.cancel();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn boolean_cancelable_flips_once() {
        let flag = BooleanCancelable::new();
        assert!(!flag.is_canceled());
        flag.cancel();
        assert!(flag.is_canceled());
        flag.cancel();
        assert!(flag.is_canceled());
    }

    #[test]
    fn assignable_cancels_late_assignment() {
        let slot = AssignableCancelable::new();
        slot.cancel();
        let flag = BooleanCancelable::arc();
        slot.set(flag.clone());
        assert!(flag.is_canceled());
    }

    #[test]
    fn assignable_forwards_cancel_to_assigned_token() {
        let slot = AssignableCancelable::new();
        let flag = BooleanCancelable::arc();
        slot.set(flag.clone());
        slot.cancel();
        assert!(flag.is_canceled());
    }

    #[test]
    fn assignable_replacement_does_not_cancel() {
        let slot = AssignableCancelable::new();
        let first = BooleanCancelable::arc();
        let second = BooleanCancelable::arc();
        slot.set(first.clone());
        slot.set(second.clone());
        slot.cancel();
        assert!(!first.is_canceled());
        assert!(second.is_canceled());
    }

    #[test]
    fn composite_cancels_all_children_once() {
        let flags: Vec<Arc<BooleanCancelable>> =
            (0..3).map(|_| BooleanCancelable::arc()).collect();
        let children: Vec<CancelableRef> =
            flags.iter().map(|f| f.clone() as CancelableRef).collect();
        let composite = CompositeCancelable::new(children);
        composite.cancel();
        composite.cancel();
        assert!(flags.iter().all(|f| f.is_canceled()));
    }
}
