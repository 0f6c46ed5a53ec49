//! The execution capability behind every run.
//!
//! A [`Scheduler`] bundles the four things a run of a task needs from
//! its environment: an executor (`execute`), a timer (`schedule_once`),
//! a sink for failures that no callback can receive (`report_failure`),
//! and a yield policy ([`ExecutionModel`]). It is passed explicitly to
//! every run entry point; there is no ambient global.
//!
//! `execute` must be non-reentrant: the runnable runs at some later
//! point on an executor thread, never inline in the caller.

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelableRef;
use crate::error::Fault;

mod execution_model;
mod spawn;

pub use execution_model::{ConfigError, ExecutionModel, ENV_RECOMMENDED_BATCH_SIZE};
pub use spawn::SpawnScheduler;

/// A deferred unit of work.
pub type Runnable = Box<dyn FnOnce() + Send>;

/// The execution capability: executor, timer, failure sink, yield policy.
pub trait Scheduler: Send + Sync {
    /// Schedules the runnable for asynchronous execution.
    fn execute(&self, runnable: Runnable);

    /// Delivers the runnable after the given delay.
    ///
    /// The returned token removes or neutralizes the pending delivery
    /// when canceled.
    fn schedule_once(&self, delay: Duration, runnable: Runnable) -> CancelableRef;

    /// Surfaces a failure that has no callback left to receive it.
    fn report_failure(&self, fault: Fault);

    /// Returns the yield policy runs on this scheduler should follow.
    fn execution_model(&self) -> ExecutionModel;
}

/// Shared handle to a scheduler.
pub type SchedulerRef = Arc<dyn Scheduler>;
