//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use deft::lab::TestScheduler;
use deft::{Attempt, ExecutionModel, SchedulerRef, Task, Value};

/// A fresh lab scheduler plus its trait-object handle.
pub fn lab() -> (TestScheduler, SchedulerRef) {
    lab_with(ExecutionModel::default())
}

/// A fresh lab scheduler with the given execution model.
pub fn lab_with(model: ExecutionModel) -> (TestScheduler, SchedulerRef) {
    let scheduler = TestScheduler::with_model(model);
    let handle: SchedulerRef = Arc::new(scheduler.clone());
    (scheduler, handle)
}

/// Runs an untimed program to completion on a lab scheduler and
/// returns its outcome, `None` if it never delivered.
pub fn run_outcome<A: Value>(task: Task<A>, model: ExecutionModel) -> Option<Attempt<A>> {
    let (scheduler, handle) = lab_with(model);
    let future = task.run_as_future(&handle);
    scheduler.tick();
    future.value()
}

/// Like [`run_outcome`], flattening faults to their display text so
/// outcomes are comparable with `assert_eq!`.
pub fn run_flat<A: Value>(task: Task<A>, model: ExecutionModel) -> Option<Result<A, String>> {
    run_outcome(task, model).map(|outcome| outcome.map_err(|fault| fault.to_string()))
}

/// The three yield policies every law should hold under.
pub fn all_models() -> [ExecutionModel; 3] {
    [
        ExecutionModel::Synchronous,
        ExecutionModel::batched(4),
        ExecutionModel::AlwaysAsync,
    ]
}
