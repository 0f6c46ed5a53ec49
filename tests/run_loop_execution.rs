//! Run-loop execution semantics: stack safety, laziness, the frame
//! budget, forked boundaries, and the eager-sync runner.

mod common;

use common::{lab, lab_with};
use deft::{Callback, ExecutionModel, Fault, SyncMaybe, Task};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn deep_left_leaning_bind_chain_is_stack_safe() {
    let n = 100_000;
    let mut program = Task::now(0_u64);
    for _ in 0..n {
        program = program.flat_map(|x| Task::now(x + 1));
    }
    let (scheduler, handle) = lab();
    let future = program.run_as_future(&handle);
    scheduler.tick();
    assert_eq!(future.value().unwrap().unwrap(), n);
}

#[test]
fn deep_right_nested_bind_chain_is_stack_safe() {
    fn countdown(n: u64) -> Task<u64> {
        Task::now(n).flat_map(|n| {
            if n == 0 {
                Task::now(0)
            } else {
                countdown(n - 1)
            }
        })
    }
    let (scheduler, handle) = lab();
    let future = countdown(100_000).run_as_future(&handle);
    scheduler.tick();
    assert_eq!(future.value().unwrap().unwrap(), 0);
}

#[test]
fn construction_runs_nothing() {
    let touched = Arc::new(AtomicUsize::new(0));
    let probe = touched.clone();
    let _program = Task::eval(move || probe.fetch_add(1, Ordering::SeqCst));
    assert_eq!(touched.load(Ordering::SeqCst), 0);
}

#[test]
fn eval_runs_once_per_run() {
    let counter = Arc::new(AtomicUsize::new(0));
    let probe = counter.clone();
    let program = Task::eval(move || probe.fetch_add(1, Ordering::SeqCst));
    let (scheduler, handle) = lab();

    let first = program.clone().run_as_future(&handle);
    let second = program.run_as_future(&handle);
    scheduler.tick();

    assert_eq!(first.value().unwrap().unwrap(), 0);
    assert_eq!(second.value().unwrap().unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn eval_once_runs_at_most_once_across_runs() {
    let counter = Arc::new(AtomicUsize::new(0));
    let probe = counter.clone();
    let program = Task::eval_once(move || {
        probe.fetch_add(1, Ordering::SeqCst);
        probe.load(Ordering::SeqCst)
    });
    let (scheduler, handle) = lab();

    let first = program.clone().run_as_future(&handle);
    let second = program.run_as_future(&handle);
    scheduler.tick();

    assert_eq!(first.value().unwrap().unwrap(), 1);
    assert_eq!(second.value().unwrap().unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn defer_rebuilds_the_subtree_each_run() {
    let builds = Arc::new(AtomicUsize::new(0));
    let probe = builds.clone();
    let program = Task::defer(move || {
        probe.fetch_add(1, Ordering::SeqCst);
        Task::now(9)
    });
    let (scheduler, handle) = lab();
    let first = program.clone().run_as_future(&handle);
    let second = program.run_as_future(&handle);
    scheduler.tick();
    assert_eq!(first.value().unwrap().unwrap(), 9);
    assert_eq!(second.value().unwrap().unwrap(), 9);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[test]
fn synchronous_model_completes_without_a_tick() {
    let (_scheduler, handle) = lab_with(ExecutionModel::Synchronous);
    let program = Task::now(2).flat_map(|x| Task::now(x * 3)).map(|x| x + 1);
    match program.run_sync_maybe(&handle) {
        SyncMaybe::Value(v) => assert_eq!(v, 7),
        SyncMaybe::Future(_) => panic!("synchronous model must not suspend"),
    }
}

#[test]
fn always_async_model_forces_a_yield_per_value() {
    let (scheduler, handle) = lab_with(ExecutionModel::AlwaysAsync);
    let program = Task::now(1).map(|x| x + 1).map(|x| x + 1);
    let future = program.run_as_future(&handle);
    assert!(future.value().is_none(), "must suspend at the frame budget");
    scheduler.tick();
    assert_eq!(future.value().unwrap().unwrap(), 3);
}

#[test]
fn batched_model_bounds_work_per_tick() {
    let (scheduler, handle) = lab_with(ExecutionModel::batched(4));
    let mut program = Task::now(0_u32);
    for _ in 0..64 {
        program = program.flat_map(|x| Task::now(x + 1));
    }
    let future = program.run_as_future(&handle);
    // The chain is longer than one batch, so the run must have
    // suspended at least once; the queued re-entries land at the same
    // virtual instant and one tick drains the cascade.
    assert!(future.value().is_none());
    scheduler.tick();
    assert_eq!(future.value().unwrap().unwrap(), 64);
}

#[test]
fn immediate_failure_is_delivered_as_a_failed_future() {
    let (_scheduler, handle) = lab();
    let program = Task::<i32>::eval_once(|| panic!("sync fault"));
    match program.run_sync_maybe(&handle) {
        SyncMaybe::Value(_) => panic!("must not be a success"),
        SyncMaybe::Future(future) => {
            let fault = future.value().expect("failure must be delivered").unwrap_err();
            assert!(fault.is_panic());
        }
    }
}

#[test]
fn fork_returns_before_any_bind_runs() {
    let touched = Arc::new(AtomicUsize::new(0));
    let probe = touched.clone();
    let program = Task::now(1)
        .map(move |x| {
            probe.fetch_add(1, Ordering::SeqCst);
            x
        })
        .fork();
    let (scheduler, handle) = lab();
    let future = program.run_as_future(&handle);
    assert_eq!(touched.load(Ordering::SeqCst), 0, "caller returned first");
    assert!(future.value().is_none());
    scheduler.tick();
    assert_eq!(touched.load(Ordering::SeqCst), 1);
    assert_eq!(future.value().unwrap().unwrap(), 1);
}

#[test]
fn fork_of_async_task_is_identity_shaped() {
    let program: Task<i32> = Task::create(|_, _, cb: Callback<i32>| cb.on_success(5)).fork();
    let (scheduler, handle) = lab();
    let future = program.run_as_future(&handle);
    scheduler.tick();
    assert_eq!(future.value().unwrap().unwrap(), 5);
}

#[test]
fn create_registration_never_runs_on_the_caller_thread() {
    let registered = Arc::new(AtomicUsize::new(0));
    let probe = registered.clone();
    let program: Task<i32> = Task::create(move |_, _, cb| {
        probe.fetch_add(1, Ordering::SeqCst);
        cb.on_success(1);
    });
    let (scheduler, handle) = lab();
    let future = program.run_as_future(&handle);
    assert_eq!(registered.load(Ordering::SeqCst), 0, "registration deferred");
    scheduler.tick();
    assert_eq!(registered.load(Ordering::SeqCst), 1);
    assert_eq!(future.value().unwrap().unwrap(), 1);
}

#[test]
fn never_never_completes() {
    let (scheduler, handle) = lab();
    let future = Task::<i32>::never().run_as_future(&handle);
    scheduler.tick();
    assert!(future.value().is_none());
}

#[test]
fn from_future_bridges_a_finished_run() {
    let (scheduler, handle) = lab();
    let source = Task::now(21).run_as_future(&handle);
    scheduler.tick();
    let bridged = Task::from_future(source).map(|x| x * 2);
    let future = bridged.run_as_future(&handle);
    scheduler.tick();
    assert_eq!(future.value().unwrap().unwrap(), 42);
}

#[test]
fn callback_panic_is_reported_not_propagated() {
    let (scheduler, handle) = lab_with(ExecutionModel::Synchronous);
    let _token = Task::now(1).run_with_callback(&handle, Callback::new(|_| panic!("consumer")));
    let failures = scheduler.reported_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind(), deft::FaultKind::CallbackPanicked);
}

#[test]
fn failed_run_delivers_on_error_exactly_once() {
    let (scheduler, handle) = lab();
    let outcomes = Arc::new(AtomicUsize::new(0));
    let probe = outcomes.clone();
    let program = Task::<i32>::fail(Fault::failed("once"));
    let _token = program.run_with_callback(
        &handle,
        Callback::from_handlers(
            |_| panic!("success is impossible"),
            move |_| {
                probe.fetch_add(1, Ordering::SeqCst);
            },
        ),
    );
    scheduler.tick();
    assert_eq!(outcomes.load(Ordering::SeqCst), 1);
}
