//! Racing: run many tasks, first completion wins.
//!
//! [`first_completed_of`] starts every task asynchronously under its
//! own child scope. A single atomic `active` flag decides the winner:
//! the first completion — success *or* failure — flips it, cancels all
//! sibling scopes, and delivers. Completions that lose the flip are
//! dropped; losing failures are routed to
//! [`Scheduler::report_failure`](crate::Scheduler::report_failure) so
//! they are never silently lost, but they cannot surface on the
//! winner's callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::Callback;
use crate::cancel::{CancelableRef, CompositeCancelable, StackedCancelable};
use crate::task::{start_with_conn, Task, Value};

/// Runs the tasks in parallel and completes with the first outcome,
/// canceling the rest.
///
/// An empty input never completes.
pub fn first_completed_of<A: Value>(tasks: Vec<Task<A>>) -> Task<A> {
    Task::unsafe_create(move |scheduler, conn, cb| {
        let active = Arc::new(AtomicBool::new(true));
        let sink = Arc::new(Mutex::new(Some(cb)));

        let child_conns: Vec<StackedCancelable> = tasks
            .iter()
            .map(|_| StackedCancelable::with_reporter(scheduler.clone()))
            .collect();
        conn.push(CompositeCancelable::arc(
            child_conns
                .iter()
                .map(|child| Arc::new(child.clone()) as CancelableRef)
                .collect(),
        ));

        for (index, task) in tasks.iter().enumerate() {
            let task = task.clone();
            let active = active.clone();
            let sink = sink.clone();
            let parent = conn.clone();
            let siblings = child_conns.clone();
            let child_conn = child_conns[index].clone();
            let child_scheduler = scheduler.clone();
            let race_scheduler = scheduler.clone();
            scheduler.execute(Box::new(move || {
                if child_conn.is_canceled() {
                    return;
                }
                let finish = Callback::new(move |outcome| {
                    if active.swap(false, Ordering::AcqRel) {
                        for (i, sibling) in siblings.iter().enumerate() {
                            if i != index {
                                sibling.cancel();
                            }
                        }
                        let _ = parent.pop();
                        let taken = sink.lock().take();
                        if let Some(cb) = taken {
                            cb.complete(outcome);
                        }
                    } else if let Err(fault) = outcome {
                        race_scheduler.report_failure(fault);
                    }
                });
                start_with_conn(task, &child_scheduler, &child_conn, finish);
            }));
        }
    })
}
