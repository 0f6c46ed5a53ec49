//! Deterministic lab scheduler for testing.
//!
//! The lab provides [`TestScheduler`], a [`Scheduler`](crate::Scheduler)
//! driven by virtual time: runnables queue in deterministic
//! `(due, submission)` order and nothing executes until the test drives
//! the clock with `tick`/`advance`. Timing-sensitive behavior — delays,
//! races, cancellation windows, forced yields — becomes exactly
//! reproducible.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use deft::{lab::TestScheduler, SchedulerRef, Task};
//!
//! let scheduler = TestScheduler::new();
//! let sched: SchedulerRef = Arc::new(scheduler.clone());
//!
//! let future = Task::sleep(Duration::from_millis(10))
//!     .map(|()| 1)
//!     .run_as_future(&sched);
//!
//! scheduler.advance(Duration::from_millis(5));
//! assert!(future.value().is_none());
//! scheduler.advance(Duration::from_millis(5));
//! assert_eq!(future.value().unwrap().unwrap(), 1);
//! ```

mod scheduler;

pub use scheduler::TestScheduler;
