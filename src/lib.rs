//! Deft: lazy, cancelable deferred-effect tasks for Rust.
//!
//! # Overview
//!
//! A [`Task<A>`] is an immutable description of a possibly-asynchronous
//! computation. Building one executes nothing; running one against a
//! [`Scheduler`] interprets the program tree through a stack-safe
//! trampoline and eventually delivers either a success of `A` or a
//! [`Fault`] — through a one-shot [`Callback`], a [`CancelableFuture`],
//! or synchronously when no asynchronous boundary is crossed.
//!
//! # Core Guarantees
//!
//! - **Laziness**: construction is pure; effects run only when a run
//!   entry point is invoked, once per run
//! - **Stack safety**: `flat_map` chains of any depth and nesting
//!   interpret iteratively; binds are re-associated at build time
//! - **Cooperative yielding**: the [`ExecutionModel`] frame budget
//!   bounds synchronous work per executor tick
//! - **Cancel-correctness**: every run owns a [`StackedCancelable`]
//!   scope; a canceled run stops at the next suspension point and
//!   delivers nothing
//! - **At-most-once completion**: callbacks are consumed by value;
//!   duplicate completions cannot be expressed
//! - **Memoization**: [`Task::memoize`] evaluates once under arbitrary
//!   concurrency and shares the outcome with every waiter
//! - **Deterministic testing**: the [`lab`] scheduler drives virtual
//!   time for exactly reproducible timing tests
//!
//! # Module Structure
//!
//! - [`task`]: the `Task` type, builders, combinators, run entry points
//! - [`callback`]: one-shot completion sinks
//! - [`cancel`]: cancellation tokens and the per-run scope
//! - [`scheduler`]: the execution capability and its yield policy
//! - [`combinator`]: parallel pairing, sequencing, racing
//! - [`future`]: promise-backed cancelable futures
//! - [`lab`]: deterministic virtual-time scheduler for tests
//! - [`error`]: the `Fault` error object
//! - [`tracing_compat`]: optional structured logging

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod callback;
pub mod cancel;
pub mod combinator;
pub mod error;
pub mod future;
pub mod lab;
pub mod scheduler;
pub mod task;
pub mod tracing_compat;

// Re-exports for convenient access to core types
pub use callback::Callback;
pub use cancel::{BooleanCancelable, Cancelable, CancelableRef, StackedCancelable};
pub use combinator::{first_completed_of, map_both, sequence};
pub use error::{Fault, FaultKind, PanicPayload};
pub use future::CancelableFuture;
pub use scheduler::{ExecutionModel, Runnable, Scheduler, SchedulerRef, SpawnScheduler};
pub use task::{Attempt, SyncMaybe, Task, Value};
