//! A thread-spawning scheduler.
//!
//! [`SpawnScheduler`] runs every submitted runnable on a freshly
//! spawned thread and implements delays by sleeping on a dedicated
//! timer thread. It is deliberately not a thread pool (pools are an
//! external capability); it exists so that the crate can be exercised
//! under real parallelism without bringing an executor in.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{ExecutionModel, Runnable, Scheduler};
use crate::cancel::{BooleanCancelable, CancelableRef};
use crate::error::Fault;

/// Failure sink used when no custom reporter is installed.
type Reporter = Arc<dyn Fn(Fault) + Send + Sync>;

/// A scheduler that spawns one thread per runnable.
pub struct SpawnScheduler {
    model: ExecutionModel,
    reporter: Option<Reporter>,
}

impl SpawnScheduler {
    /// Creates a scheduler with the default execution model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            model: ExecutionModel::default(),
            reporter: None,
        }
    }

    /// Creates a scheduler with the given execution model.
    #[must_use]
    pub fn with_model(model: ExecutionModel) -> Self {
        Self {
            model,
            reporter: None,
        }
    }

    /// Creates a scheduler with the execution model resolved from the
    /// environment (see
    /// [`ExecutionModel::from_env`](super::ExecutionModel::from_env)).
    pub fn from_env() -> Result<Self, super::ConfigError> {
        Ok(Self::with_model(ExecutionModel::from_env()?))
    }

    /// Installs a sink for uncaught failures.
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl Fn(Fault) + Send + Sync + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    fn spawn_named(&self, name: &str, body: impl FnOnce() + Send + 'static) {
        let spawned = thread::Builder::new()
            .name(name.to_owned())
            .spawn(body);
        if let Err(err) = spawned {
            self.report_failure(Fault::from_error(err).with_context("thread spawn failed"));
        }
    }
}

impl Default for SpawnScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SpawnScheduler {
    fn execute(&self, runnable: Runnable) {
        self.spawn_named("deft-worker", runnable);
    }

    fn schedule_once(&self, delay: Duration, runnable: Runnable) -> CancelableRef {
        let flag = BooleanCancelable::arc();
        let canceled = flag.clone();
        self.spawn_named("deft-timer", move || {
            thread::sleep(delay);
            if !canceled.is_canceled() {
                runnable();
            }
        });
        flag
    }

    fn report_failure(&self, fault: Fault) {
        match &self.reporter {
            Some(reporter) => reporter(fault),
            None => {
                crate::tracing_compat::error!("uncaught failure: {}", fault);
            }
        }
    }

    fn execution_model(&self) -> ExecutionModel {
        self.model
    }
}

impl core::fmt::Debug for SpawnScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpawnScheduler")
            .field("model", &self.model)
            .finish()
    }
}
