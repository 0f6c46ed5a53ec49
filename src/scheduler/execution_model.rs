//! Execution model: the run loop's yield policy.
//!
//! The run loop counts the values it produces through a *frame index*.
//! After each value the index is advanced through
//! [`ExecutionModel::next_frame_index`]; when the index comes back as
//! `0` the loop stops, submits the rest of the work to the scheduler,
//! and returns. That bounds how much synchronous work one run can do
//! per executor tick.
//!
//! # Configuration
//!
//! The default model is batched with a recommended batch size of 1024.
//! [`ExecutionModel::from_env`] applies the `DEFT_RECOMMENDED_BATCH_SIZE`
//! environment variable when set; only set variables are applied, and a
//! set-but-unparseable value is an explicit [`ConfigError`].

use thiserror::Error;

/// Environment variable overriding the recommended batch size.
pub const ENV_RECOMMENDED_BATCH_SIZE: &str = "DEFT_RECOMMENDED_BATCH_SIZE";

/// Error produced when environment configuration cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value for {variable}: {value:?}")]
    InvalidValue {
        /// The offending environment variable.
        variable: &'static str,
        /// The raw value found in the environment.
        value: String,
    },
}

/// How the run loop trades synchronous throughput against fairness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    /// Never force an asynchronous yield; the run loop only suspends at
    /// real asynchronous boundaries. Maximum throughput, no fairness.
    Synchronous,
    /// Force a yield after roughly `recommended_batch_size` values.
    ///
    /// The effective modulus is the next power of two, so the batch
    /// boundary check stays a mask operation.
    Batched {
        /// Preferred number of values between forced yields.
        recommended_batch_size: usize,
    },
    /// Force a yield after every produced value. Maximum fairness,
    /// useful for starvation tests.
    AlwaysAsync,
}

impl ExecutionModel {
    /// The default recommended batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 1024;

    /// Returns a batched model with the given recommended batch size.
    ///
    /// Sizes below 2 are raised to 2; a batch of one is expressed as
    /// [`ExecutionModel::AlwaysAsync`].
    #[must_use]
    pub fn batched(recommended_batch_size: usize) -> Self {
        Self::Batched {
            recommended_batch_size: recommended_batch_size.max(2),
        }
    }

    /// Produces the frame index following `current`.
    ///
    /// A result of `0` instructs the run loop to force an asynchronous
    /// yield before touching the next node.
    #[must_use]
    pub fn next_frame_index(&self, current: u32) -> u32 {
        match self {
            Self::Synchronous => 1,
            Self::AlwaysAsync => 0,
            Self::Batched {
                recommended_batch_size,
            } => current.wrapping_add(1) & Self::modulus(*recommended_batch_size),
        }
    }

    /// Returns the batch size the model recommends to batching
    /// consumers.
    #[must_use]
    pub fn recommended_batch_size(&self) -> usize {
        match self {
            Self::Synchronous => usize::MAX,
            Self::AlwaysAsync => 1,
            Self::Batched {
                recommended_batch_size,
            } => *recommended_batch_size,
        }
    }

    /// Reads the model from the environment, starting from the default.
    ///
    /// Only variables that are set in the environment are applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(ENV_RECOMMENDED_BATCH_SIZE) {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(size) => Ok(Self::batched(size)),
                Err(_) => Err(ConfigError::InvalidValue {
                    variable: ENV_RECOMMENDED_BATCH_SIZE,
                    value: raw,
                }),
            },
            Err(_) => Ok(Self::default()),
        }
    }

    fn modulus(batch: usize) -> u32 {
        (batch.max(2).next_power_of_two() as u32).wrapping_sub(1)
    }
}

impl Default for ExecutionModel {
    fn default() -> Self {
        Self::Batched {
            recommended_batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }
}
