//! Tracing compatibility layer for structured logging.
//!
//! Provides a unified interface that works whether or not the
//! `tracing-integration` feature is enabled:
//!
//! - **With the feature**: re-exports the event macros from `tracing`.
//! - **Without it**: no-op macros that compile to nothing.
//!
//! ```rust,ignore
//! use deft::tracing_compat::{debug, trace};
//!
//! trace!("forcing asynchronous yield");
//! debug!(tokens = n, "cancelling scope");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    // Re-export the macros at module level so call sites can path
    // through `crate::tracing_compat` in both configurations.
    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
