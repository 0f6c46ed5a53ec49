//! Error types and error handling strategy for deft.
//!
//! This module defines [`Fault`], the error object carried by a failed
//! task. Error handling follows these principles:
//!
//! - Failures are values: a failed task delivers a `Fault` through the
//!   run loop, it does not unwind the caller.
//! - Unwinding panics inside user thunks and bind functions are caught
//!   at the smallest possible scope and reified as `Fault`s with a
//!   [`PanicPayload`]; non-unwinding failures (aborts, OOM) propagate.
//! - `Fault` is cheap to clone (`Arc`-backed source chain) because
//!   memoized results fan a single failure out to many waiters.

use core::fmt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// The kind of fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Failure raised deliberately through [`Task::fail`](crate::Task::fail).
    Failed,
    /// A user thunk or bind function panicked and the panic was caught.
    Panicked,
    /// A deadline elapsed before the task completed.
    Timeout,
    /// An asynchronous register attempted a second completion.
    DoubleCompletion,
    /// A consumer-supplied callback handler panicked.
    CallbackPanicked,
}

/// Payload from a caught panic.
///
/// Wraps the panic value for transport across thread boundaries. Only
/// `&str` and `String` payloads are preserved textually; anything else
/// is recorded as opaque.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a payload from the boxed value produced by `catch_unwind`.
    #[must_use]
    pub fn from_any(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_owned());
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// The error object carried by a failed task.
#[derive(Debug, Clone)]
pub struct Fault {
    kind: FaultKind,
    context: Option<String>,
    panic: Option<PanicPayload>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Fault {
    /// Creates a new fault with the given kind.
    #[must_use]
    pub const fn new(kind: FaultKind) -> Self {
        Self {
            kind,
            context: None,
            panic: None,
            source: None,
        }
    }

    /// Creates a user-level failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Failed).with_context(message)
    }

    /// Creates a fault wrapping an arbitrary error value.
    #[must_use]
    pub fn from_error(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(FaultKind::Failed).with_source(source)
    }

    /// Reifies the boxed value produced by `catch_unwind`.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let mut fault = Self::new(FaultKind::Panicked);
        fault.panic = Some(PanicPayload::from_any(payload.as_ref()));
        fault
    }

    /// Creates a timeout fault for the given deadline.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(FaultKind::Timeout).with_context(format!("timed out after {after:?}"))
    }

    /// Creates a fault describing a second completion of a one-shot sink.
    #[must_use]
    pub fn double_completion() -> Self {
        Self::new(FaultKind::DoubleCompletion)
    }

    /// Creates a fault describing a panic inside a consumer callback.
    #[must_use]
    pub fn callback_panicked(payload: PanicPayload) -> Self {
        let mut fault = Self::new(FaultKind::CallbackPanicked);
        fault.panic = Some(payload);
        fault
    }

    /// Returns the fault kind.
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Returns true if this fault was reified from a caught panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self.kind, FaultKind::Panicked | FaultKind::CallbackPanicked)
    }

    /// Returns true if this fault represents an elapsed deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, FaultKind::Timeout)
    }

    /// Returns the caught panic payload, if any.
    #[must_use]
    pub fn panic_payload(&self) -> Option<&PanicPayload> {
        self.panic.as_ref()
    }

    /// Adds context text to the fault.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        if let Some(panic) = &self.panic {
            write!(f, ": {panic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for lifting foreign `Result`s into fault-carrying ones.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T, Fault>;
}

impl<T, E: Into<Fault>> ResultExt<T> for Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T, Fault> {
        self.map_err(|e| e.into().with_context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let fault = Fault::new(FaultKind::Failed);
        assert_eq!(fault.to_string(), "Failed");
    }

    #[test]
    fn display_with_context() {
        let fault = Fault::failed("boom");
        assert_eq!(fault.to_string(), "Failed: boom");
    }

    #[test]
    fn source_chain_is_exposed() {
        let fault = Fault::from_error(Underlying).with_context("outer");
        let source = fault.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn panic_payload_preserves_str_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("it broke");
        let fault = Fault::from_panic(boxed);
        assert!(fault.is_panic());
        assert_eq!(fault.panic_payload().unwrap().message(), "it broke");
    }

    #[test]
    fn panic_payload_preserves_string_messages() {
        let boxed: Box<dyn Any + Send> = Box::new(String::from("stringy"));
        let fault = Fault::from_panic(boxed);
        assert_eq!(fault.panic_payload().unwrap().message(), "stringy");
    }

    #[test]
    fn panic_payload_opaque_fallback() {
        let boxed: Box<dyn Any + Send> = Box::new(17_u32);
        let fault = Fault::from_panic(boxed);
        assert_eq!(
            fault.panic_payload().unwrap().message(),
            "opaque panic payload"
        );
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Fault::timeout(Duration::from_millis(5)).is_timeout());
        assert!(!Fault::failed("x").is_timeout());
        assert!(!Fault::failed("x").is_panic());
    }
}
