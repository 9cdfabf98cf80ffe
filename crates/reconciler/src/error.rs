//! Error types for the reconciler crate.
//!
//! Store races (conflicts) and resync requests travel as errors inside the
//! reconcile call chain but are absorbed into scheduling directives before
//! they reach the dispatcher. Only genuine faults propagate.

use std::backtrace::Backtrace;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Store or registry failure.
    #[error(transparent)]
    Core(#[from] converge_core::Error),

    /// Explicit request to reconcile again later; never logged as a failure.
    #[error("reconcile error: {message}, retry after {:?}", .requeue_after.unwrap_or_default())]
    Resync {
        message: String,
        requeue_after: Option<Duration>,
    },

    /// A dependency could not be evaluated.
    #[error("error waiting dependencies to be ready: {source}")]
    Dependency { source: Box<Error> },

    /// Failure already logged with its diagnostic trace.
    #[error("{message}")]
    Traced { message: String, trace: String },

    /// Domain failure raised by actor code.
    #[error(transparent)]
    Domain(#[from] anyhow::Error),

    /// Invalid setup or configuration.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// The invocation was cancelled before it completed.
    #[error("reconcile cancelled")]
    Cancelled,
}

impl Error {
    /// Request a resync after `requeue_after`.
    pub fn resync(message: impl Into<String>, requeue_after: Duration) -> Self {
        Self::Resync {
            message: message.into(),
            requeue_after: Some(requeue_after),
        }
    }

    /// Request a resync on the dispatcher's backoff schedule.
    pub fn resync_with_backoff(message: impl Into<String>) -> Self {
        Self::Resync {
            message: message.into(),
            requeue_after: None,
        }
    }

    /// Capture the current backtrace alongside a failure.
    pub fn traced(err: impl std::fmt::Display) -> Self {
        Self::Traced {
            message: err.to_string(),
            trace: Backtrace::force_capture().to_string(),
        }
    }

    /// Create a domain error from a message.
    pub fn domain(message: impl std::fmt::Display) -> Self {
        Self::Domain(anyhow::anyhow!("{message}"))
    }

    /// Wrap a dependency evaluation failure.
    pub fn dependency(source: Self) -> Self {
        Self::Dependency {
            source: Box::new(source),
        }
    }

    /// Create an invalid config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether a write lost an optimistic-concurrency race, looking through
    /// `anyhow` chains raised by actor code.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Core(e) => e.is_conflict(),
            Self::Domain(e) => e.chain().any(|cause| {
                cause
                    .downcast_ref::<converge_core::Error>()
                    .is_some_and(converge_core::Error::is_conflict)
                    || cause.downcast_ref::<Self>().is_some_and(Self::is_conflict)
            }),
            _ => false,
        }
    }

    /// Whether the object was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_not_found())
    }

    /// The requested resync delay, if this is a resync request.
    ///
    /// `Some(None)` asks for the dispatcher's backoff schedule.
    pub fn requested_resync(&self) -> Option<Option<Duration>> {
        match self {
            Self::Resync { requeue_after, .. } => Some(*requeue_after),
            Self::Domain(e) => e
                .chain()
                .find_map(|cause| cause.downcast_ref::<Self>())
                .and_then(Self::requested_resync),
            _ => None,
        }
    }

    /// The captured trace, if the failure carries one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Traced { trace, .. } => Some(trace),
            Self::Domain(e) => e
                .chain()
                .find_map(|cause| cause.downcast_ref::<Self>())
                .and_then(Self::trace),
            _ => None,
        }
    }
}
