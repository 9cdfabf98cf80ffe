//! Scheduling directives returned to the dispatcher.

use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Delay used for every fixed-interval requeue unless configured otherwise.
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(2);

/// What the dispatcher should do with a key after a reconcile invocation.
///
/// An `Err` returned alongside an outcome always means backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Done; nothing scheduled until the next change event.
    Forget,
    /// Re-deliver the key after the given delay.
    RequeueAfter(Duration),
    /// Re-deliver the key on the dispatcher's backoff schedule.
    Backoff,
}

impl Outcome {
    /// The directive a reconcile result maps to.
    pub const fn of(result: &Result<Self>) -> Self {
        match result {
            Ok(outcome) => *outcome,
            Err(_) => Self::Backoff,
        }
    }

    /// Whether the key is dropped from the queue.
    pub const fn is_forget(&self) -> bool {
        matches!(self, Self::Forget)
    }

    /// Requeue delay, if any.
    pub const fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::RequeueAfter(delay) => Some(*delay),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forget => f.write_str("forget"),
            Self::RequeueAfter(delay) => write!(f, "requeue after {delay:?}"),
            Self::Backoff => f.write_str("backoff"),
        }
    }
}
