//! Result type definition and extension traits.
//!
//! Provides combinators for best-effort operations, so callers never need
//! unwrap/expect/panic to discard a failure they can tolerate.

use std::fmt::Display;

use crate::error::Error;

/// The standard Result type for converge core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for Results whose failure is tolerable.
pub trait ResultExt<T> {
    /// Error type carried by the Result.
    type Error;

    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self) -> Option<T>;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Self::Error)>(self, f: F) -> Self;
}

impl<T, E: Display> ResultExt<T> for std::result::Result<T, E> {
    type Error = E;

    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Best-effort operation failed");
                None
            }
        }
    }

    fn inspect_error<F: FnOnce(&Self::Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
