//! Core error types for store and registry operations.
//!
//! Store failures are split into kinds the reconciler can tell apart:
//! not-found and conflict are expected races, everything else is a fault.

use thiserror::Error;

use crate::meta::ObjectKey;

/// Core error type for converge operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("conflict writing {kind} '{key}': {reason}")]
    Conflict {
        kind: String,
        key: ObjectKey,
        reason: String,
    },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: ObjectKey },

    #[error("invalid object: {reason}")]
    Invalid { reason: String },

    // Usage error: a mutation tried to rename or re-namespace an object
    #[error("mutation cannot change object identity: '{before}' became '{after}'")]
    ImmutableIdentity { before: ObjectKey, after: ObjectKey },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("store request failed: {reason}")]
    Store { reason: String },
}

/// Errors raised while resolving a type to its kind identity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("type {type_name} is not registered with any kind")]
    NotRegistered { type_name: &'static str },

    #[error("expected 1 object kind for {type_name}, got {count}")]
    AmbiguousKind {
        type_name: &'static str,
        count: usize,
    },

    #[error("kind {kind} has no constructor")]
    UnknownKind { kind: String },

    #[error("kind {kind} does not construct {type_name}")]
    TypeMismatch {
        kind: String,
        type_name: &'static str,
    },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key,
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: impl Into<String>, key: ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key,
            reason: reason.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key,
        }
    }

    /// Create an invalid object error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a generic store error.
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Whether the object was not found.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a write lost an optimistic-concurrency race.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the object already exists.
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinguishable() {
        let key = ObjectKey::new("ns", "a");
        let not_found = Error::not_found("Widget", key.clone());
        let conflict = Error::conflict("Widget", key, "resourceVersion mismatch");

        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
        assert!(conflict.is_conflict());
        assert!(!Error::store("connection reset").is_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = Error::conflict("Widget", ObjectKey::new("ns", "a"), "stale");
        assert!(err.to_string().contains("ns/a"));
        assert!(err.to_string().contains("stale"));
    }
}
