//! Event recording for reconcile outcomes.
//!
//! Recording is best-effort: a failing recorder is logged and never changes
//! the outcome of a reconcile.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{Object, ObjectKey, ResultExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ulid::Ulid;

/// Emitted once an object converged without further action.
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
/// Emitted when observing or acting on an object failed.
pub const REASON_RECONCILE_FAIL: &str = "ReconcileFail";
/// Emitted when tearing an object down failed.
pub const REASON_FINALIZE_FAIL: &str = "FinalizeFail";

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Warning => f.write_str("Warning"),
        }
    }
}

/// The object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    pub key: ObjectKey,
    pub uid: Option<String>,
}

impl ObjectReference {
    /// Reference a typed object.
    pub fn of<T: Object>(kind: impl Into<String>, obj: &T) -> Self {
        Self {
            kind: kind.into(),
            key: obj.key(),
            uid: obj.meta().uid.clone(),
        }
    }
}

/// A recorded occurrence on an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub regarding: ObjectReference,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event happening now.
    pub fn new(
        regarding: ObjectReference,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            regarding,
            event_type,
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink for reconcile events.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event.
    async fn record(&self, event: Event) -> converge_core::Result<()>;
}

/// Recorder that writes events to the log. The default.
#[derive(Debug, Clone, Default)]
pub struct TracingRecorder {
    source: String,
}

impl TracingRecorder {
    /// Create a recorder reporting as `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[async_trait]
impl EventRecorder for TracingRecorder {
    async fn record(&self, event: Event) -> converge_core::Result<()> {
        match event.event_type {
            EventType::Normal => tracing::info!(
                source = %self.source,
                kind = %event.regarding.kind,
                object = %event.regarding.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                source = %self.source,
                kind = %event.regarding.kind,
                object = %event.regarding.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
        Ok(())
    }
}

/// In-memory recorder for testing.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    events: RwLock<Vec<Event>>,
}

impl InMemoryRecorder {
    /// Create a new in-memory recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory recorder wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All events recorded so far, oldest first.
    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    /// Reasons of all events recorded so far, oldest first.
    pub async fn reasons(&self) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for InMemoryRecorder {
    async fn record(&self, event: Event) -> converge_core::Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

/// Recorder handle bound to one object.
#[derive(Clone)]
pub struct EventEmitter {
    recorder: Arc<dyn EventRecorder>,
    subject: ObjectReference,
}

impl EventEmitter {
    /// Bind a recorder to an object.
    pub fn new(recorder: Arc<dyn EventRecorder>, subject: ObjectReference) -> Self {
        Self { recorder, subject }
    }

    /// The object events are recorded against.
    pub const fn subject(&self) -> &ObjectReference {
        &self.subject
    }

    /// Record a `Normal` event.
    pub async fn normal(&self, reason: &str, message: impl Into<String>) {
        self.emit(EventType::Normal, reason, message.into()).await;
    }

    /// Record a `Warning` event caused by `cause`.
    pub async fn warning(&self, reason: &str, cause: &(dyn std::error::Error + Send + Sync)) {
        self.emit(EventType::Warning, reason, cause.to_string()).await;
    }

    async fn emit(&self, event_type: EventType, reason: &str, message: String) {
        let event = Event::new(self.subject.clone(), event_type, reason, message);
        let _ = self.recorder.record(event).await.into_option_logged();
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
