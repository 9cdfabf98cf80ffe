//! Finalizer-aware reconcile loop for versioned resource records.
//!
//! A [`Controller`] drives one object type towards its desired state:
//!
//! 1. Fetch the object by key; a missing object is forgotten
//! 2. Objects being deleted go through the finalizer path
//! 3. Declared dependencies must be ready before anything else happens
//! 4. The controller's finalizer marker is ensured
//! 5. The [`Actor`] observes the object and may return one [`Action`]
//! 6. The `Synced` condition is recorded and the action executed
//!
//! Each invocation yields an [`Outcome`] for the dispatcher. Write conflicts
//! and resync requests become requeues; only genuine faults are errors.
//!
//! # Example
//!
//! ```ignore
//! use converge_reconciler::{setup, Action, Actor, Capabilities, Context, LocalCluster, Options};
//!
//! struct Scaler;
//!
//! #[async_trait::async_trait]
//! impl Actor<Widget> for Scaler {
//!     async fn observe(&self, ctx: &mut Context<Widget>) -> Result<Option<Action<Widget>>> {
//!         if ctx.obj.status.ready_replicas == ctx.obj.spec.replicas {
//!             return Ok(None);
//!         }
//!         Ok(Some(Action::new("scale", |ctx| Box::pin(async move {
//!             let replicas = ctx.obj.spec.replicas;
//!             ctx.client.patch_status(&mut ctx.obj, |w| {
//!                 w.status.ready_replicas = replicas;
//!                 Ok(())
//!             }).await?;
//!             Ok(())
//!         }))))
//!     }
//!
//!     async fn finalize(&self, _ctx: &mut Context<Widget>) -> Result<bool> {
//!         Ok(true)
//!     }
//! }
//!
//! let cluster = LocalCluster::new(client);
//! setup("widgets", &cluster, Scaler, Options::new().with_capabilities(Capabilities::none().conditional()))?;
//! let outcome = cluster.reconcile("widgets", &key).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod actor;
pub mod config;
pub mod context;
pub mod controller;
pub mod dependency;
pub mod error;
pub mod filter;
pub mod finalizer;
pub mod options;
pub mod outcome;
pub mod recorder;
pub mod setup;

#[cfg(test)]
pub(crate) mod testing;

pub use actor::{Action, Actor};
pub use config::{ControllerConfig, DispatchOptions, RateLimit};
pub use context::{Context, ScopedClient};
pub use controller::Controller;
pub use dependency::{wait_dependencies, Dependant, Dependencies, Dependency, ObjectDependency};
pub use error::{Error, Result};
pub use filter::{
    default_filter, AnnotationChanged, And, ChangeEvent, ChangeFilter, GenerationChanged,
    LabelChanged, Or,
};
pub use finalizer::{Finalizer, TeardownState, DEFAULT_FINALIZER_PREFIX};
pub use options::{Capabilities, Options};
pub use outcome::{Outcome, DEFAULT_REQUEUE_AFTER};
pub use recorder::{
    Event, EventEmitter, EventRecorder, EventType, InMemoryRecorder, ObjectReference,
    TracingRecorder, REASON_FINALIZE_FAIL, REASON_RECONCILE_FAIL, REASON_RECONCILE_SUCCESS,
};
pub use setup::{setup, Cluster, LocalCluster, ReconcileHandler, Registration, RegistrationBuilder};
