//! The pluggable domain-logic contract.

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;
use converge_core::Object;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::error::Result;

/// Domain logic driving one object type towards its desired state.
///
/// `observe` reads and reports; it may update the object's status locally,
/// and returns at most one [`Action`] when the object has not converged.
/// `finalize` drives teardown and must be idempotent: it is called again
/// until it reports completion.
#[async_trait]
pub trait Actor<T: Object>: Send + Sync {
    /// Compare actual and desired state, returning the corrective action.
    async fn observe(&self, ctx: &mut Context<T>) -> Result<Option<Action<T>>>;

    /// Perform teardown work, returning whether it is complete.
    async fn finalize(&self, ctx: &mut Context<T>) -> Result<bool>;
}

type ActionFn<T> = Box<dyn for<'a> FnOnce(&'a mut Context<T>) -> BoxFuture<'a, Result<()>> + Send>;

/// A named unit of corrective work.
///
/// ```ignore
/// Action::new("scale", |ctx| Box::pin(async move {
///     ctx.client.patch(&mut ctx.obj, |w| { w.spec.replicas = 3; Ok(()) }).await?;
///     Ok(())
/// }))
/// ```
pub struct Action<T: Object> {
    name: Cow<'static, str>,
    run: ActionFn<T>,
}

impl<T: Object> Action<T> {
    /// Create an action.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, run: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut Context<T>) -> BoxFuture<'a, Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    /// Name of the action, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the action against the context.
    pub async fn execute(self, ctx: &mut Context<T>) -> Result<()> {
        (self.run)(ctx).await
    }
}

impl<T: Object> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
