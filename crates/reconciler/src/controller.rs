//! The per-object reconcile loop.
//!
//! One invocation handles one key: fetch, branch on deletion, gate on
//! dependencies, ensure the finalizer, observe, record conditions, act. Every
//! path ends in an [`Outcome`]; expected races (conflicts, resync requests)
//! are absorbed into requeues and only genuine faults are returned as errors.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use converge_core::{Client, Condition, DynamicObject, Kind, Object, ObjectFactory, ObjectKey};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::actor::Actor;
use crate::context::Context;
use crate::dependency::{wait_dependencies, Dependencies};
use crate::error::{Error, Result};
use crate::finalizer::Finalizer;
use crate::options::{Capabilities, Options};
use crate::outcome::Outcome;
use crate::recorder::{
    EventRecorder, TracingRecorder, REASON_FINALIZE_FAIL, REASON_RECONCILE_FAIL,
    REASON_RECONCILE_SUCCESS,
};
use crate::setup::ReconcileHandler;

/// Which actor call produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reconcile,
    Finalize,
}

/// Reconciles objects of type `T` with an [`Actor`].
pub struct Controller<T: Object> {
    name: String,
    client: Client,
    factory: ObjectFactory<T>,
    actor: Arc<dyn Actor<T>>,
    recorder: Arc<dyn EventRecorder>,
    finalizer: Finalizer,
    capabilities: Capabilities<T>,
    skip_status_sync: bool,
    requeue_after: Duration,
}

impl<T: Object + Default> Controller<T> {
    /// Build a controller, validating the name, the configuration and the
    /// type registration up front.
    pub fn new(
        name: impl Into<String>,
        client: Client,
        actor: impl Actor<T> + 'static,
        options: Options<T>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        options.config.validate()?;

        let factory = client
            .scheme()
            .factory_for::<T>()
            .map_err(|e| Error::config(format!("controller '{name}': {e}")))?;

        let config = options.config;
        let finalizer = Finalizer::new(&config.finalizer_prefix, &name)
            .skip_ensure(config.skip_finalizer)
            .skip_patch(config.skip_patch_finalizer);
        let recorder = options
            .recorder
            .unwrap_or_else(|| Arc::new(TracingRecorder::new(name.clone())));

        Ok(Self {
            name,
            client,
            factory,
            actor: Arc::new(actor),
            recorder,
            finalizer,
            capabilities: options.capabilities,
            skip_status_sync: config.skip_status_sync,
            requeue_after: config.requeue_after,
        })
    }
}

impl<T: Object> Controller<T> {
    /// Cluster-unique controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the reconciled objects.
    pub const fn kind(&self) -> &Kind {
        self.factory.kind()
    }

    /// Zero-value instance of the reconciled type.
    pub fn template(&self) -> Result<DynamicObject> {
        Ok(DynamicObject::from_typed(
            self.kind().clone(),
            &self.factory.new_object(),
        )?)
    }

    /// The finalizer marker this controller maintains.
    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    /// Reconcile the object at `key` once.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        let span = info_span!(
            "reconcile",
            controller = %self.name,
            namespace = %key.namespace,
            name = %key.name
        );
        self.reconcile_object(key).instrument(span).await
    }

    /// Reconcile once, giving up when `cancelled` completes first.
    pub async fn reconcile_until<F>(&self, key: &ObjectKey, cancelled: F) -> Result<Outcome>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            biased;
            () = cancelled => {
                warn!(controller = %self.name, key = %key, "Reconcile cancelled");
                Err(Error::Cancelled)
            }
            result = self.reconcile(key) => result,
        }
    }

    const fn requeue(&self) -> Outcome {
        Outcome::RequeueAfter(self.requeue_after)
    }

    async fn reconcile_object(&self, key: &ObjectKey) -> Result<Outcome> {
        debug!("Start reconciling");

        let obj: T = match self.client.get(key).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!("Object not found, forgetting");
                return Ok(Outcome::Forget);
            }
            Err(e) => return Err(e.into()),
        };
        let mut ctx = Context::new(obj, self.kind(), self.client.clone(), self.recorder.clone())?;

        if ctx.obj.meta().is_deleting() {
            return self.finalize(&mut ctx).await;
        }

        if let Some(dependencies) = self.capabilities.dependencies(&ctx.obj) {
            let mut resolved = Dependencies::default();
            if !wait_dependencies(&dependencies, &ctx.client, &mut resolved).await? {
                info!("Dependencies not ready, retrying");
                return Ok(self.requeue());
            }
            ctx.deps = Some(resolved);
        }

        if let Err(e) = self.finalizer.ensure(&mut ctx).await {
            return self.write_failed(e, "add finalizer");
        }

        let action = match self.actor.observe(&mut ctx).await {
            Ok(action) => action,
            Err(e) => return self.process_actor_error(&mut ctx, e, Phase::Reconcile).await,
        };
        let generation = ctx.generation();

        let Some(action) = action else {
            info!("Object is synced, waiting for the next change");
            ctx.events
                .normal(REASON_RECONCILE_SUCCESS, "object is synced")
                .await;
            if let Err(e) = self.sync_status(&mut ctx, Condition::synced(true, generation)).await {
                return self.write_failed(e, "update status");
            }
            return Ok(Outcome::Forget);
        };

        if let Err(e) = self.sync_status(&mut ctx, Condition::synced(false, generation)).await {
            return self.write_failed(e, "update status");
        }

        debug!(action = %action.name(), "Executing action");
        if let Err(e) = action.execute(&mut ctx).await {
            return self.process_actor_error(&mut ctx, e, Phase::Reconcile).await;
        }
        Ok(self.requeue())
    }

    async fn finalize(&self, ctx: &mut Context<T>) -> Result<Outcome> {
        if !self.finalizer.should_finalize(ctx.obj.meta()) {
            debug!(marker = %self.finalizer.marker(), "No finalizer of this controller, forgetting");
            return Ok(Outcome::Forget);
        }

        let done = match self.actor.finalize(ctx).await {
            Ok(done) => done,
            Err(e) => return self.process_actor_error(ctx, e, Phase::Finalize).await,
        };
        if !done {
            info!("Finalizing not complete, retrying");
            return Ok(self.requeue());
        }

        info!("Finalizing complete, removing finalizer");
        match self.finalizer.remove(ctx).await {
            Ok(_) => Ok(Outcome::Forget),
            Err(e) if e.is_conflict() => {
                debug!(error = %e, "Conflict removing finalizer, retrying");
                Ok(self.requeue())
            }
            Err(e) => {
                ctx.events.warning(REASON_FINALIZE_FAIL, &e).await;
                warn!(error = %e, "Failed to remove finalizer");
                Err(e)
            }
        }
    }

    /// Upsert the condition if tracked and write the status back.
    async fn sync_status(&self, ctx: &mut Context<T>, condition: Condition) -> Result<()> {
        self.capabilities.set_condition(&mut ctx.obj, condition);
        if self.skip_status_sync {
            return Ok(());
        }
        if ctx.sync_status().await? {
            debug!("Status updated");
        }
        Ok(())
    }

    fn write_failed(&self, err: Error, operation: &str) -> Result<Outcome> {
        if err.is_conflict() {
            debug!(operation, error = %err, "Write conflict, retrying");
            return Ok(self.requeue());
        }
        warn!(operation, error = %err, "Write failed");
        Err(err)
    }

    async fn process_actor_error(
        &self,
        ctx: &mut Context<T>,
        err: Error,
        phase: Phase,
    ) -> Result<Outcome> {
        if let Some(delay) = err.requested_resync() {
            debug!(detail = %err, "Actor requested resync");
            return Ok(delay.map_or(Outcome::Backoff, Outcome::RequeueAfter));
        }
        if err.is_conflict() {
            debug!(detail = %err, "Conflict during reconcile, retrying");
            return Ok(self.requeue());
        }

        match phase {
            Phase::Reconcile => {
                ctx.events.warning(REASON_RECONCILE_FAIL, &err).await;
                let condition = Condition::synced(false, ctx.generation())
                    .with_message(format!("Last error: {err}"));
                if let Err(write) = self.sync_status(ctx, condition).await {
                    return self.write_failed(write, "record error");
                }
            }
            Phase::Finalize => ctx.events.warning(REASON_FINALIZE_FAIL, &err).await,
        }

        if let Some(trace) = err.trace() {
            error!(?phase, error = %err, trace, "Actor failed");
            return Ok(Outcome::Backoff);
        }
        warn!(?phase, error = %err, "Actor failed");
        Err(err)
    }
}

#[async_trait]
impl<T: Object> ReconcileHandler for Controller<T> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        Controller::reconcile(self, key).await
    }
}

impl<T: Object> fmt::Debug for Controller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("kind", self.kind())
            .field("finalizer", &self.finalizer)
            .field("capabilities", &self.capabilities)
            .field("skip_status_sync", &self.skip_status_sync)
            .field("requeue_after", &self.requeue_after)
            .finish_non_exhaustive()
    }
}

/// Controller names become part of the finalizer marker.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "controller name '{name}' must be non-empty and use only [A-Za-z0-9._-]"
        )))
    }
}
