//! Registering controllers with a cluster's dispatcher.
//!
//! The dispatcher (work queue, per-key serialization, backoff timers) lives
//! outside this crate. It receives a [`Registration`] per controller and
//! drives it through the object-safe [`ReconcileHandler`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use converge_core::{Client, DynamicObject, Kind, Object, ObjectKey};
use tracing::info;

use crate::actor::Actor;
use crate::config::DispatchOptions;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::filter::{default_filter, ChangeEvent, ChangeFilter};
use crate::options::Options;
use crate::outcome::Outcome;
use crate::recorder::{EventRecorder, TracingRecorder};

/// Entry point a dispatcher calls for each delivered key.
#[async_trait]
pub trait ReconcileHandler: Send + Sync {
    /// Reconcile the object at `key` once.
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome>;
}

/// Handle to a cluster: its store client, event sink and dispatcher.
pub trait Cluster: Send + Sync {
    /// Store client.
    fn client(&self) -> Client;

    /// Event recorder for the named controller.
    fn recorder_for(&self, name: &str) -> Arc<dyn EventRecorder> {
        Arc::new(TracingRecorder::new(name))
    }

    /// Hand a controller to the dispatcher. Names are cluster-unique.
    fn register(&self, registration: Registration) -> Result<()>;
}

/// Everything a dispatcher needs to drive one controller.
pub struct Registration {
    pub name: String,
    /// Kind of the reconciled objects.
    pub kind: Kind,
    /// Zero-value instance of the reconciled type.
    pub template: DynamicObject,
    /// Which changes to the reconciled kind enqueue a key.
    pub filter: Box<dyn ChangeFilter>,
    pub dispatch: DispatchOptions,
    /// Kinds whose changes enqueue their controlling owner.
    pub owns: Vec<Kind>,
    /// Further kinds whose changes enqueue a key.
    pub watches: Vec<Kind>,
    pub handler: Arc<dyn ReconcileHandler>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dispatch", &self.dispatch)
            .field("owns", &self.owns)
            .field("watches", &self.watches)
            .finish_non_exhaustive()
    }
}

/// Customization hook handed to [`Options::with_build_fn`].
#[derive(Debug, Clone, Default)]
pub struct RegistrationBuilder {
    owns: Vec<Kind>,
    watches: Vec<Kind>,
    dispatch: DispatchOptions,
}

impl RegistrationBuilder {
    const fn new(dispatch: DispatchOptions) -> Self {
        Self {
            owns: Vec::new(),
            watches: Vec::new(),
            dispatch,
        }
    }

    /// Reconcile the owner when an object of `kind` it controls changes.
    pub fn owns(&mut self, kind: Kind) -> &mut Self {
        self.owns.push(kind);
        self
    }

    /// Reconcile when an object of `kind` changes.
    pub fn watches(&mut self, kind: Kind) -> &mut Self {
        self.watches.push(kind);
        self
    }

    /// Override dispatcher concurrency and rate limit.
    pub fn with_dispatch_options(&mut self, dispatch: DispatchOptions) -> &mut Self {
        self.dispatch = dispatch;
        self
    }
}

/// Build a controller for `T` and register it with the cluster.
///
/// The name, the configuration and the type registration are validated
/// here; once this returns `Ok`, reconciling never fails for setup reasons.
pub fn setup<T, A>(name: &str, cluster: &dyn Cluster, actor: A, options: Options<T>) -> Result<()>
where
    T: Object + Default,
    A: Actor<T> + 'static,
{
    let mut options = options;
    let filter = options.filter.take().unwrap_or_else(default_filter);
    let mut builder = RegistrationBuilder::new(options.config.dispatch);
    if let Some(build) = options.build_fn.take() {
        build(&mut builder);
    }
    builder.dispatch.validate()?;
    if options.recorder.is_none() {
        options.recorder = Some(cluster.recorder_for(name));
    }

    let controller = Controller::new(name, cluster.client(), actor, options)?;
    let registration = Registration {
        name: name.to_string(),
        kind: controller.kind().clone(),
        template: controller.template()?,
        filter,
        dispatch: builder.dispatch,
        owns: builder.owns,
        watches: builder.watches,
        handler: Arc::new(controller),
    };

    info!(controller = %registration.name, kind = %registration.kind, "Registering controller");
    cluster.register(registration)
}

/// In-process cluster keeping registrations in a map.
///
/// It does not watch or queue anything; callers drive reconciles through
/// [`LocalCluster::reconcile`] or the registered handlers.
pub struct LocalCluster {
    client: Client,
    recorder: Option<Arc<dyn EventRecorder>>,
    registrations: Mutex<BTreeMap<String, Registration>>,
}

impl LocalCluster {
    /// Create a cluster over a store client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            recorder: None,
            registrations: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record events of every controller through `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn registrations(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of registered controllers.
    pub fn names(&self) -> Vec<String> {
        self.registrations().keys().cloned().collect()
    }

    /// The handler registered under `name`.
    pub fn handler(&self, name: &str) -> Option<Arc<dyn ReconcileHandler>> {
        self.registrations().get(name).map(|r| r.handler.clone())
    }

    /// Inspect the registration under `name`.
    pub fn inspect<R>(&self, name: &str, f: impl FnOnce(&Registration) -> R) -> Option<R> {
        self.registrations().get(name).map(f)
    }

    /// Whether the named controller's filter accepts a change.
    pub fn accepts(&self, name: &str, event: &ChangeEvent<'_>) -> Option<bool> {
        self.inspect(name, |r| r.filter.accepts(event))
    }

    /// Run one reconcile of `key` through the named controller.
    pub async fn reconcile(&self, name: &str, key: &ObjectKey) -> Result<Outcome> {
        let handler = self
            .handler(name)
            .ok_or_else(|| Error::config(format!("no controller named '{name}'")))?;
        handler.reconcile(key).await
    }
}

impl Cluster for LocalCluster {
    fn client(&self) -> Client {
        self.client.clone()
    }

    fn recorder_for(&self, name: &str) -> Arc<dyn EventRecorder> {
        match &self.recorder {
            Some(recorder) => recorder.clone(),
            None => Arc::new(TracingRecorder::new(name)),
        }
    }

    fn register(&self, registration: Registration) -> Result<()> {
        let mut registrations = self.registrations();
        if registrations.contains_key(&registration.name) {
            return Err(Error::config(format!(
                "controller '{}' is already registered",
                registration.name
            )));
        }
        registrations.insert(registration.name.clone(), registration);
        Ok(())
    }
}

impl fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCluster")
            .field("client", &self.client)
            .field("controllers", &self.names())
            .finish_non_exhaustive()
    }
}
