//! Shared fixtures for reconciler integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use converge_core::{
    Client, Condition, ConditionStatus, Conditional, ConditionalStatus, DynamicObject,
    InMemoryStore, Kind, ListParams, Object, ObjectKey, ObjectMeta, Patch, Scheme, Store,
    Subresource, CONDITION_TYPE_READY,
};
use converge_reconciler::{
    Action, Actor, Capabilities, Context, Controller, Dependant, Dependency, Error,
    InMemoryRecorder, ObjectDependency, Options, Result,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const NAMESPACE: &str = "default";
pub const CONTROLLER: &str = "widgets";
pub const MARKER: &str = "converge.io/widgets";

/// Install a test subscriber once; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn widget_kind() -> Kind {
    Kind::new("demo.io", "v1", "Widget")
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

// ==========================================================================
// Widget fixture
// ==========================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WidgetSpec,
    #[serde(default)]
    pub status: WidgetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSpec {
    pub replicas: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetStatus {
    #[serde(flatten)]
    pub conditional: ConditionalStatus,
    #[serde(default)]
    pub ready_replicas: u32,
}

impl Widget {
    pub fn new(name: &str, replicas: u32) -> Self {
        Self {
            metadata: ObjectMeta::new(&key(name)),
            spec: WidgetSpec {
                replicas,
                depends_on: Vec::new(),
            },
            status: WidgetStatus::default(),
        }
    }

    /// A widget whose observed replicas already match.
    pub fn converged(name: &str, replicas: u32) -> Self {
        let mut widget = Self::new(name, replicas);
        widget.status.ready_replicas = replicas;
        widget
    }

    #[must_use]
    pub fn with_finalizer(mut self, marker: &str) -> Self {
        self.metadata.finalizers.push(marker.to_string());
        self
    }

    #[must_use]
    pub fn depending_on(mut self, names: &[&str]) -> Self {
        self.spec.depends_on = names.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn ready(mut self, ready: bool) -> Self {
        self.status
            .conditional
            .set_condition(Condition::new(CONDITION_TYPE_READY, ready.into()));
        self
    }

    pub fn synced_status(&self) -> Option<ConditionStatus> {
        self.condition(converge_core::CONDITION_TYPE_SYNCED)
            .map(|c| c.status)
    }
}

impl Object for Widget {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Conditional for Widget {
    fn conditional_status(&self) -> &ConditionalStatus {
        &self.status.conditional
    }

    fn conditional_status_mut(&mut self) -> &mut ConditionalStatus {
        &mut self.status.conditional
    }
}

impl Dependant for Widget {
    fn dependencies(&self) -> Vec<Box<dyn Dependency>> {
        self.spec
            .depends_on
            .iter()
            .map(|name| {
                Box::new(ObjectDependency::<Widget>::ready_condition(ObjectKey::new(
                    self.metadata.namespace.clone(),
                    name.clone(),
                ))) as Box<dyn Dependency>
            })
            .collect()
    }
}

// ==========================================================================
// Store with injectable failures
// ==========================================================================

/// In-memory store that can fail upcoming patches on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    patch_conflicts: AtomicUsize,
    status_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the next `n` patches with a conflict.
    pub fn conflict_next_patches(&self, n: usize) {
        self.patch_conflicts.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` status patches with a store fault.
    pub fn fail_next_status_writes(&self, n: usize) {
        self.status_failures.store(n, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.inner.write_count()
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, kind: &Kind, key: &ObjectKey) -> converge_core::Result<DynamicObject> {
        self.inner.get(kind, key).await
    }

    async fn create(&self, obj: DynamicObject) -> converge_core::Result<DynamicObject> {
        self.inner.create(obj).await
    }

    async fn update(
        &self,
        obj: DynamicObject,
        subresource: Subresource,
    ) -> converge_core::Result<DynamicObject> {
        self.inner.update(obj, subresource).await
    }

    async fn delete(&self, kind: &Kind, key: &ObjectKey) -> converge_core::Result<()> {
        self.inner.delete(kind, key).await
    }

    async fn list(
        &self,
        kind: &Kind,
        params: &ListParams,
    ) -> converge_core::Result<Vec<DynamicObject>> {
        self.inner.list(kind, params).await
    }

    async fn patch(
        &self,
        kind: &Kind,
        key: &ObjectKey,
        patch: &Patch,
        subresource: Subresource,
    ) -> converge_core::Result<DynamicObject> {
        if Self::take(&self.patch_conflicts) {
            return Err(converge_core::Error::conflict(
                kind.kind.clone(),
                key.clone(),
                "injected conflict",
            ));
        }
        if subresource == Subresource::Status && Self::take(&self.status_failures) {
            return Err(converge_core::Error::store("injected status failure"));
        }
        self.inner.patch(kind, key, patch, subresource).await
    }
}

// ==========================================================================
// Scripted actor
// ==========================================================================

#[derive(Debug, Default)]
pub struct Calls {
    pub observe: AtomicUsize,
    pub actions: AtomicUsize,
    pub finalize: AtomicUsize,
}

impl Calls {
    pub fn observed(&self) -> usize {
        self.observe.load(Ordering::SeqCst)
    }

    pub fn acted(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }

    pub fn finalized(&self) -> usize {
        self.finalize.load(Ordering::SeqCst)
    }
}

/// Scales `status.readyReplicas` towards `spec.replicas`, with optional
/// injected failures.
#[derive(Clone)]
pub struct ReplicaActor {
    pub calls: Arc<Calls>,
    pub observe_error: Option<fn() -> Error>,
    pub action_error: Option<fn() -> Error>,
    pub finalize: fn() -> Result<bool>,
}

impl Default for ReplicaActor {
    fn default() -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            observe_error: None,
            action_error: None,
            finalize: || Ok(true),
        }
    }
}

impl ReplicaActor {
    #[must_use]
    pub fn failing_observe(mut self, err: fn() -> Error) -> Self {
        self.observe_error = Some(err);
        self
    }

    #[must_use]
    pub fn failing_action(mut self, err: fn() -> Error) -> Self {
        self.action_error = Some(err);
        self
    }

    #[must_use]
    pub fn finalizing(mut self, finalize: fn() -> Result<bool>) -> Self {
        self.finalize = finalize;
        self
    }
}

#[async_trait]
impl Actor<Widget> for ReplicaActor {
    async fn observe(&self, ctx: &mut Context<Widget>) -> Result<Option<Action<Widget>>> {
        self.calls.observe.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.observe_error {
            return Err(err());
        }
        if ctx.obj.status.ready_replicas == ctx.obj.spec.replicas {
            return Ok(None);
        }

        let calls = self.calls.clone();
        let action_error = self.action_error;
        Ok(Some(Action::new("scale", move |ctx: &mut Context<Widget>| {
            Box::pin(async move {
                calls.actions.fetch_add(1, Ordering::SeqCst);
                if let Some(err) = action_error {
                    return Err(err());
                }
                let target = ctx.obj.spec.replicas;
                ctx.client
                    .patch_status(&mut ctx.obj, move |w| {
                        w.status.ready_replicas = target;
                        Ok(())
                    })
                    .await?;
                Ok(())
            })
        })))
    }

    async fn finalize(&self, _ctx: &mut Context<Widget>) -> Result<bool> {
        self.calls.finalize.fetch_add(1, Ordering::SeqCst);
        (self.finalize)()
    }
}

// ==========================================================================
// Harness
// ==========================================================================

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub client: Client,
    pub recorder: Arc<InMemoryRecorder>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let mut scheme = Scheme::new();
        scheme.add_kind::<Widget>(widget_kind());
        let store = FlakyStore::new_arc();
        let client = Client::new(store.clone(), Arc::new(scheme));
        Self {
            store,
            client,
            recorder: InMemoryRecorder::new_arc(),
        }
    }

    /// Options wiring the recorder and the widget's capabilities.
    pub fn options(&self) -> Options<Widget> {
        Options::new()
            .with_event_recorder(self.recorder.clone())
            .with_capabilities(Capabilities::none().conditional().dependant())
    }

    pub fn controller(&self, actor: ReplicaActor) -> Controller<Widget> {
        self.controller_with(actor, self.options())
    }

    pub fn controller_with(
        &self,
        actor: impl Actor<Widget> + 'static,
        options: Options<Widget>,
    ) -> Controller<Widget> {
        Controller::new(CONTROLLER, self.client.clone(), actor, options).unwrap()
    }

    pub async fn create(&self, widget: Widget) -> Widget {
        self.client.create(&widget).await.unwrap()
    }

    pub async fn get(&self, name: &str) -> Option<Widget> {
        match self.client.get::<Widget>(&key(name)).await {
            Ok(widget) => Some(widget),
            Err(e) if e.is_not_found() => None,
            Err(e) => panic!("get {name} failed: {e}"),
        }
    }

    /// Create a widget and request its deletion.
    pub async fn create_deleting(&self, widget: Widget) -> Widget {
        let created = self.create(widget).await;
        self.client.delete(&created).await.unwrap();
        self.get(&created.metadata.name)
            .await
            .expect("deleting widget must still exist")
    }

    pub async fn reasons(&self) -> Vec<String> {
        self.recorder.reasons().await
    }
}
