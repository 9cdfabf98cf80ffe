//! Readiness gating on prerequisite objects.
//!
//! Prerequisites read while gating are kept in a [`Dependencies`] holder
//! and handed to the actor through [`Context::deps`](crate::Context), so
//! domain code sees the same state the readiness check saw.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use converge_core::{Conditional, Object, ObjectKey};
use tracing::debug;

use crate::context::ScopedClient;
use crate::error::{Error, Result};

/// Prerequisite objects fetched during dependency gating, by type and key.
#[derive(Default)]
pub struct Dependencies {
    objects: HashMap<(TypeId, ObjectKey), Box<dyn Any + Send + Sync>>,
}

impl Dependencies {
    /// Keep a refreshed prerequisite, replacing any earlier copy.
    pub fn insert<U: Object>(&mut self, obj: U) {
        self.objects
            .insert((TypeId::of::<U>(), obj.key()), Box::new(obj));
    }

    /// The prerequisite of type `U` at `key`, as read during gating.
    pub fn get<U: Object>(&self, key: &ObjectKey) -> Option<&U> {
        self.objects
            .get(&(TypeId::of::<U>(), key.clone()))
            .and_then(|obj| obj.downcast_ref::<U>())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.objects.keys().map(|(_, key)| key))
            .finish()
    }
}

/// A prerequisite that must be ready before an object is acted on.
#[async_trait]
pub trait Dependency: Send + Sync {
    /// Refresh the prerequisite into `resolved` and evaluate its readiness.
    async fn refresh(&self, client: &ScopedClient, resolved: &mut Dependencies) -> Result<bool>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Capability of objects that declare prerequisites.
pub trait Dependant {
    /// Prerequisites in evaluation order.
    fn dependencies(&self) -> Vec<Box<dyn Dependency>>;
}

type ReadyFn<U> = Box<dyn Fn(&U) -> bool + Send + Sync>;

/// Dependency on another stored object, judged by a predicate.
///
/// A missing object is an error, not "not ready".
pub struct ObjectDependency<U: Object> {
    key: ObjectKey,
    ready: ReadyFn<U>,
    _object: PhantomData<fn() -> U>,
}

impl<U: Object> ObjectDependency<U> {
    /// Depend on the object at `key` satisfying `ready`.
    pub fn new(key: ObjectKey, ready: impl Fn(&U) -> bool + Send + Sync + 'static) -> Self {
        Self {
            key,
            ready: Box::new(ready),
            _object: PhantomData,
        }
    }

    /// The referenced object.
    pub const fn key(&self) -> &ObjectKey {
        &self.key
    }
}

impl<U: Object + Conditional> ObjectDependency<U> {
    /// Depend on the object at `key` reporting `Ready=True`.
    pub fn ready_condition(key: ObjectKey) -> Self {
        Self::new(key, |obj: &U| obj.is_ready())
    }
}

#[async_trait]
impl<U: Object> Dependency for ObjectDependency<U> {
    async fn refresh(&self, client: &ScopedClient, resolved: &mut Dependencies) -> Result<bool> {
        let obj: U = client.get(&self.key).await?;
        let ready = (self.ready)(&obj);
        resolved.insert(obj);
        Ok(ready)
    }

    fn describe(&self) -> String {
        format!("{} '{}'", short_type_name::<U>(), self.key)
    }
}

impl<U: Object> fmt::Debug for ObjectDependency<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDependency")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

fn short_type_name<U>() -> &'static str {
    let full = std::any::type_name::<U>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Evaluate dependencies in order, stopping at the first one that is not
/// ready or fails. Refreshed prerequisites are collected in `resolved`.
pub async fn wait_dependencies(
    dependencies: &[Box<dyn Dependency>],
    client: &ScopedClient,
    resolved: &mut Dependencies,
) -> Result<bool> {
    for dependency in dependencies {
        let ready = dependency
            .refresh(client, resolved)
            .await
            .map_err(Error::dependency)?;
        if !ready {
            debug!(dependency = %dependency.describe(), "Dependency not ready");
            return Ok(false);
        }
    }
    Ok(true)
}
