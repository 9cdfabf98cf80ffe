//! Store contract and implementations.
//!
//! The store is the single source of truth for managed objects. It owns
//! identity assignment, resource versions and generations, and enforces the
//! optimistic-concurrency precondition on every conditional write.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use serde_json::Value;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::error::Error;
use crate::kind::Kind;
use crate::meta::{ObjectKey, ObjectMeta};
use crate::object::DynamicObject;
use crate::patch::Patch;
use crate::result::Result;

/// Which part of an object a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subresource {
    /// Metadata and spec; status is left untouched.
    Main,
    /// Status only; metadata and spec are left untouched.
    Status,
}

/// Parameters for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Restrict to one namespace.
    pub namespace: Option<String>,
    /// Equality-based label selector.
    pub labels: BTreeMap<String, String>,
}

impl ListParams {
    /// List within a namespace.
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Require a label value.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Whether the metadata matches these parameters.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.namespace.as_ref().map_or(true, |ns| *ns == meta.namespace)
            && self
                .labels
                .iter()
                .all(|(k, v)| meta.labels.get(k) == Some(v))
    }
}

/// Trait for object storage backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch an object.
    async fn get(&self, kind: &Kind, key: &ObjectKey) -> Result<DynamicObject>;

    /// Create an object.
    async fn create(&self, obj: DynamicObject) -> Result<DynamicObject>;

    /// Replace an object. A resource version on the object is a precondition.
    async fn update(&self, obj: DynamicObject, subresource: Subresource) -> Result<DynamicObject>;

    /// Request deletion of an object.
    async fn delete(&self, kind: &Kind, key: &ObjectKey) -> Result<()>;

    /// List objects of a kind.
    async fn list(&self, kind: &Kind, params: &ListParams) -> Result<Vec<DynamicObject>>;

    /// Apply a merge patch.
    async fn patch(
        &self,
        kind: &Kind,
        key: &ObjectKey,
        patch: &Patch,
        subresource: Subresource,
    ) -> Result<DynamicObject>;
}

/// In-memory store for testing and embedding.
///
/// Deletion of an object that still carries finalizers only stamps its
/// deletion timestamp; the object disappears once the last finalizer is
/// removed.
#[derive(Default)]
pub struct InMemoryStore {
    objects: RwLock<HashMap<(Kind, ObjectKey), Value>>,
    revision: AtomicU64,
    writes: AtomicUsize,
}

impl InMemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn next_revision(&self) -> String {
        self.revision
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
            .to_string()
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn check_precondition(
        kind: &Kind,
        key: &ObjectKey,
        stored: &ObjectMeta,
        expected: Option<&String>,
    ) -> Result<()> {
        match expected {
            Some(rv) if stored.resource_version.as_ref() != Some(rv) => Err(Error::conflict(
                kind.kind.clone(),
                key.clone(),
                format!(
                    "resource version {rv} is stale, current is {}",
                    stored.resource_version.as_deref().unwrap_or_default()
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Merge `incoming` into the stored document for the given subresource.
    ///
    /// Returns the committed document and whether it should be dropped
    /// because deletion completed.
    fn commit(
        &self,
        kind: &Kind,
        stored: &Value,
        incoming: Value,
        subresource: Subresource,
    ) -> Result<(DynamicObject, bool)> {
        let stored_obj = DynamicObject::new(kind.clone(), stored.clone());
        let stored_meta = stored_obj.meta()?;

        let mut next = match subresource {
            Subresource::Main => {
                let mut next = DynamicObject::new(kind.clone(), incoming);
                replace_section(&mut next.data, "status", stored.get("status").cloned());
                next
            }
            Subresource::Status => {
                let mut next = stored_obj;
                replace_section(&mut next.data, "status", incoming.get("status").cloned());
                next
            }
        };

        let mut meta = next.meta()?;
        if meta.key() != stored_meta.key() {
            return Err(Error::invalid(format!(
                "object identity cannot change from '{}' to '{}'",
                stored_meta.key(),
                meta.key()
            )));
        }
        meta.uid.clone_from(&stored_meta.uid);
        meta.deletion_timestamp = stored_meta.deletion_timestamp;
        meta.generation = if next.data.get("spec") == stored.get("spec") {
            stored_meta.generation
        } else {
            stored_meta.generation.saturating_add(1)
        };
        meta.resource_version = Some(self.next_revision());
        next.set_meta(&meta)?;

        let released = meta.is_deleting() && meta.finalizers.is_empty();
        Ok((next, released))
    }

    async fn write<F>(
        &self,
        kind: &Kind,
        key: &ObjectKey,
        expected: Option<&String>,
        subresource: Subresource,
        incoming: F,
    ) -> Result<DynamicObject>
    where
        F: FnOnce(&Value) -> Value + Send,
    {
        let mut objects = self.objects.write().await;
        let map_key = (kind.clone(), key.clone());
        let stored = objects
            .get(&map_key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind.kind.clone(), key.clone()))?;
        let stored_meta = DynamicObject::new(kind.clone(), stored.clone()).meta()?;
        Self::check_precondition(kind, key, &stored_meta, expected)?;

        let (committed, released) = self.commit(kind, &stored, incoming(&stored), subresource)?;
        if released {
            objects.remove(&map_key);
        } else {
            objects.insert(map_key, committed.data.clone());
        }
        self.record_write();
        Ok(committed)
    }
}

fn replace_section(doc: &mut Value, field: &str, value: Option<Value>) {
    if let Some(map) = doc.as_object_mut() {
        match value {
            Some(v) => {
                map.insert(field.to_string(), v);
            }
            None => {
                map.remove(field);
            }
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, kind: &Kind, key: &ObjectKey) -> Result<DynamicObject> {
        let objects = self.objects.read().await;
        objects
            .get(&(kind.clone(), key.clone()))
            .map(|data| DynamicObject::new(kind.clone(), data.clone()))
            .ok_or_else(|| Error::not_found(kind.kind.clone(), key.clone()))
    }

    async fn create(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        let mut meta = obj.meta()?;
        if meta.name.is_empty() {
            return Err(Error::invalid(format!("{} object has no name", obj.kind)));
        }
        let key = meta.key();
        let mut objects = self.objects.write().await;
        let map_key = (obj.kind.clone(), key.clone());
        if objects.contains_key(&map_key) {
            return Err(Error::already_exists(obj.kind.kind.clone(), key));
        }

        meta.uid = Some(Ulid::new().to_string());
        meta.generation = 1;
        meta.deletion_timestamp = None;
        meta.resource_version = Some(self.next_revision());
        obj.set_meta(&meta)?;

        objects.insert(map_key, obj.data.clone());
        self.record_write();
        Ok(obj)
    }

    async fn update(&self, obj: DynamicObject, subresource: Subresource) -> Result<DynamicObject> {
        let meta = obj.meta()?;
        let key = meta.key();
        let kind = obj.kind;
        let data = obj.data;
        self.write(
            &kind,
            &key,
            meta.resource_version.as_ref(),
            subresource,
            move |_| data,
        )
        .await
    }

    async fn delete(&self, kind: &Kind, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let map_key = (kind.clone(), key.clone());
        let stored = objects
            .get(&map_key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind.kind.clone(), key.clone()))?;
        let mut obj = DynamicObject::new(kind.clone(), stored);
        let mut meta = obj.meta()?;

        if meta.finalizers.is_empty() {
            objects.remove(&map_key);
            self.record_write();
        } else if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version = Some(self.next_revision());
            obj.set_meta(&meta)?;
            objects.insert(map_key, obj.data);
            self.record_write();
        }
        Ok(())
    }

    async fn list(&self, kind: &Kind, params: &ListParams) -> Result<Vec<DynamicObject>> {
        let objects = self.objects.read().await;
        let mut matched = Vec::new();
        for ((k, key), data) in objects.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            if k != kind {
                continue;
            }
            let obj = DynamicObject::new(kind.clone(), data.clone());
            if params.matches(&obj.meta()?) {
                matched.push(obj);
            } else {
                tracing::trace!(key = %key, "Skipping object outside list selector");
            }
        }
        Ok(matched)
    }

    async fn patch(
        &self,
        kind: &Kind,
        key: &ObjectKey,
        patch: &Patch,
        subresource: Subresource,
    ) -> Result<DynamicObject> {
        self.write(
            kind,
            key,
            patch.resource_version.as_ref(),
            subresource,
            |stored| {
                let mut candidate = stored.clone();
                json_patch::merge(&mut candidate, &patch.body);
                candidate
            },
        )
        .await
    }
}

/// A wrapper that adds tracing to a store.
pub struct TracingStore<S: Store> {
    inner: S,
}

impl<S: Store> TracingStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Store> Store for TracingStore<S> {
    async fn get(&self, kind: &Kind, key: &ObjectKey) -> Result<DynamicObject> {
        tracing::trace!(kind = %kind.kind, key = %key, "Getting object");
        self.inner.get(kind, key).await
    }

    async fn create(&self, obj: DynamicObject) -> Result<DynamicObject> {
        tracing::debug!(kind = %obj.kind.kind, "Creating object");
        let result = self.inner.create(obj).await;
        if let Err(ref e) = result {
            tracing::debug!(error = %e, "Create failed");
        }
        result
    }

    async fn update(&self, obj: DynamicObject, subresource: Subresource) -> Result<DynamicObject> {
        tracing::debug!(kind = %obj.kind.kind, subresource = ?subresource, "Updating object");
        let result = self.inner.update(obj, subresource).await;
        if let Err(ref e) = result {
            tracing::debug!(error = %e, "Update failed");
        }
        result
    }

    async fn delete(&self, kind: &Kind, key: &ObjectKey) -> Result<()> {
        tracing::debug!(kind = %kind.kind, key = %key, "Deleting object");
        self.inner.delete(kind, key).await
    }

    async fn list(&self, kind: &Kind, params: &ListParams) -> Result<Vec<DynamicObject>> {
        tracing::trace!(kind = %kind.kind, namespace = ?params.namespace, "Listing objects");
        self.inner.list(kind, params).await
    }

    async fn patch(
        &self,
        kind: &Kind,
        key: &ObjectKey,
        patch: &Patch,
        subresource: Subresource,
    ) -> Result<DynamicObject> {
        tracing::debug!(
            kind = %kind.kind,
            key = %key,
            subresource = ?subresource,
            precondition = ?patch.resource_version,
            "Patching object"
        );
        let result = self.inner.patch(kind, key, patch, subresource).await;
        if let Ok(ref obj) = result {
            tracing::trace!(object = ?obj.data, "Patched object");
        }
        result
    }
}
