//! Per-invocation reconcile context and the scoped store client.
//!
//! Every mutation goes through an optimistic-lock merge patch: the object is
//! snapshotted, mutated in place, diffed, and the diff is sent with the
//! snapshot's resource version as a precondition. A mutation that changes
//! nothing issues no write.

use std::fmt;
use std::sync::Arc;

use converge_core::{
    Client, Kind, ListParams, Object, ObjectKey, OwnerReference, Patch, Subresource,
};
use serde_json::{json, Value};

use crate::dependency::Dependencies;
use crate::error::{Error, Result};
use crate::recorder::{EventEmitter, EventRecorder, ObjectReference};

/// State handed to actor code for one reconcile invocation.
pub struct Context<T: Object> {
    /// The object being reconciled, as last read from or written to the store.
    pub obj: T,
    /// Store client scoped to the object.
    pub client: ScopedClient,
    /// Event emitter bound to the object.
    pub events: EventEmitter,
    /// Prerequisites refreshed while gating; `None` when the type declares
    /// no dependencies.
    pub deps: Option<Dependencies>,
    /// Status section as last known to be stored.
    baseline: Value,
}

impl<T: Object> Context<T> {
    /// Build a context for a freshly fetched object.
    pub fn new(obj: T, kind: &Kind, client: Client, recorder: Arc<dyn EventRecorder>) -> Result<Self> {
        let owner = Owner {
            kind: kind.clone(),
            key: obj.key(),
            uid: obj.meta().uid.clone(),
        };
        let events = EventEmitter::new(recorder, ObjectReference::of(kind.kind.clone(), &obj));
        let baseline = status_of(&obj)?;
        Ok(Self {
            obj,
            client: ScopedClient::with_owner(client, owner),
            events,
            deps: None,
            baseline,
        })
    }

    /// Identity of the reconciled object.
    pub fn key(&self) -> ObjectKey {
        self.obj.key()
    }

    /// Current generation of the reconciled object.
    pub fn generation(&self) -> i64 {
        self.obj.meta().generation
    }

    /// Write local status changes back to the store.
    ///
    /// Returns whether a write was issued. Nothing is sent when the status
    /// section is unchanged since it was last read or written.
    pub async fn sync_status(&mut self) -> Result<bool> {
        let current = status_of(&self.obj)?;
        let Some(patch) = Patch::between(
            &json!({ "status": self.baseline }),
            &json!({ "status": current }),
            self.obj.meta().resource_version.clone(),
        ) else {
            return Ok(false);
        };

        self.obj = self
            .client
            .inner()
            .patch(&self.obj.key(), &patch, Subresource::Status)
            .await?;
        self.baseline = status_of(&self.obj)?;
        Ok(true)
    }
}

impl<T: Object> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("obj", &self.obj)
            .field("client", &self.client)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

fn status_of<U: Object>(obj: &U) -> Result<Value> {
    let value = serde_json::to_value(obj).map_err(converge_core::Error::from)?;
    Ok(value.get("status").cloned().unwrap_or(Value::Null))
}

#[derive(Debug, Clone)]
struct Owner {
    kind: Kind,
    key: ObjectKey,
    uid: Option<String>,
}

impl Owner {
    fn reference(&self) -> Result<OwnerReference> {
        let uid = self.uid.clone().ok_or_else(|| {
            converge_core::Error::invalid(format!("owner '{}' has no uid", self.key))
        })?;
        Ok(OwnerReference {
            api_version: self.kind.api_version(),
            kind: self.kind.kind.clone(),
            name: self.key.name.clone(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}

/// Store client used by actor code.
///
/// Store failures come back as [`Error::Core`], so callers can tell
/// not-found and conflicts apart from faults.
#[derive(Debug, Clone)]
pub struct ScopedClient {
    client: Client,
    owner: Option<Owner>,
}

impl ScopedClient {
    /// A client with no owner bound; `create_owned` is rejected.
    pub const fn new(client: Client) -> Self {
        Self {
            client,
            owner: None,
        }
    }

    const fn with_owner(client: Client, owner: Owner) -> Self {
        Self {
            client,
            owner: Some(owner),
        }
    }

    /// The unscoped client.
    pub const fn inner(&self) -> &Client {
        &self.client
    }

    /// Fetch an object.
    pub async fn get<U: Object>(&self, key: &ObjectKey) -> Result<U> {
        Ok(self.client.get(key).await?)
    }

    /// Whether an object exists.
    pub async fn exist<U: Object>(&self, key: &ObjectKey) -> Result<bool> {
        match self.client.get::<U>(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Create an object; `obj` is replaced by the stored version.
    pub async fn create<U: Object>(&self, obj: &mut U) -> Result<()> {
        *obj = self.client.create(obj).await?;
        Ok(())
    }

    /// Create an object controlled by the reconciled object.
    ///
    /// Rejects owners without a uid, ownership across namespaces, and
    /// objects already controlled by a different owner.
    pub async fn create_owned<U: Object>(&self, obj: &mut U) -> Result<()> {
        let owner = self
            .owner
            .as_ref()
            .ok_or_else(|| converge_core::Error::invalid("no owner bound to this client"))?;
        let reference = owner.reference()?;

        let meta = obj.meta_mut();
        if !owner.key.namespace.is_empty() && owner.key.namespace != meta.namespace {
            return Err(converge_core::Error::invalid(format!(
                "cross-namespace owner reference is not allowed: '{}' cannot own '{}'",
                owner.key,
                meta.key()
            ))
            .into());
        }
        match meta.controller_owner() {
            Some(existing) if existing.uid != reference.uid => {
                return Err(converge_core::Error::invalid(format!(
                    "'{}' is already controlled by {} '{}'",
                    meta.key(),
                    existing.kind,
                    existing.name
                ))
                .into());
            }
            Some(_) => {}
            None => meta.owner_references.push(reference),
        }

        self.create(obj).await
    }

    /// Replace spec and metadata; `obj` is replaced by the stored version.
    pub async fn update<U: Object>(&self, obj: &mut U) -> Result<()> {
        *obj = self.client.update(obj).await?;
        Ok(())
    }

    /// Replace status; `obj` is replaced by the stored version.
    pub async fn update_status<U: Object>(&self, obj: &mut U) -> Result<()> {
        *obj = self.client.update_status(obj).await?;
        Ok(())
    }

    /// Request deletion of an object.
    pub async fn delete<U: Object>(&self, obj: &U) -> Result<()> {
        Ok(self.client.delete(obj).await?)
    }

    /// List objects of type `U`.
    pub async fn list<U: Object>(&self, params: &ListParams) -> Result<Vec<U>> {
        Ok(self.client.list(params).await?)
    }

    /// Mutate spec or metadata through an optimistic-lock merge patch.
    ///
    /// Returns whether a write was issued. When the mutation or the write
    /// fails, `obj` is left as it was.
    pub async fn patch<U, F>(&self, obj: &mut U, mutate: F) -> Result<bool>
    where
        U: Object,
        F: FnOnce(&mut U) -> Result<()> + Send,
    {
        self.mutate(obj, mutate, Subresource::Main).await
    }

    /// Mutate status through an optimistic-lock merge patch.
    ///
    /// Returns whether a write was issued. When the mutation or the write
    /// fails, `obj` is left as it was.
    pub async fn patch_status<U, F>(&self, obj: &mut U, mutate: F) -> Result<bool>
    where
        U: Object,
        F: FnOnce(&mut U) -> Result<()> + Send,
    {
        self.mutate(obj, mutate, Subresource::Status).await
    }

    async fn mutate<U, F>(&self, obj: &mut U, mutate: F, subresource: Subresource) -> Result<bool>
    where
        U: Object,
        F: FnOnce(&mut U) -> Result<()> + Send,
    {
        let snapshot = obj.clone();
        let Some(patch) = build_patch(obj, mutate)? else {
            return Ok(false);
        };
        match self.client.patch(&obj.key(), &patch, subresource).await {
            Ok(stored) => {
                *obj = stored;
                Ok(true)
            }
            Err(e) => {
                *obj = snapshot;
                Err(e.into())
            }
        }
    }
}

/// Run `mutate` against `obj` and compute the patch it implies.
///
/// On error `obj` is restored to its state before the mutation.
fn build_patch<U, F>(obj: &mut U, mutate: F) -> Result<Option<Patch>>
where
    U: Object,
    F: FnOnce(&mut U) -> Result<()>,
{
    let snapshot = obj.clone();
    let before = serde_json::to_value(&snapshot).map_err(converge_core::Error::from)?;

    if let Err(e) = mutate(obj) {
        *obj = snapshot;
        return Err(e);
    }

    let (key_before, key_after) = (snapshot.key(), obj.key());
    if key_before != key_after {
        *obj = snapshot;
        return Err(converge_core::Error::ImmutableIdentity {
            before: key_before,
            after: key_after,
        }
        .into());
    }

    let after = match serde_json::to_value(&*obj) {
        Ok(after) => after,
        Err(e) => {
            *obj = snapshot;
            return Err(converge_core::Error::from(e).into());
        }
    };
    Ok(Patch::between(
        &before,
        &after,
        snapshot.meta().resource_version.clone(),
    ))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::Gadget;

    #[test]
    fn test_unchanged_mutation_builds_no_patch() {
        let mut gadget = Gadget::new("ns", "g");
        let patch = build_patch(&mut gadget, |_| Ok(())).unwrap();
        assert!(patch.is_none());
    }

    #[test]
    fn test_patch_carries_snapshot_version() {
        let mut gadget = Gadget::new("ns", "g");
        gadget.metadata.resource_version = Some("7".to_string());

        let patch = build_patch(&mut gadget, |g| {
            g.spec.size = 3;
            Ok(())
        })
        .unwrap()
        .unwrap();

        assert_eq!(patch.resource_version.as_deref(), Some("7"));
        assert_eq!(patch.body["spec"], json!({"size": 3}));
    }

    #[test]
    fn test_identity_change_is_rejected_and_restored() {
        let mut gadget = Gadget::new("ns", "g");

        let result = build_patch(&mut gadget, |g| {
            g.metadata.name = "other".to_string();
            g.spec.size = 9;
            Ok(())
        });

        assert!(matches!(
            result,
            Err(Error::Core(converge_core::Error::ImmutableIdentity { .. }))
        ));
        assert_eq!(gadget, Gadget::new("ns", "g"));
    }

    #[test]
    fn test_failed_mutation_restores_object() {
        let mut gadget = Gadget::new("ns", "g");

        let result = build_patch(&mut gadget, |g| {
            g.spec.size = 4;
            Err(Error::domain("refused"))
        });

        assert!(result.is_err());
        assert_eq!(gadget.spec.size, 0);
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_object_untouched() {
        let client = ScopedClient::new(crate::testing::client());
        let mut gadget = Gadget::new("ns", "g");
        client.create(&mut gadget).await.unwrap();
        let mut stale = gadget.clone();
        client
            .patch(&mut gadget, |g| {
                g.spec.size = 1;
                Ok(())
            })
            .await
            .unwrap();
        let before = stale.clone();

        let result = client
            .patch(&mut stale, |g| {
                g.spec.size = 2;
                Ok(())
            })
            .await;

        assert!(result.is_err_and(|e| e.is_conflict()));
        assert_eq!(stale, before);
    }
}
