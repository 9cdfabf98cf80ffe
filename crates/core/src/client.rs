//! Typed access to a [`Store`].

use std::fmt;
use std::sync::Arc;

use crate::kind::{Kind, Scheme};
use crate::meta::ObjectKey;
use crate::object::{DynamicObject, Object};
use crate::patch::Patch;
use crate::result::Result;
use crate::store::{ListParams, Store, Subresource};

/// Store client that resolves kinds through a [`Scheme`] and converts
/// between typed objects and [`DynamicObject`]s.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn Store>,
    scheme: Arc<Scheme>,
}

impl Client {
    /// Create a client over a store and scheme.
    pub fn new(store: Arc<dyn Store>, scheme: Arc<Scheme>) -> Self {
        Self { store, scheme }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The type registry.
    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    /// The kind `U` is registered under.
    pub fn kind_of<U: Object>(&self) -> Result<Kind> {
        Ok(self.scheme.kind_of::<U>()?)
    }

    /// Fetch an object.
    pub async fn get<U: Object>(&self, key: &ObjectKey) -> Result<U> {
        let kind = self.kind_of::<U>()?;
        self.store.get(&kind, key).await?.into_typed()
    }

    /// Create an object, returning the stored version.
    pub async fn create<U: Object>(&self, obj: &U) -> Result<U> {
        let dynamic = DynamicObject::from_typed(self.kind_of::<U>()?, obj)?;
        self.store.create(dynamic).await?.into_typed()
    }

    /// Replace the spec and metadata of an object.
    pub async fn update<U: Object>(&self, obj: &U) -> Result<U> {
        self.replace(obj, Subresource::Main).await
    }

    /// Replace the status of an object.
    pub async fn update_status<U: Object>(&self, obj: &U) -> Result<U> {
        self.replace(obj, Subresource::Status).await
    }

    async fn replace<U: Object>(&self, obj: &U, subresource: Subresource) -> Result<U> {
        let dynamic = DynamicObject::from_typed(self.kind_of::<U>()?, obj)?;
        self.store.update(dynamic, subresource).await?.into_typed()
    }

    /// Request deletion of an object.
    pub async fn delete<U: Object>(&self, obj: &U) -> Result<()> {
        let kind = self.kind_of::<U>()?;
        self.store.delete(&kind, &obj.key()).await
    }

    /// List objects of type `U`.
    pub async fn list<U: Object>(&self, params: &ListParams) -> Result<Vec<U>> {
        let kind = self.kind_of::<U>()?;
        self.store
            .list(&kind, params)
            .await?
            .into_iter()
            .map(DynamicObject::into_typed)
            .collect()
    }

    /// Apply a merge patch.
    pub async fn patch<U: Object>(
        &self,
        key: &ObjectKey,
        patch: &Patch,
        subresource: Subresource,
    ) -> Result<U> {
        let kind = self.kind_of::<U>()?;
        self.store
            .patch(&kind, key, patch, subresource)
            .await?
            .into_typed()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}
