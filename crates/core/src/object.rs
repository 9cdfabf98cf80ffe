//! The managed object abstraction.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::kind::Kind;
use crate::meta::{ObjectKey, ObjectMeta};
use crate::result::Result;

/// Minimal capability set the engine needs from a resource type.
///
/// Implementors must serialize to a JSON map whose `metadata` field holds the
/// [`ObjectMeta`]; `spec` and `status` are the conventional sections for the
/// desired and observed state. Deep copy is `Clone`.
pub trait Object: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Identity of the object.
    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// A type-erased object as exchanged with the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    /// Kind identity of the object.
    pub kind: Kind,
    /// Full JSON document, including `metadata`.
    pub data: Value,
}

impl DynamicObject {
    /// Wrap a JSON document of the given kind.
    pub const fn new(kind: Kind, data: Value) -> Self {
        Self { kind, data }
    }

    /// Serialize a typed object.
    pub fn from_typed<T: Object>(kind: Kind, obj: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(obj)?))
    }

    /// Deserialize into a typed object.
    pub fn into_typed<T: Object>(self) -> Result<T> {
        Ok(serde_json::from_value(self.data)?)
    }

    /// Parse the metadata section.
    pub fn meta(&self) -> Result<ObjectMeta> {
        let meta = self
            .data
            .get("metadata")
            .cloned()
            .ok_or_else(|| Error::invalid(format!("{} object has no metadata", self.kind)))?;
        Ok(serde_json::from_value(meta)?)
    }

    /// Replace the metadata section.
    pub fn set_meta(&mut self, meta: &ObjectMeta) -> Result<()> {
        let value = serde_json::to_value(meta)?;
        match self.data.as_object_mut() {
            Some(map) => {
                map.insert("metadata".to_string(), value);
                Ok(())
            }
            None => Err(Error::invalid(format!(
                "{} object is not a JSON map",
                self.kind
            ))),
        }
    }

    /// Identity of the object.
    pub fn key(&self) -> Result<ObjectKey> {
        self.meta().map(|m| m.key())
    }
}
