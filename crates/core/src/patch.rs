//! JSON merge patches (RFC 7386) with an optimistic-lock precondition.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A merge patch plus the resource version it was computed against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Merge patch document.
    pub body: Value,
    /// Precondition: the write is rejected with a conflict unless the stored
    /// object still carries this resource version.
    pub resource_version: Option<String>,
}

impl Patch {
    /// Compute the patch turning `before` into `after`.
    ///
    /// Returns `None` when the documents are equal. The resource version is
    /// embedded into the body's metadata so stores that only understand plain
    /// merge patches still enforce it.
    pub fn between(before: &Value, after: &Value, resource_version: Option<String>) -> Option<Self> {
        if before == after {
            return None;
        }
        let mut body = diff(before, after);
        if let (Some(rv), Some(map)) = (resource_version.as_ref(), body.as_object_mut()) {
            let metadata = map
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(metadata) = metadata.as_object_mut() {
                metadata.insert("resourceVersion".to_string(), Value::String(rv.clone()));
            }
        }
        Some(Self {
            body,
            resource_version,
        })
    }
}

/// Compute a merge patch from `before` to `after`.
pub fn diff(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new_value) if new_value != old_value => {
                        patch.insert(key.clone(), diff(old_value, new_value));
                    }
                    Some(_) => {}
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            Value::Object(patch)
        }
        _ => after.clone(),
    }
}
