//! Kind identities and the type registry.
//!
//! A [`Scheme`] maps Rust types to kind identities. Controllers resolve their
//! object type once, at registration, through [`Scheme::factory_for`]; the
//! returned [`ObjectFactory`] can then build instances without failing.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::object::Object;

/// Group/version/kind identity of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Kind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Kind {
    /// Create a kind identity.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

type Constructor = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// Registry of resource types and their kinds.
#[derive(Default, Clone)]
pub struct Scheme {
    kinds: HashMap<TypeId, Vec<Kind>>,
    constructors: HashMap<Kind, Constructor>,
}

impl Scheme {
    /// Create an empty scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `kind`.
    ///
    /// Registering the same type under several kinds is allowed here, but
    /// such a type cannot back a controller.
    pub fn add_kind<T: Object + Default>(&mut self, kind: Kind) -> &mut Self {
        let kinds = self.kinds.entry(TypeId::of::<T>()).or_default();
        if !kinds.contains(&kind) {
            kinds.push(kind.clone());
        }
        self.constructors
            .insert(kind, Arc::new(|| Box::new(T::default()) as Box<dyn Any + Send>));
        self
    }

    /// All kinds registered for `T`.
    pub fn object_kinds<T: 'static>(&self) -> Result<Vec<Kind>, RegistryError> {
        match self.kinds.get(&TypeId::of::<T>()) {
            Some(kinds) if !kinds.is_empty() => Ok(kinds.clone()),
            _ => Err(RegistryError::NotRegistered {
                type_name: type_name::<T>(),
            }),
        }
    }

    /// The single kind registered for `T`.
    pub fn kind_of<T: 'static>(&self) -> Result<Kind, RegistryError> {
        let kinds = self.object_kinds::<T>()?;
        let count = kinds.len();
        kinds
            .into_iter()
            .exactly_one()
            .map_err(|_| RegistryError::AmbiguousKind {
                type_name: type_name::<T>(),
                count,
            })
    }

    /// Build a zero-value instance of `kind`.
    pub fn new_object(&self, kind: &Kind) -> Result<Box<dyn Any + Send>, RegistryError> {
        self.constructors
            .get(kind)
            .map(|ctor| ctor())
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// Every registered kind, sorted.
    pub fn all_kinds(&self) -> Vec<Kind> {
        self.constructors.keys().cloned().sorted().collect_vec()
    }

    /// Resolve `T` to exactly one kind and check it is constructible.
    pub fn factory_for<T: Object + Default>(&self) -> Result<ObjectFactory<T>, RegistryError> {
        let kind = self.kind_of::<T>()?;
        if !self.new_object(&kind)?.is::<T>() {
            return Err(RegistryError::TypeMismatch {
                kind: kind.to_string(),
                type_name: type_name::<T>(),
            });
        }
        Ok(ObjectFactory {
            kind,
            make: T::default,
        })
    }
}

impl fmt::Debug for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheme")
            .field("kinds", &self.all_kinds())
            .finish()
    }
}

/// Infallible constructor for a validated object type.
#[derive(Debug, Clone)]
pub struct ObjectFactory<T> {
    kind: Kind,
    make: fn() -> T,
}

impl<T: Object> ObjectFactory<T> {
    /// The kind `T` resolved to.
    pub const fn kind(&self) -> &Kind {
        &self.kind
    }

    /// A zero-value instance.
    pub fn new_object(&self) -> T {
        (self.make)()
    }
}
