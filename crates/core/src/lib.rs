//! Object model and store contract for the converge reconciliation engine.
//!
//! This crate provides the pieces the reconciler is generic over:
//!
//! - **Objects**: [`Object`] identity and metadata accessors, [`DynamicObject`]
//!   for type-erased store traffic
//! - **Kinds**: [`Scheme`] maps Rust types to kind identities and hands out
//!   validated [`ObjectFactory`]s
//! - **Conditions**: [`ConditionalStatus`] with upsert-by-type semantics
//! - **Patches**: JSON merge patches carrying an optimistic-lock precondition
//! - **Store**: the [`Store`] contract, an [`InMemoryStore`] and a
//!   [`TracingStore`] wrapper, plus the typed [`Client`]
//!
//! # Example
//!
//! ```ignore
//! use converge_core::{Client, InMemoryStore, Kind, ObjectKey, Scheme};
//! use std::sync::Arc;
//!
//! let mut scheme = Scheme::new();
//! scheme.add_kind::<Widget>(Kind::new("demo.io", "v1", "Widget"));
//! let client = Client::new(InMemoryStore::new_arc(), Arc::new(scheme));
//!
//! client.create(&Widget::new("default", "w1")).await?;
//! let widget: Widget = client.get(&ObjectKey::new("default", "w1")).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod client;
pub mod condition;
pub mod error;
pub mod kind;
pub mod meta;
pub mod object;
pub mod patch;
pub mod result;
pub mod store;

// Re-export main types
pub use client::Client;
pub use condition::{
    Condition, ConditionStatus, Conditional, ConditionalStatus, CONDITION_TYPE_READY,
    CONDITION_TYPE_SYNCED, DEFAULT_REASON,
};
pub use error::{Error, RegistryError};
pub use kind::{Kind, ObjectFactory, Scheme};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference};
pub use object::{DynamicObject, Object};
pub use patch::Patch;
pub use result::{Result, ResultExt};
pub use store::{InMemoryStore, ListParams, Store, Subresource, TracingStore};
