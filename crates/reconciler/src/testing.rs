use std::sync::Arc;

use converge_core::{
    Client, Conditional, ConditionalStatus, InMemoryStore, Kind, Object, ObjectKey, ObjectMeta,
    Scheme,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gadget {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GadgetSpec,
    #[serde(default)]
    pub status: GadgetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GadgetSpec {
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GadgetStatus {
    #[serde(flatten)]
    pub conditional: ConditionalStatus,
}

impl Gadget {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(&ObjectKey::new(namespace, name)),
            ..Self::default()
        }
    }
}

impl Object for Gadget {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Conditional for Gadget {
    fn conditional_status(&self) -> &ConditionalStatus {
        &self.status.conditional
    }

    fn conditional_status_mut(&mut self) -> &mut ConditionalStatus {
        &mut self.status.conditional
    }
}

pub fn client() -> Client {
    let mut scheme = Scheme::new();
    scheme.add_kind::<Gadget>(Kind::new("demo.io", "v1", "Gadget"));
    Client::new(InMemoryStore::new_arc(), Arc::new(scheme))
}
