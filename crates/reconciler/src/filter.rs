//! Change filters deciding which store events trigger a reconcile.
//!
//! The dispatcher consults the filter registered with a controller; status
//! writes made by the controller itself do not bump the generation, so the
//! default filter keeps a controller from waking itself up.

use std::fmt;

use converge_core::ObjectMeta;

/// A change observed on a stored object.
#[derive(Debug, Clone, Copy)]
pub enum ChangeEvent<'a> {
    Create(&'a ObjectMeta),
    Update {
        old: &'a ObjectMeta,
        new: &'a ObjectMeta,
    },
    Delete(&'a ObjectMeta),
    /// Externally triggered, e.g. a periodic resync.
    Generic(&'a ObjectMeta),
}

/// Predicate over change events.
pub trait ChangeFilter: Send + Sync {
    /// Whether the event should trigger a reconcile.
    fn accepts(&self, event: &ChangeEvent<'_>) -> bool;
}

impl<F> ChangeFilter for F
where
    F: Fn(&ChangeEvent<'_>) -> bool + Send + Sync,
{
    fn accepts(&self, event: &ChangeEvent<'_>) -> bool {
        self(event)
    }
}

/// Accepts updates that changed the generation, and all other events.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationChanged;

impl ChangeFilter for GenerationChanged {
    fn accepts(&self, event: &ChangeEvent<'_>) -> bool {
        match event {
            ChangeEvent::Update { old, new } => old.generation != new.generation,
            _ => true,
        }
    }
}

/// Accepts updates that changed labels, and all other events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelChanged;

impl ChangeFilter for LabelChanged {
    fn accepts(&self, event: &ChangeEvent<'_>) -> bool {
        match event {
            ChangeEvent::Update { old, new } => old.labels != new.labels,
            _ => true,
        }
    }
}

/// Accepts updates that changed annotations, and all other events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationChanged;

impl ChangeFilter for AnnotationChanged {
    fn accepts(&self, event: &ChangeEvent<'_>) -> bool {
        match event {
            ChangeEvent::Update { old, new } => old.annotations != new.annotations,
            _ => true,
        }
    }
}

/// Accepts when any inner filter accepts.
pub struct Or(pub Vec<Box<dyn ChangeFilter>>);

impl ChangeFilter for Or {
    fn accepts(&self, event: &ChangeEvent<'_>) -> bool {
        self.0.iter().any(|f| f.accepts(event))
    }
}

/// Accepts when every inner filter accepts.
pub struct And(pub Vec<Box<dyn ChangeFilter>>);

impl ChangeFilter for And {
    fn accepts(&self, event: &ChangeEvent<'_>) -> bool {
        self.0.iter().all(|f| f.accepts(event))
    }
}

impl fmt::Debug for Or {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Or({} filters)", self.0.len())
    }
}

impl fmt::Debug for And {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "And({} filters)", self.0.len())
    }
}

/// Generation, label or annotation changes.
pub fn default_filter() -> Box<dyn ChangeFilter> {
    Box::new(Or(vec![
        Box::new(GenerationChanged),
        Box::new(LabelChanged),
        Box::new(AnnotationChanged),
    ]))
}
