//! Controller options and optional object capabilities.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use converge_core::{Condition, Conditional, ConditionalStatus, Object};

use crate::config::{ControllerConfig, DispatchOptions};
use crate::dependency::{Dependant, Dependency};
use crate::filter::ChangeFilter;
use crate::recorder::EventRecorder;
use crate::setup::RegistrationBuilder;

type ConditionsFn<T> = fn(&mut T) -> &mut ConditionalStatus;
type DependenciesFn<T> = fn(&T) -> Vec<Box<dyn Dependency>>;

/// Optional behaviour of an object type, declared once at setup.
///
/// Without a registered capability the controller skips the matching step:
/// no condition bookkeeping, no dependency gating.
pub struct Capabilities<T> {
    conditions: Option<ConditionsFn<T>>,
    dependencies: Option<DependenciesFn<T>>,
}

impl<T> Default for Capabilities<T> {
    fn default() -> Self {
        Self {
            conditions: None,
            dependencies: None,
        }
    }
}

impl<T> Clone for Capabilities<T> {
    fn clone(&self) -> Self {
        Self {
            conditions: self.conditions,
            dependencies: self.dependencies,
        }
    }
}

impl<T: Object> Capabilities<T> {
    /// No optional capabilities.
    pub fn none() -> Self {
        Self::default()
    }

    /// Track conditions through the given accessor.
    #[must_use]
    pub fn with_conditions(mut self, accessor: ConditionsFn<T>) -> Self {
        self.conditions = Some(accessor);
        self
    }

    /// Gate reconciles on the declared dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, declare: DependenciesFn<T>) -> Self {
        self.dependencies = Some(declare);
        self
    }

    /// Whether condition bookkeeping is enabled.
    pub const fn tracks_conditions(&self) -> bool {
        self.conditions.is_some()
    }

    /// Upsert a condition if the type tracks conditions; returns whether it
    /// did.
    pub fn set_condition(&self, obj: &mut T, condition: Condition) -> bool {
        match self.conditions {
            Some(accessor) => {
                accessor(obj).set_condition(condition);
                true
            }
            None => false,
        }
    }

    /// The object's dependencies, if the type declares any.
    pub fn dependencies(&self, obj: &T) -> Option<Vec<Box<dyn Dependency>>> {
        self.dependencies.map(|declare| declare(obj))
    }
}

impl<T: Object + Conditional> Capabilities<T> {
    /// Track conditions through the [`Conditional`] impl.
    #[must_use]
    pub fn conditional(self) -> Self {
        self.with_conditions(<T as Conditional>::conditional_status_mut)
    }
}

impl<T: Object + Dependant> Capabilities<T> {
    /// Gate reconciles on the [`Dependant`] impl.
    #[must_use]
    pub fn dependant(self) -> Self {
        self.with_dependencies(<T as Dependant>::dependencies)
    }
}

impl<T> fmt::Debug for Capabilities<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("conditions", &self.conditions.is_some())
            .field("dependencies", &self.dependencies.is_some())
            .finish()
    }
}

pub(crate) type BuildFn = Box<dyn FnOnce(&mut RegistrationBuilder) + Send>;

/// Options for [`setup`](crate::setup::setup).
pub struct Options<T> {
    pub(crate) recorder: Option<Arc<dyn EventRecorder>>,
    pub(crate) build_fn: Option<BuildFn>,
    pub(crate) filter: Option<Box<dyn ChangeFilter>>,
    pub(crate) config: ControllerConfig,
    pub(crate) capabilities: Capabilities<T>,
}

impl<T> Default for Options<T> {
    fn default() -> Self {
        Self {
            recorder: None,
            build_fn: None,
            filter: None,
            config: ControllerConfig::default(),
            capabilities: Capabilities::default(),
        }
    }
}

impl<T: Object> Options<T> {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options from a loaded configuration.
    pub fn from_config(config: ControllerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Record events through `recorder` instead of the log.
    #[must_use]
    pub fn with_event_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Customize the registration, e.g. to declare owned or watched kinds.
    #[must_use]
    pub fn with_build_fn(mut self, build: impl FnOnce(&mut RegistrationBuilder) + Send + 'static) -> Self {
        self.build_fn = Some(Box::new(build));
        self
    }

    /// Replace the default change filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl ChangeFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Never add the finalizer marker.
    #[must_use]
    pub const fn skip_finalizer(mut self) -> Self {
        self.config.skip_finalizer = true;
        self
    }

    /// Handle deletion without ever adding or removing the marker.
    #[must_use]
    pub const fn skip_patch_finalizer(mut self) -> Self {
        self.config.skip_patch_finalizer = true;
        self
    }

    /// Never write status back to the store.
    #[must_use]
    pub const fn skip_status_sync(mut self) -> Self {
        self.config.skip_status_sync = true;
        self
    }

    /// Dispatcher concurrency and rate limit.
    #[must_use]
    pub const fn with_dispatch_options(mut self, dispatch: DispatchOptions) -> Self {
        self.config.dispatch = dispatch;
        self
    }

    /// Delay of fixed-interval requeues.
    #[must_use]
    pub const fn with_requeue_after(mut self, delay: Duration) -> Self {
        self.config.requeue_after = delay;
        self
    }

    /// Prefix of the finalizer marker.
    #[must_use]
    pub fn with_finalizer_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.finalizer_prefix = prefix.into();
        self
    }

    /// Declare the object type's optional capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities<T>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The effective configuration.
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }
}

impl<T> fmt::Debug for Options<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("custom_recorder", &self.recorder.is_some())
            .field("custom_filter", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use converge_core::CONDITION_TYPE_SYNCED;

    use super::*;
    use crate::testing::Gadget;

    #[test]
    fn test_builder_updates_config() {
        let options = Options::<Gadget>::new()
            .skip_finalizer()
            .skip_status_sync()
            .with_requeue_after(Duration::from_secs(7))
            .with_finalizer_prefix("example.io");

        let config = options.config();
        assert!(config.skip_finalizer);
        assert!(!config.skip_patch_finalizer);
        assert!(config.skip_status_sync);
        assert_eq!(config.requeue_after, Duration::from_secs(7));
        assert_eq!(config.finalizer_prefix, "example.io");
    }

    #[test]
    fn test_without_conditions_capability_nothing_is_set() {
        let mut gadget = Gadget::new("ns", "g");
        let set = Capabilities::none().set_condition(&mut gadget, Condition::synced(true, 1));

        assert!(!set);
        assert!(gadget.status.conditional.conditions.is_empty());
    }

    #[test]
    fn test_conditional_capability_sets_condition() {
        let mut gadget = Gadget::new("ns", "g");
        let capabilities = Capabilities::none().conditional();

        assert!(capabilities.set_condition(&mut gadget, Condition::synced(true, 1)));
        assert!(gadget.status.conditional.is_true(CONDITION_TYPE_SYNCED));
        assert!(capabilities.dependencies(&gadget).is_none());
    }
}
