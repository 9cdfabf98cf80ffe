//! Teardown marker management.
//!
//! A controller owns one marker on each object it manages. The store keeps a
//! deleted object around while any marker remains, which gives the controller
//! a chance to tear down what it created before the object disappears.

use converge_core::{Object, ObjectMeta};
use tracing::info;

use crate::context::Context;
use crate::error::Result;

/// Prefix of finalizer markers unless configured otherwise.
pub const DEFAULT_FINALIZER_PREFIX: &str = "converge.io";

/// Where an object stands with respect to this controller's teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownState {
    /// Not being deleted.
    Active,
    /// Deletion requested and the marker is still present. Teardown runs on
    /// every pass until it reports done and the marker is stripped.
    MarkedForTeardown,
    /// Deletion requested while markers are not managed by this controller
    /// (`skip_patch`). Teardown runs on every pass; no marker is stripped.
    Unmanaged,
    /// Deletion requested and the marker is gone; nothing left to do here.
    Removed,
}

/// The marker of one controller and how it is maintained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalizer {
    marker: String,
    skip_ensure: bool,
    skip_patch: bool,
}

impl Finalizer {
    /// Marker `<prefix>/<controller name>`.
    pub fn new(prefix: &str, controller: &str) -> Self {
        Self {
            marker: format!("{prefix}/{controller}"),
            skip_ensure: false,
            skip_patch: false,
        }
    }

    /// Never add the marker.
    #[must_use]
    pub const fn skip_ensure(mut self, skip: bool) -> Self {
        self.skip_ensure = skip;
        self
    }

    /// Never add or remove the marker; teardown always runs.
    #[must_use]
    pub const fn skip_patch(mut self, skip: bool) -> Self {
        self.skip_patch = skip;
        self
    }

    /// The marker string.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Whether this controller's marker is on the object.
    pub fn is_present(&self, meta: &ObjectMeta) -> bool {
        meta.has_finalizer(&self.marker)
    }

    /// Teardown state of an object.
    pub fn state(&self, meta: &ObjectMeta) -> TeardownState {
        if !meta.is_deleting() {
            TeardownState::Active
        } else if self.skip_patch {
            TeardownState::Unmanaged
        } else if self.is_present(meta) {
            TeardownState::MarkedForTeardown
        } else {
            TeardownState::Removed
        }
    }

    /// Whether domain teardown must run for an object being deleted.
    pub fn should_finalize(&self, meta: &ObjectMeta) -> bool {
        matches!(
            self.state(meta),
            TeardownState::MarkedForTeardown | TeardownState::Unmanaged
        )
    }

    /// Add the marker unless skipped or already present.
    ///
    /// Returns whether a write was issued.
    pub async fn ensure<T: Object>(&self, ctx: &mut Context<T>) -> Result<bool> {
        if self.skip_ensure || self.skip_patch || self.is_present(ctx.obj.meta()) {
            return Ok(false);
        }
        let marker = self.marker.clone();
        let written = ctx
            .client
            .patch(&mut ctx.obj, move |obj| {
                obj.meta_mut().add_finalizer(&marker);
                Ok(())
            })
            .await?;
        if written {
            info!(marker = %self.marker, "Added finalizer");
        }
        Ok(written)
    }

    /// Remove the marker once teardown completed.
    ///
    /// Returns whether a write was issued.
    pub async fn remove<T: Object>(&self, ctx: &mut Context<T>) -> Result<bool> {
        if self.skip_patch || !self.is_present(ctx.obj.meta()) {
            return Ok(false);
        }
        let marker = self.marker.clone();
        let written = ctx
            .client
            .patch(&mut ctx.obj, move |obj| {
                obj.meta_mut().remove_finalizer(&marker);
                Ok(())
            })
            .await?;
        if written {
            info!(marker = %self.marker, "Removed finalizer");
        }
        Ok(written)
    }
}
