//! Properties the reconcile loop guarantees regardless of domain logic.
//!
//! Properties verified:
//! - Idempotence: a converged object reconciles without store writes
//! - No-op patch: a mutation that changes nothing issues no write
//! - Identity immutability: renaming through a patch fails without a write
//! - Conflict absorption: write conflicts never surface as errors
//! - Finalizer invariant: the marker is present after any successful pass

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{key, Harness, ReplicaActor, Widget, MARKER};
use converge_core::ObjectKey;
use converge_reconciler::{Error, Outcome, ScopedClient};
use proptest::prelude::*;

const FIXED: Outcome = Outcome::RequeueAfter(Duration::from_secs(2));

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    unwrap_result(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
        "runtime creation should succeed",
    )
}

// ==========================================================================
// PROPERTY: Idempotence
// ==========================================================================

#[tokio::test]
async fn test_second_reconcile_of_converged_object_writes_nothing() {
    // GIVEN: a converged widget reconciled once
    let harness = Harness::new();
    harness.create(Widget::converged("a", 2)).await;
    let actor = ReplicaActor::default();
    let controller = harness.controller(actor.clone());
    assert!(matches!(controller.reconcile(&key("a")).await, Ok(Outcome::Forget)));
    let writes = harness.store.writes();

    // WHEN: it is reconciled again
    let outcome = controller.reconcile(&key("a")).await;

    // THEN: forgotten, no action, no store write
    assert!(matches!(outcome, Ok(Outcome::Forget)));
    assert_eq!(actor.calls.acted(), 0);
    assert_eq!(harness.store.writes(), writes);
}

proptest! {
    /// Property: whatever the starting replicas, reconciling until the
    /// controller forgets the object leaves it in a state whose next
    /// reconcile is a pure read.
    #[test]
    fn prop_converged_reconcile_is_pure(replicas in 0u32..20, ready in 0u32..20) {
        let rt = runtime();
        rt.block_on(async {
            let harness = Harness::new();
            let mut widget = Widget::new("a", replicas);
            widget.status.ready_replicas = ready;
            harness.create(widget).await;
            let controller = harness.controller(ReplicaActor::default());

            let mut converged = false;
            for _ in 0..4 {
                let outcome = unwrap_result(controller.reconcile(&key("a")).await, "reconcile");
                if outcome == Outcome::Forget {
                    converged = true;
                    break;
                }
                assert_eq!(outcome, FIXED);
            }
            assert!(converged, "widget should converge within four passes");

            let writes = harness.store.writes();
            let outcome = unwrap_result(controller.reconcile(&key("a")).await, "reconcile");
            assert_eq!(outcome, Outcome::Forget);
            assert_eq!(harness.store.writes(), writes);
        });
    }
}

// ==========================================================================
// PROPERTY: No-op patch and identity immutability
// ==========================================================================

#[tokio::test]
async fn test_unchanged_patch_issues_no_write() {
    let harness = Harness::new();
    let mut widget = harness.create(Widget::new("a", 1)).await;
    let client = ScopedClient::new(harness.client.clone());
    let writes = harness.store.writes();

    let written = client
        .patch(&mut widget, |w| {
            w.spec.replicas = 1;
            Ok(())
        })
        .await
        .unwrap();

    assert!(!written);
    assert_eq!(harness.store.writes(), writes);
}

#[tokio::test]
async fn test_patch_replaces_object_with_stored_version() {
    let harness = Harness::new();
    let mut widget = harness.create(Widget::new("a", 1)).await;
    let before = widget.metadata.resource_version.clone();
    let client = ScopedClient::new(harness.client.clone());

    let written = client
        .patch(&mut widget, |w| {
            w.spec.replicas = 5;
            Ok(())
        })
        .await
        .unwrap();

    assert!(written);
    assert_eq!(widget.metadata.generation, 2);
    assert_ne!(widget.metadata.resource_version, before);
}

#[tokio::test]
async fn test_stale_patch_conflicts() {
    // GIVEN: two copies of the same widget
    let harness = Harness::new();
    let mut first = harness.create(Widget::new("a", 1)).await;
    let mut second = first.clone();
    let client = ScopedClient::new(harness.client.clone());

    // WHEN: both are patched
    client
        .patch(&mut first, |w| {
            w.spec.replicas = 2;
            Ok(())
        })
        .await
        .unwrap();
    let result = client
        .patch(&mut second, |w| {
            w.spec.replicas = 3;
            Ok(())
        })
        .await;

    // THEN: the stale copy loses the race
    assert!(result.is_err_and(|e| e.is_conflict()));
}

proptest! {
    /// Property: changing the namespace or name inside a patch is rejected,
    /// nothing is written, and the caller's object is left as it was.
    #[test]
    fn prop_identity_change_rejected(
        namespace in "[a-z]{1,8}",
        name in "[a-z]{1,8}",
        replicas in 0u32..10,
    ) {
        prop_assume!(namespace != common::NAMESPACE || name != "a");
        let rt = runtime();
        rt.block_on(async {
            let harness = Harness::new();
            let mut widget = harness.create(Widget::new("a", 1)).await;
            let original = widget.clone();
            let client = ScopedClient::new(harness.client.clone());
            let writes = harness.store.writes();

            let result = client
                .patch(&mut widget, |w| {
                    w.metadata.namespace.clone_from(&namespace);
                    w.metadata.name.clone_from(&name);
                    w.spec.replicas = replicas;
                    Ok(())
                })
                .await;

            assert!(matches!(
                result,
                Err(Error::Core(converge_core::Error::ImmutableIdentity { .. }))
            ));
            assert_eq!(harness.store.writes(), writes);
            assert_eq!(widget, original);
        });
    }
}

// ==========================================================================
// PROPERTY: Conflict absorption
// ==========================================================================

#[tokio::test]
async fn test_conflict_adding_finalizer_requeues() {
    let harness = Harness::new();
    harness.create(Widget::converged("a", 1)).await;
    harness.store.conflict_next_patches(1);
    let actor = ReplicaActor::default();
    let controller = harness.controller(actor.clone());

    let outcome = controller.reconcile(&key("a")).await;

    assert!(matches!(outcome, Ok(o) if o == FIXED));
    assert_eq!(actor.calls.observed(), 0);
}

#[tokio::test]
async fn test_conflict_raised_by_actor_requeues() {
    let harness = Harness::new();
    harness.create(Widget::new("a", 1)).await;
    let actor = ReplicaActor::default().failing_observe(|| {
        Error::from(converge_core::Error::conflict(
            "Widget",
            ObjectKey::new("default", "a"),
            "stale",
        ))
    });
    let controller = harness.controller(actor);

    let outcome = controller.reconcile(&key("a")).await;

    assert!(matches!(outcome, Ok(o) if o == FIXED));
    assert!(harness.reasons().await.is_empty());
}

#[tokio::test]
async fn test_conflict_wrapped_in_anyhow_requeues() {
    let harness = Harness::new();
    harness.create(Widget::new("a", 1)).await;
    let actor = ReplicaActor::default().failing_observe(|| {
        let conflict =
            converge_core::Error::conflict("Widget", ObjectKey::new("default", "a"), "stale");
        Error::from(anyhow::Error::new(conflict).context("refreshing widget"))
    });
    let controller = harness.controller(actor);

    let outcome = controller.reconcile(&key("a")).await;

    assert!(matches!(outcome, Ok(o) if o == FIXED));
}

#[tokio::test]
async fn test_conflict_removing_finalizer_requeues() {
    let harness = Harness::new();
    harness
        .create_deleting(Widget::new("a", 1).with_finalizer(MARKER))
        .await;
    harness.store.conflict_next_patches(1);
    let controller = harness.controller(ReplicaActor::default());

    let outcome = controller.reconcile(&key("a")).await;

    assert!(matches!(outcome, Ok(o) if o == FIXED));
    assert!(harness.get("a").await.is_some());
}

proptest! {
    /// Property: however many of the controller's writes conflict, a
    /// reconcile never returns an error for it, and each conflicting pass
    /// asks for the fixed requeue.
    #[test]
    fn prop_conflicts_never_surface(conflicts in 0usize..4, needs_action in any::<bool>()) {
        let rt = runtime();
        rt.block_on(async {
            let harness = Harness::new();
            let widget = if needs_action {
                Widget::new("a", 2)
            } else {
                Widget::converged("a", 2)
            };
            harness.create(widget).await;
            harness.store.conflict_next_patches(conflicts);
            let controller = harness.controller(ReplicaActor::default());

            let outcome = controller.reconcile(&key("a")).await;

            match outcome {
                Ok(Outcome::Forget) => assert_eq!(conflicts, 0),
                Ok(o) => assert_eq!(o, FIXED),
                Err(e) => panic!("conflict surfaced as error: {e}"),
            }
        });
    }
}

// ==========================================================================
// PROPERTY: Finalizer invariant
// ==========================================================================

proptest! {
    /// Property: after a pass that reached the actor, the marker is present
    /// exactly when neither skip option is set.
    #[test]
    fn prop_marker_present_after_ensure(skip_finalizer in any::<bool>(), skip_patch in any::<bool>()) {
        let rt = runtime();
        rt.block_on(async {
            let harness = Harness::new();
            harness.create(Widget::converged("a", 1)).await;
            let mut options = harness.options();
            if skip_finalizer {
                options = options.skip_finalizer();
            }
            if skip_patch {
                options = options.skip_patch_finalizer();
            }
            let actor = ReplicaActor::default();
            let controller = harness.controller_with(actor.clone(), options);

            let outcome = unwrap_result(controller.reconcile(&key("a")).await, "reconcile");
            assert_eq!(outcome, Outcome::Forget);
            assert_eq!(actor.calls.observed(), 1);

            let stored = harness.get("a").await.expect("widget exists");
            assert_eq!(
                stored.metadata.has_finalizer(MARKER),
                !skip_finalizer && !skip_patch
            );
        });
    }
}
