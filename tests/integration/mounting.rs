//! Slices mounted under aliases inside a composed root

use super::support::{counter_slice, tree, RecordingSink};
use serde_json::json;
use std::time::Duration;
use strata::error::CollisionKind;
use strata::{
    combine_slices, Action, KeyPath, MountOptions, PersistOptions, Slice, SliceBuilder,
    SliceError, Store,
};

fn dashboard() -> Slice {
    let initial = tree(json!({
        "title": "Overview",
        "left": {"value": 0, "sensitiveValue": 0},
        "right": {"value": 0, "sensitiveValue": 0}
    }));
    SliceBuilder::new("dashboard", initial)
        .case("rename", |state, payload| match payload.as_str() {
            Some(title) => state.set("title", title),
            None => state.clone(),
        })
        .persist_state(|diff| diff.pick(&["title"]))
        .build()
        .mount_at(
            counter_slice("counter"),
            "left",
            MountOptions::new()
                .as_name("left")
                .persist_state(|diff| match diff.get_patch("left") {
                    Some(left) => strata::Patch::new().with("left", left.pick(&["value"])),
                    None => strata::Patch::new(),
                }),
        )
        .unwrap()
        .mount_at(
            counter_slice("counter"),
            "right",
            MountOptions::new().as_name("right"),
        )
        .unwrap()
}

fn store() -> Store {
    let root = combine_slices("root", vec![dashboard()]).unwrap();
    Store::new(root, PersistOptions::new()).unwrap()
}

/// Aliased branches expose their own action creators and selectors
#[test]
fn test_aliased_branches_are_addressable() {
    let store = store();
    let branches: Vec<&str> = store.actions().keys().map(String::as_str).collect();
    assert_eq!(branches, vec!["dashboard", "left", "right"]);

    let action = store.action("left", "increment").unwrap();
    assert_eq!(action.kind, "counter/increment");

    store.dispatch(action).unwrap();
    store.dispatch(store.action("left", "increment").unwrap()).unwrap();
    store.dispatch(store.action("right", "decrement").unwrap()).unwrap();

    let value = |branch: &str| {
        store
            .select(branch, "value")
            .unwrap()
            .and_then(|value| value.as_i64())
    };
    assert_eq!(value("left"), Some(2));
    assert_eq!(value("right"), Some(-1));
}

/// Updating one branch keeps every sibling subtree by reference
#[test]
fn test_sibling_branch_keeps_reference() {
    let store = store();
    let before = store.state();
    store.dispatch(store.action("left", "increment").unwrap()).unwrap();
    let after = store.state();

    let right = KeyPath::parse("dashboard.right");
    let title = KeyPath::parse("dashboard.title");
    assert!(after
        .get_in(&right)
        .unwrap()
        .same(before.get_in(&right).unwrap()));
    assert!(after.get_in(&title).unwrap().same(before.get_in(&title).unwrap()));
    assert!(!after
        .get_in(&KeyPath::parse("dashboard.left"))
        .unwrap()
        .same(before.get_in(&KeyPath::parse("dashboard.left")).unwrap()));
}

/// Actions without a branch tag never reach mounted children
#[test]
fn test_untagged_action_skips_mounts() {
    let store = store();
    let before = store.state();
    store
        .dispatch(Action::new("counter/increment", json!(null)))
        .unwrap();
    assert!(store.state().get_tree("dashboard").unwrap().ptr_eq(before.get_tree("dashboard").unwrap()));

    store
        .dispatch(Action::new("dashboard/rename", "Today"))
        .unwrap();
    assert_eq!(
        store.state().get_in(&KeyPath::parse("dashboard.title")).and_then(|v| v.as_str()),
        Some("Today")
    );
}

/// Mounting a second branch under a taken name fails
#[test]
fn test_alias_collision() {
    let err = dashboard()
        .mount_at(counter_slice("counter"), "extra", MountOptions::new().as_name("left"))
        .unwrap_err();
    assert!(matches!(
        err,
        SliceError::NameCollision {
            kind: CollisionKind::Branch,
            ..
        }
    ));
}

/// Only branches with a mount-level persist hook reach the sink
#[tokio::test(start_paused = true)]
async fn test_mount_persist_hooks() {
    let sink = RecordingSink::default();
    let root = combine_slices("root", vec![dashboard()]).unwrap();
    let store = Store::new(
        root,
        PersistOptions::new()
            .persist(sink.clone())
            .debounce(Duration::from_millis(50)),
    )
    .unwrap();

    store.dispatch(store.action("left", "increment").unwrap()).unwrap();
    store.dispatch(store.action("right", "increment").unwrap()).unwrap();
    store.dispatch(store.action("left", "sensitiveIncrement").unwrap()).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(sink.count(), 1);
    assert_eq!(
        sink.last().unwrap().0,
        json!({"dashboard": {"left": {"value": 1}}})
    );
}
