//! Combining top-level slices
//!
//! The root slice of a store keys every top-level slice's state under its
//! name. Unrouted actions reach every top-level reducer; routed actions only
//! reach the slice that owns the branch.

use crate::error::{CollisionKind, SliceError};
use crate::patch::{clean, Patch, PatchValue};
use crate::slice::{
    default_restore, scope_selectors, Action, ActionCreators, PersistFn, Reducer, RestoreFn, Route,
    Slice, StateSelector,
};
use crate::tree::{Tree, TreeBuilder, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Combine `slices` into one root slice named `name`.
pub fn combine_slices(name: impl Into<String>, slices: Vec<Slice>) -> Result<Slice, SliceError> {
    let name = name.into();
    let mut seen = BTreeSet::new();
    for slice in &slices {
        let names = std::iter::once(slice.name.as_str()).chain(slice.branch_names());
        for candidate in names {
            if candidate == name || !seen.insert(candidate.to_string()) {
                return Err(SliceError::NameCollision {
                    name: candidate.to_string(),
                    target: name.clone(),
                    kind: if candidate == slice.name {
                        CollisionKind::Branch
                    } else {
                        CollisionKind::NestedBranch
                    },
                });
            }
        }
    }

    let slices: Arc<Vec<Slice>> = Arc::new(slices);

    let initial_state: Tree = slices
        .iter()
        .map(|slice| (slice.name.clone(), slice.initial_state.clone()))
        .collect();

    let mut sub_actions: BTreeMap<String, ActionCreators> = BTreeMap::new();
    let mut sub_selectors = BTreeMap::new();
    for slice in slices.iter() {
        let key = slice.name.clone();
        let state_selector: StateSelector =
            Arc::new(move |state: &Tree| -> Option<Tree> { state.get_tree(&key).cloned() });

        sub_actions.insert(slice.name.clone(), slice.actions.routed(&slice.name));
        sub_selectors.insert(slice.name.clone(), scope_selectors(&slice.selectors, &state_selector));
        for (branch, actions) in &slice.sub_actions {
            sub_actions.insert(branch.clone(), actions.clone());
        }
        for (branch, selectors) in &slice.sub_selectors {
            sub_selectors.insert(branch.clone(), scope_selectors(selectors, &state_selector));
        }
    }

    let persist_state = combine_persist(&slices, |slice| slice.persist_state.clone());
    let persist_sensitive_state =
        combine_persist(&slices, |slice| slice.persist_sensitive_state.clone());
    let restore_state = combine_restore(&slices);

    Ok(Slice {
        reducer: combine_reducer(slices),
        name,
        initial_state,
        actions: ActionCreators::default(),
        selectors: Default::default(),
        sub_actions,
        sub_selectors,
        persist_state,
        persist_sensitive_state,
        restore_state,
    })
}

fn owns_route(slice: &Slice, route: &Route) -> bool {
    match route {
        Route::Unrouted => true,
        Route::Branch(tag) => *tag == slice.name || slice.sub_actions.contains_key(tag),
    }
}

fn combine_reducer(slices: Arc<Vec<Slice>>) -> Reducer {
    Arc::new(move |state: &Tree, action: &Action| -> Result<Tree, SliceError> {
        let mut builder = TreeBuilder::new(state);
        for slice in slices.iter().filter(|slice| owns_route(slice, &action.route)) {
            let current = match state.get_tree(&slice.name) {
                Some(current) => current.clone(),
                None => slice.initial_state.clone(),
            };
            let next = slice.reduce(&current, action)?;
            builder.insert(slice.name.clone(), Value::Map(next));
        }
        Ok(builder.build())
    })
}

/// Hand every top-level key of the diff to the slice that owns it.
fn combine_persist<F>(slices: &Arc<Vec<Slice>>, hook: F) -> Option<PersistFn>
where
    F: Fn(&Slice) -> Option<PersistFn>,
{
    let hooks: BTreeMap<String, PersistFn> = slices
        .iter()
        .filter_map(|slice| hook(slice).map(|f| (slice.name.clone(), f)))
        .collect();
    if hooks.is_empty() {
        return None;
    }

    Some(Arc::new(move |diff: &Patch| -> Patch {
        let mut output = Patch::new();
        for (key, entry) in diff.iter() {
            if matches!(entry, PatchValue::Deleted) {
                continue;
            }
            let (Some(persist), Some(sub_diff)) = (hooks.get(key), entry.as_patch()) else {
                continue;
            };
            if let Some(persisted) = clean(&persist(&sub_diff)) {
                output.insert(key, persisted);
            }
        }
        output
    }))
}

fn combine_restore(slices: &Arc<Vec<Slice>>) -> Option<RestoreFn> {
    let slices = slices.clone();
    Some(Arc::new(move |persisted: &Value, original: &Tree| -> Tree {
        let persisted = persisted.as_map();
        let mut builder = TreeBuilder::new(original);
        for (key, sub_state) in original.iter() {
            let Some(sub_state) = sub_state.as_map() else {
                continue;
            };
            let sub_persisted = persisted
                .and_then(|data| data.get(key))
                .cloned()
                .unwrap_or_else(|| Value::Map(Tree::new()));
            let restored = match slices.iter().find(|slice| slice.name == key) {
                Some(slice) => slice
                    .restore_state(&sub_persisted, sub_state)
                    .unwrap_or_else(|| default_restore(&sub_persisted, sub_state)),
                None => default_restore(&sub_persisted, sub_state),
            };
            builder.insert(key, Value::Map(restored));
        }
        builder.build()
    }))
}
