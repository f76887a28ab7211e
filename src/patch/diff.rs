//! Structural diff
//!
//! Compares two trees by reference identity, key by key. Subtrees that are the
//! same allocation are skipped without being inspected, so the cost of a diff
//! is proportional to the path of the change, not the size of the state.

use crate::patch::{Patch, PatchValue};
use crate::tree::{Tree, Value};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Result of comparing two trees.
#[derive(Debug)]
pub enum Diff {
    /// Both trees are the same allocation.
    Same,
    /// The trees are different allocations. The patch may still be empty.
    Changed(DiffView),
}

impl Diff {
    pub fn is_same(&self) -> bool {
        matches!(self, Diff::Same)
    }

    /// The patch, computed on first access. `None` for `Diff::Same`.
    pub fn patch(&self) -> Option<&Patch> {
        match self {
            Diff::Same => None,
            Diff::Changed(view) => Some(view.patch()),
        }
    }
}

/// Lazily computed patch between two trees.
#[derive(Debug)]
pub struct DiffView {
    previous: Tree,
    next: Tree,
    patch: OnceLock<Patch>,
}

impl DiffView {
    fn new(previous: &Tree, next: &Tree) -> Self {
        Self {
            previous: previous.clone(),
            next: next.clone(),
            patch: OnceLock::new(),
        }
    }

    pub fn previous(&self) -> &Tree {
        &self.previous
    }

    pub fn next(&self) -> &Tree {
        &self.next
    }

    /// Whether the patch has been materialized yet.
    pub fn is_computed(&self) -> bool {
        self.patch.get().is_some()
    }

    /// Compute once; later calls return the cached patch.
    pub fn patch(&self) -> &Patch {
        self.patch
            .get_or_init(|| compute_patch(&self.previous, &self.next))
    }

    pub fn into_patch(self) -> Patch {
        match self.patch.into_inner() {
            Some(patch) => patch,
            None => compute_patch(&self.previous, &self.next),
        }
    }
}

/// Diff `previous` against `next`.
pub fn diff(previous: &Tree, next: &Tree) -> Diff {
    if previous.ptr_eq(next) {
        return Diff::Same;
    }
    Diff::Changed(DiffView::new(previous, next))
}

fn compute_patch(previous: &Tree, next: &Tree) -> Patch {
    let keys: BTreeSet<&str> = previous.keys().chain(next.keys()).collect();
    let mut patch = Patch::new();

    for key in keys {
        match (previous.get(key), next.get(key)) {
            (Some(before), Some(after)) if before.same(after) => {}
            (Some(Value::Map(before)), Some(Value::Map(after))) => {
                // Kept even when empty: different allocations, nothing changed inside.
                patch.insert(key, PatchValue::Nested(compute_patch(before, after)));
            }
            (_, Some(after)) => patch.insert(key, PatchValue::Value(after.clone())),
            (Some(_), None) => patch.insert(key, PatchValue::Deleted),
            (None, None) => {}
        }
    }

    patch
}
