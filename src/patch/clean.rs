//! Patch cleanup
//!
//! Persist functions project a diff onto the fields a channel cares about,
//! which leaves empty branches behind for everything they filtered out.
//! Cleaning strips those so a sink never fires for a no-op.

use crate::patch::{Patch, PatchValue};
use crate::tree::{Tree, Value};

/// Drop empty branches. Returns `None` when nothing is left.
///
/// `Deleted` markers, arrays and scalars are kept as they are.
pub fn clean(patch: &Patch) -> Option<Patch> {
    let cleaned: Patch = patch
        .iter()
        .filter_map(|(key, entry)| {
            let kept = match entry {
                PatchValue::Deleted => Some(PatchValue::Deleted),
                PatchValue::Nested(nested) => clean(nested).map(PatchValue::Nested),
                PatchValue::Value(value) => clean_value(value).map(PatchValue::Value),
            };
            kept.map(|entry| (key, entry))
        })
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Clean a value. Maps that end up empty become `None`.
pub fn clean_value(value: &Value) -> Option<Value> {
    match value {
        Value::Map(tree) => clean_tree(tree).map(Value::Map),
        other => Some(other.clone()),
    }
}

fn clean_tree(tree: &Tree) -> Option<Tree> {
    let mut unchanged = true;
    let mut entries = Vec::with_capacity(tree.len());
    for (key, value) in tree.iter() {
        match clean_value(value) {
            Some(cleaned) => {
                unchanged &= cleaned.same(value);
                entries.push((key, cleaned));
            }
            None => unchanged = false,
        }
    }

    if entries.is_empty() {
        None
    } else if unchanged {
        Some(tree.clone())
    } else {
        Some(entries.into_iter().collect())
    }
}
