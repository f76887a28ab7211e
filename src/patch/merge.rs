//! Patch merge with structural sharing
//!
//! Applying a patch copies only the maps on the paths it touches; every other
//! subtree of the target keeps its allocation.

use crate::patch::{Patch, PatchValue};
use crate::tree::{Tree, TreeBuilder, Value};

/// Options for composing patches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Write `Deleted` markers into the output instead of removing the key.
    /// Used while composing persist results so a deletion survives until
    /// the composed patch is finally applied to a tree.
    pub preserve_delete_marker: bool,
}

/// Apply `patch` to `target`.
///
/// An empty patch returns `target` itself.
pub fn merge(target: &Tree, patch: &Patch) -> Tree {
    if patch.is_empty() {
        return target.clone();
    }

    let mut builder = TreeBuilder::new(target);
    for (key, entry) in patch.iter() {
        match entry {
            PatchValue::Deleted => builder.remove(key),
            PatchValue::Nested(nested) => {
                let merged = match target.get_tree(key) {
                    Some(existing) => merge(existing, nested),
                    None => nested.to_tree(),
                };
                builder.insert(key, Value::Map(merged));
            }
            PatchValue::Value(Value::Map(source)) => {
                let merged = match target.get_tree(key) {
                    Some(existing) => merge_trees(existing, source),
                    None => source.clone(),
                };
                builder.insert(key, Value::Map(merged));
            }
            PatchValue::Value(value) => builder.insert(key, value.clone()),
        }
    }
    builder.build()
}

/// Deep-merge `source` onto `target`.
pub fn merge_trees(target: &Tree, source: &Tree) -> Tree {
    merge(target, &Patch::from_tree(source))
}

/// Compose `overlay` on top of `base`.
pub fn merge_patches(base: &Patch, overlay: &Patch, options: MergeOptions) -> Patch {
    if overlay.is_empty() {
        return base.clone();
    }

    let mut output = base.clone();
    for (key, entry) in overlay.iter() {
        match entry {
            PatchValue::Deleted => {
                if options.preserve_delete_marker {
                    output.insert(key, PatchValue::Deleted);
                } else {
                    output.remove(key);
                }
            }
            PatchValue::Value(Value::Map(_)) | PatchValue::Nested(_) => {
                match (base.get_patch(key), entry.as_patch()) {
                    (Some(existing), Some(incoming)) => {
                        output.insert(key, merge_patches(&existing, &incoming, options));
                    }
                    _ => output.insert(key, entry.clone()),
                }
            }
            PatchValue::Value(value) => output.insert(key, value.clone()),
        }
    }
    output
}
