//! Sparse Patches
//!
//! A `Patch` mirrors the shape of a state tree but only carries what changed:
//! an absent key is unchanged, `Deleted` removes the key, `Nested` recurses
//! and `Value` replaces. Patches are transient; they live for one flush or one
//! diff-then-merge call.

pub mod clean;
pub mod diff;
pub mod merge;

pub use clean::{clean, clean_value};
pub use diff::{diff, Diff, DiffView};
pub use merge::{merge, merge_patches, merge_trees, MergeOptions};

use crate::tree::{Tree, Value};
use std::collections::BTreeMap;

/// One entry of a patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// The key was removed.
    Deleted,
    /// Replace with this value.
    Value(Value),
    /// Recurse into the nested map.
    Nested(Patch),
}

impl PatchValue {
    pub fn is_deleted(&self) -> bool {
        matches!(self, PatchValue::Deleted)
    }

    /// View a map-shaped entry as a patch.
    ///
    /// A replaced map (`Value(Map)`) is read as a patch that sets every key.
    pub fn as_patch(&self) -> Option<Patch> {
        match self {
            PatchValue::Nested(patch) => Some(patch.clone()),
            PatchValue::Value(Value::Map(tree)) => Some(Patch::from_tree(tree)),
            _ => None,
        }
    }

    /// Leaf value, if this entry replaces a value.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PatchValue::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for PatchValue {
    fn from(value: Value) -> Self {
        PatchValue::Value(value)
    }
}

impl From<Patch> for PatchValue {
    fn from(patch: Patch) -> Self {
        PatchValue::Nested(patch)
    }
}

/// Sparse tree of changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch(BTreeMap<String, PatchValue>);

impl Patch {
    pub fn new() -> Self {
        Patch::default()
    }

    /// Patch that sets every top-level key of `tree`.
    pub fn from_tree(tree: &Tree) -> Self {
        Patch(
            tree.iter()
                .map(|(k, v)| (k.to_string(), PatchValue::Value(v.clone())))
                .collect(),
        )
    }

    /// Materialize as a tree. `Deleted` entries are dropped.
    pub fn to_tree(&self) -> Tree {
        self.0
            .iter()
            .filter_map(|(k, v)| match v {
                PatchValue::Deleted => None,
                PatchValue::Value(value) => Some((k.clone(), value.clone())),
                PatchValue::Nested(patch) => Some((k.clone(), Value::Map(patch.to_tree()))),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&PatchValue> {
        self.0.get(key)
    }

    /// Nested patch under `key`, see [`PatchValue::as_patch`].
    pub fn get_patch(&self, key: &str) -> Option<Patch> {
        self.get(key).and_then(PatchValue::as_patch)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PatchValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PatchValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<PatchValue> {
        self.0.remove(key)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PatchValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Keep only `keys`.
    pub fn pick(&self, keys: &[&str]) -> Patch {
        Patch(
            keys.iter()
                .filter_map(|k| self.0.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect(),
        )
    }

    /// Map every entry through `f`.
    ///
    /// `Deleted` entries pass through without calling `f`, so deletions in a
    /// keyed collection survive projection. Entries for which `f` returns
    /// `None` are dropped.
    pub fn map_entries<F>(&self, mut f: F) -> Patch
    where
        F: FnMut(&str, &PatchValue) -> Option<PatchValue>,
    {
        Patch(
            self.0
                .iter()
                .filter_map(|(k, v)| match v {
                    PatchValue::Deleted => Some((k.clone(), PatchValue::Deleted)),
                    other => f(k, other).map(|mapped| (k.clone(), mapped)),
                })
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<PatchValue>> FromIterator<(K, V)> for Patch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Patch(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
