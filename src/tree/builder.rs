//! Copy-on-write tree builder
//!
//! Every edit to a `Tree` goes through here: merge, mount updaters and case
//! reducers. Only the maps along an edited path are copied; everything else is
//! carried over by reference.

use crate::tree::{KeyPath, Tree, Value};

/// Accumulates edits against a base tree and copies it at most once.
pub struct TreeBuilder {
    base: Tree,
    edited: Option<Tree>,
}

impl TreeBuilder {
    pub fn new(base: &Tree) -> Self {
        Self {
            base: base.clone(),
            edited: None,
        }
    }

    /// Current value for `key`, including edits made so far.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.current().get(key)
    }

    /// Set `key`. Writing a value identical to the current one is a no-op.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.get(&key).is_some_and(|current| current.same(&value)) {
            return;
        }
        self.edit().make_mut().insert(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        if self.get(key).is_none() {
            return;
        }
        self.edit().make_mut().remove(key);
    }

    /// Finish. Returns the base tree itself when nothing changed.
    pub fn build(self) -> Tree {
        self.edited.unwrap_or(self.base)
    }

    fn current(&self) -> &Tree {
        self.edited.as_ref().unwrap_or(&self.base)
    }

    fn edit(&mut self) -> &mut Tree {
        if self.edited.is_none() {
            // Detach from the base so make_mut copies exactly once.
            self.edited = Some(Tree::from_map(self.base.as_map().clone()));
        }
        self.edited.get_or_insert_with(Tree::new)
    }
}

impl Tree {
    /// New tree with `key` set to `value`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Tree {
        let mut builder = TreeBuilder::new(self);
        builder.insert(key, value.into());
        builder.build()
    }

    /// New tree without `key`.
    pub fn remove(&self, key: &str) -> Tree {
        let mut builder = TreeBuilder::new(self);
        builder.remove(key);
        builder.build()
    }

    /// Rewrite the value at `path`.
    ///
    /// `f` receives the current value (if any) and returns the replacement;
    /// returning `None` removes the key. Missing or non-map intermediate
    /// segments are replaced by empty maps.
    pub fn update_in<F>(&self, path: &KeyPath, f: F) -> Tree
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        update_segments(self, path.segments(), f)
    }

    /// New tree with the value at `path` replaced.
    pub fn set_in(&self, path: &KeyPath, value: impl Into<Value>) -> Tree {
        let value = value.into();
        self.update_in(path, move |_| Some(value))
    }
}

fn update_segments<F>(tree: &Tree, segments: &[String], f: F) -> Tree
where
    F: FnOnce(Option<&Value>) -> Option<Value>,
{
    let Some((head, rest)) = segments.split_first() else {
        return tree.clone();
    };

    let mut builder = TreeBuilder::new(tree);
    let replacement = if rest.is_empty() {
        f(tree.get(head))
    } else {
        let child = tree.get_tree(head).cloned().unwrap_or_default();
        Some(Value::Map(update_segments(&child, rest, f)))
    };

    match replacement {
        Some(value) => builder.insert(head.clone(), value),
        None => builder.remove(head),
    }
    builder.build()
}
