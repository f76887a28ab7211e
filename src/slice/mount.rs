//! Mounting
//!
//! `Slice::mount` attaches a child slice's state somewhere inside a parent's
//! state through a selector/updater pair. The result is a new slice:
//!
//! - Reducer: the parent reducer always runs; the child reducer runs only for
//!   actions routed to the child's effective name or to one of its nested
//!   branches.
//! - Selectors: every child selector (and nested branch selector) is rebased
//!   onto the parent's state under the branch name.
//! - Persistence: parent hooks supply the baseline, mount hooks are merged on
//!   top with delete markers preserved.
//!
//! Effective names (own name or alias) act as routing keys, so they must be
//! unique across the whole composition tree.

use crate::error::{CollisionKind, SliceError};
use crate::patch::{merge_patches, merge_trees, MergeOptions, Patch};
use crate::slice::{
    scope_selectors, Action, PersistFn, Reducer, RestoreFn, Route, Slice, StateSelector,
    StateUpdater,
};
use crate::tree::{KeyPath, Tree, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Options for a single mount.
#[derive(Clone, Default)]
pub struct MountOptions {
    /// Mount under this name instead of the child's own name.
    pub as_name: Option<String>,
    /// The state selector may legitimately find no child state (e.g. the
    /// child lives inside a currently selected entry that may not exist).
    pub state_selector_can_return_undefined: bool,
    pub persist_state: Option<PersistFn>,
    pub persist_sensitive_state: Option<PersistFn>,
    pub restore_state: Option<RestoreFn>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_name(mut self, name: impl Into<String>) -> Self {
        self.as_name = Some(name.into());
        self
    }

    pub fn optional_state(mut self) -> Self {
        self.state_selector_can_return_undefined = true;
        self
    }

    pub fn persist_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&Patch) -> Patch + Send + Sync + 'static,
    {
        self.persist_state = Some(Arc::new(f));
        self
    }

    pub fn persist_sensitive_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&Patch) -> Patch + Send + Sync + 'static,
    {
        self.persist_sensitive_state = Some(Arc::new(f));
        self
    }

    pub fn restore_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Tree) -> Tree + Send + Sync + 'static,
    {
        self.restore_state = Some(Arc::new(f));
        self
    }
}

/// Restoration used when no restorer is defined: deep-merge the persisted
/// data onto the original state. Non-map data restores nothing.
pub fn default_restore(persisted: &Value, original: &Tree) -> Tree {
    match persisted.as_map() {
        Some(data) => merge_trees(original, data),
        None => original.clone(),
    }
}

impl Slice {
    /// Mount `child` into this slice.
    ///
    /// `state_selector` reads the child's state out of this slice's state;
    /// `state_updater` writes an updated child state back and returns the new
    /// parent state.
    pub fn mount<S, U>(
        self,
        child: Slice,
        state_selector: S,
        state_updater: U,
        options: MountOptions,
    ) -> Result<Slice, SliceError>
    where
        S: Fn(&Tree) -> Option<Tree> + Send + Sync + 'static,
        U: Fn(&Tree, Tree) -> Tree + Send + Sync + 'static,
    {
        self.mount_with(child, Arc::new(state_selector), Arc::new(state_updater), options)
    }

    /// Mount `child` at `path` inside this slice's state.
    pub fn mount_at(
        self,
        child: Slice,
        path: impl Into<KeyPath>,
        options: MountOptions,
    ) -> Result<Slice, SliceError> {
        let path = path.into();
        let read_path = path.clone();
        let state_selector: StateSelector = Arc::new(move |state: &Tree| -> Option<Tree> {
            state.get_in(&read_path).and_then(Value::as_map).cloned()
        });
        let state_updater: StateUpdater =
            Arc::new(move |state: &Tree, sub_state: Tree| state.set_in(&path, sub_state));
        self.mount_with(child, state_selector, state_updater, options)
    }

    fn mount_with(
        self,
        child: Slice,
        state_selector: StateSelector,
        state_updater: StateUpdater,
        options: MountOptions,
    ) -> Result<Slice, SliceError> {
        let branch = options.as_name.clone().unwrap_or_else(|| child.name.clone());
        self.check_collisions(&child, &branch)?;
        self.warn_missing_hooks(&child, &branch, &options);

        let reducer = compose_reducer(
            &self,
            &child,
            &branch,
            state_selector.clone(),
            state_updater,
            options.state_selector_can_return_undefined,
        );

        let mut sub_actions = self.sub_actions.clone();
        sub_actions.insert(branch.clone(), child.actions.routed(&branch));
        sub_actions.extend(
            child
                .sub_actions
                .iter()
                .map(|(name, actions)| (name.clone(), actions.clone())),
        );

        let mut sub_selectors = self.sub_selectors.clone();
        sub_selectors.insert(branch.clone(), scope_selectors(&child.selectors, &state_selector));
        for (name, selectors) in &child.sub_selectors {
            sub_selectors.insert(name.clone(), scope_selectors(selectors, &state_selector));
        }

        Ok(Slice {
            persist_state: compose_persist(self.persist_state.clone(), options.persist_state),
            persist_sensitive_state: compose_persist(
                self.persist_sensitive_state.clone(),
                options.persist_sensitive_state,
            ),
            restore_state: compose_restore(self.restore_state.clone(), options.restore_state),
            name: self.name,
            reducer,
            initial_state: self.initial_state,
            actions: self.actions,
            selectors: self.selectors,
            sub_actions,
            sub_selectors,
        })
    }

    fn check_collisions(&self, child: &Slice, branch: &str) -> Result<(), SliceError> {
        let collision = |name: &str, kind: CollisionKind| SliceError::NameCollision {
            name: name.to_string(),
            target: self.name.clone(),
            kind,
        };

        if branch == self.name {
            return Err(collision(branch, CollisionKind::Parent));
        }
        if self.sub_actions.contains_key(branch) {
            return Err(collision(branch, CollisionKind::Branch));
        }
        for nested in child.sub_actions.keys() {
            if nested == branch
                || *nested == self.name
                || self.sub_actions.contains_key(nested.as_str())
            {
                return Err(collision(nested, CollisionKind::NestedBranch));
            }
        }
        Ok(())
    }

    fn warn_missing_hooks(&self, child: &Slice, branch: &str, options: &MountOptions) {
        if child.persist_state.is_some() && options.persist_state.is_none() {
            warn!(
                slice = %child.name,
                branch,
                parent = %self.name,
                "persist_state is not defined for this mount; the branch will not be persisted"
            );
        }
        if child.persist_sensitive_state.is_some() && options.persist_sensitive_state.is_none() {
            warn!(
                slice = %child.name,
                branch,
                parent = %self.name,
                "persist_sensitive_state is not defined for this mount; the branch will not be persisted"
            );
        }
        if (self.restore_state.is_some() || child.restore_state.is_some())
            && options.restore_state.is_none()
        {
            warn!(
                slice = %child.name,
                branch,
                parent = %self.name,
                "restore_state is not defined for this mount; the branch may not be restored properly"
            );
        }
    }
}

fn compose_reducer(
    parent: &Slice,
    child: &Slice,
    branch: &str,
    state_selector: StateSelector,
    state_updater: StateUpdater,
    optional_state: bool,
) -> Reducer {
    let parent_reducer = parent.reducer.clone();
    let parent_name = parent.name.clone();
    let child_reducer = child.reducer.clone();
    let child_initial = child.initial_state.clone();
    let nested: BTreeSet<String> = child.sub_actions.keys().cloned().collect();
    let branch = branch.to_string();

    Arc::new(move |state: &Tree, action: &Action| -> Result<Tree, SliceError> {
        let parent_state = parent_reducer(state, action)?;

        let targeted = match &action.route {
            Route::Branch(tag) => *tag == branch || nested.contains(tag),
            Route::Unrouted => false,
        };
        if !targeted {
            return Ok(parent_state);
        }

        let sub_state = match state_selector(&parent_state) {
            Some(sub_state) => sub_state,
            None if optional_state => child_initial.clone(),
            None => {
                return Err(SliceError::MissingSubstate {
                    branch: branch.clone(),
                    parent: parent_name.clone(),
                })
            }
        };

        let updated = child_reducer(&sub_state, action)?;
        if updated.ptr_eq(&sub_state) {
            return Ok(parent_state);
        }
        Ok(state_updater(&parent_state, updated))
    })
}

fn compose_persist(parent: Option<PersistFn>, branch: Option<PersistFn>) -> Option<PersistFn> {
    if parent.is_none() && branch.is_none() {
        return None;
    }
    Some(Arc::new(move |diff: &Patch| -> Patch {
        let baseline = parent.as_ref().map(|f| f(diff)).unwrap_or_default();
        match &branch {
            Some(f) => merge_patches(
                &baseline,
                &f(diff),
                MergeOptions {
                    preserve_delete_marker: true,
                },
            ),
            None => baseline,
        }
    }))
}

fn compose_restore(parent: Option<RestoreFn>, branch: Option<RestoreFn>) -> Option<RestoreFn> {
    if parent.is_none() && branch.is_none() {
        return None;
    }
    Some(Arc::new(move |persisted: &Value, original: &Tree| -> Tree {
        let baseline = match &parent {
            Some(f) => f(persisted, original),
            None => default_restore(persisted, original),
        };
        match &branch {
            Some(f) => f(persisted, &baseline),
            None => baseline,
        }
    }))
}
