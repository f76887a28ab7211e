//! Slices
//!
//! A slice owns a reducer, its initial state, the action creators that target
//! it and the selectors that read it. Slices compose: mounting a child slice
//! into a parent produces a new slice whose reducer, selectors and persistence
//! hooks cover both (see [`mount`]), and [`combine_slices`] joins top-level
//! slices into the root of a store.

pub mod builder;
pub mod combine;
pub mod mount;

pub use builder::SliceBuilder;
pub use combine::combine_slices;
pub use mount::{default_restore, MountOptions};

use crate::error::SliceError;
use crate::patch::Patch;
use crate::tree::{Tree, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Full reducer: state and action in, next state out.
pub type Reducer = Arc<dyn Fn(&Tree, &Action) -> Result<Tree, SliceError> + Send + Sync>;

/// Projects a diff onto the part of the state a channel should persist.
pub type PersistFn = Arc<dyn Fn(&Patch) -> Patch + Send + Sync>;

/// Rebuilds state from persisted data and the state to restore into.
pub type RestoreFn = Arc<dyn Fn(&Value, &Tree) -> Tree + Send + Sync>;

/// Extracts a mounted child's state from its parent's state.
pub type StateSelector = Arc<dyn Fn(&Tree) -> Option<Tree> + Send + Sync>;

/// Writes a mounted child's updated state back into its parent's state.
pub type StateUpdater = Arc<dyn Fn(&Tree, Tree) -> Tree + Send + Sync>;

/// Which mounted branch an action is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Route {
    /// Only reducers at the level the action was dispatched to see it.
    #[default]
    Unrouted,
    /// Addressed to the branch with this effective name.
    Branch(String),
}

/// A dispatched action.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: String,
    pub payload: Value,
    pub route: Route,
}

impl Action {
    pub fn new(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
            route: Route::Unrouted,
        }
    }

    pub fn routed_to(mut self, branch: impl Into<String>) -> Self {
        self.route = Route::Branch(branch.into());
        self
    }
}

/// Creates actions of one kind, pre-routed to a branch when exposed under one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCreator {
    kind: String,
    route: Route,
}

impl ActionCreator {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            route: Route::Unrouted,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Action without a payload.
    pub fn create(&self) -> Action {
        self.with_payload(Value::Null)
    }

    pub fn with_payload(&self, payload: impl Into<Value>) -> Action {
        Action {
            kind: self.kind.clone(),
            payload: payload.into(),
            route: self.route.clone(),
        }
    }

    fn routed(&self, branch: &str) -> ActionCreator {
        ActionCreator {
            kind: self.kind.clone(),
            route: Route::Branch(branch.to_string()),
        }
    }
}

/// Action creators of one slice, keyed by case name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionCreators(BTreeMap<String, ActionCreator>);

impl ActionCreators {
    pub fn get(&self, case: &str) -> Option<&ActionCreator> {
        self.0.get(case)
    }

    /// Create the `case` action without a payload.
    pub fn action(&self, case: &str) -> Option<Action> {
        self.get(case).map(ActionCreator::create)
    }

    pub fn action_with(&self, case: &str, payload: impl Into<Value>) -> Option<Action> {
        self.get(case).map(|creator| creator.with_payload(payload))
    }

    pub fn cases(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, case: String, creator: ActionCreator) {
        self.0.insert(case, creator);
    }

    /// Copy with every creator routed to `branch`.
    pub(crate) fn routed(&self, branch: &str) -> ActionCreators {
        ActionCreators(
            self.0
                .iter()
                .map(|(case, creator)| (case.clone(), creator.routed(branch)))
                .collect(),
        )
    }
}

/// A read-only query over slice state, optionally taking arguments.
#[derive(Clone)]
pub struct Selector(Arc<dyn Fn(&Tree, &Value) -> Option<Value> + Send + Sync>);

impl Selector {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Tree) -> Option<Value> + Send + Sync + 'static,
    {
        Selector(Arc::new(move |state: &Tree, _: &Value| f(state)))
    }

    pub fn with_args<F>(f: F) -> Self
    where
        F: Fn(&Tree, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        Selector(Arc::new(f))
    }

    pub fn select(&self, state: &Tree) -> Option<Value> {
        (self.0)(state, &Value::Null)
    }

    pub fn select_with(&self, state: &Tree, args: &Value) -> Option<Value> {
        (self.0)(state, args)
    }

    /// Rebase onto an outer state. Yields `None` when `state_selector` does.
    pub(crate) fn scoped(&self, state_selector: StateSelector) -> Selector {
        let inner = self.0.clone();
        Selector(Arc::new(move |state: &Tree, args: &Value| {
            let sub_state = state_selector(state)?;
            inner(&sub_state, args)
        }))
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Selector")
    }
}

/// Selectors of one slice, keyed by name.
pub type Selectors = BTreeMap<String, Selector>;

pub(crate) fn scope_selectors(selectors: &Selectors, state_selector: &StateSelector) -> Selectors {
    selectors
        .iter()
        .map(|(name, selector)| (name.clone(), selector.scoped(state_selector.clone())))
        .collect()
}

/// A composable unit of state.
#[derive(Clone)]
pub struct Slice {
    pub(crate) name: String,
    pub(crate) reducer: Reducer,
    pub(crate) initial_state: Tree,
    pub(crate) actions: ActionCreators,
    pub(crate) selectors: Selectors,
    pub(crate) sub_actions: BTreeMap<String, ActionCreators>,
    pub(crate) sub_selectors: BTreeMap<String, Selectors>,
    pub(crate) persist_state: Option<PersistFn>,
    pub(crate) persist_sensitive_state: Option<PersistFn>,
    pub(crate) restore_state: Option<RestoreFn>,
}

impl Slice {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> &Tree {
        &self.initial_state
    }

    pub fn reduce(&self, state: &Tree, action: &Action) -> Result<Tree, SliceError> {
        (self.reducer)(state, action)
    }

    /// The slice's own action creators (unrouted).
    pub fn actions(&self) -> &ActionCreators {
        &self.actions
    }

    pub fn selectors(&self) -> &Selectors {
        &self.selectors
    }

    /// Routed action creators of every mounted branch, at any depth.
    pub fn sub_actions(&self) -> &BTreeMap<String, ActionCreators> {
        &self.sub_actions
    }

    /// Action creators of branch `name`.
    pub fn branch_actions(&self, name: &str) -> Result<&ActionCreators, SliceError> {
        self.sub_actions
            .get(name)
            .ok_or_else(|| SliceError::UnknownBranch(name.to_string()))
    }

    /// Selectors of every mounted branch, rebased onto this slice's state.
    pub fn sub_selectors(&self) -> &BTreeMap<String, Selectors> {
        &self.sub_selectors
    }

    pub fn branch_selector(&self, branch: &str, name: &str) -> Result<&Selector, SliceError> {
        self.sub_selectors
            .get(branch)
            .ok_or_else(|| SliceError::UnknownBranch(branch.to_string()))?
            .get(name)
            .ok_or_else(|| SliceError::UnknownSelector {
                branch: branch.to_string(),
                selector: name.to_string(),
            })
    }

    /// Names of every mounted branch, at any depth.
    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.sub_actions.keys().map(String::as_str)
    }

    pub fn has_persist_state(&self) -> bool {
        self.persist_state.is_some()
    }

    pub fn has_persist_sensitive_state(&self) -> bool {
        self.persist_sensitive_state.is_some()
    }

    pub fn has_restore_state(&self) -> bool {
        self.restore_state.is_some()
    }

    /// Project `diff` for the primary channel. `None` when the slice does not persist.
    pub fn persist_state(&self, diff: &Patch) -> Option<Patch> {
        self.persist_state.as_ref().map(|f| f(diff))
    }

    /// Project `diff` for the sensitive channel.
    pub fn persist_sensitive_state(&self, diff: &Patch) -> Option<Patch> {
        self.persist_sensitive_state.as_ref().map(|f| f(diff))
    }

    /// Restore with the slice's own restorer, if it has one.
    pub fn restore_state(&self, persisted: &Value, original: &Tree) -> Option<Tree> {
        self.restore_state.as_ref().map(|f| f(persisted, original))
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice")
            .field("name", &self.name)
            .field("initial_state", &self.initial_state)
            .field("actions", &self.actions)
            .field("branches", &self.sub_actions.keys().collect::<Vec<_>>())
            .field("persist_state", &self.persist_state.is_some())
            .field("persist_sensitive_state", &self.persist_sensitive_state.is_some())
            .field("restore_state", &self.restore_state.is_some())
            .finish()
    }
}
