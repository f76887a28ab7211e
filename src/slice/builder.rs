//! Leaf slice construction
//!
//! A leaf slice is a set of case reducers keyed by action name. Action kinds
//! are namespaced as `"<slice>/<case>"`; any other kind leaves the state
//! untouched (same reference).

use crate::error::SliceError;
use crate::patch::Patch;
use crate::slice::{
    Action, ActionCreator, ActionCreators, PersistFn, Reducer, RestoreFn, Selector, Selectors, Slice,
};
use crate::tree::{Tree, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

type CaseReducer = Arc<dyn Fn(&Tree, &Value) -> Tree + Send + Sync>;

/// Builder for leaf slices.
pub struct SliceBuilder {
    name: String,
    initial_state: Tree,
    cases: BTreeMap<String, CaseReducer>,
    selectors: Selectors,
    persist_state: Option<PersistFn>,
    persist_sensitive_state: Option<PersistFn>,
    restore_state: Option<RestoreFn>,
}

impl SliceBuilder {
    pub fn new(name: impl Into<String>, initial_state: Tree) -> Self {
        Self {
            name: name.into(),
            initial_state,
            cases: BTreeMap::new(),
            selectors: Selectors::new(),
            persist_state: None,
            persist_sensitive_state: None,
            restore_state: None,
        }
    }

    /// Register a case reducer. It receives the current state and the payload.
    pub fn case<F>(mut self, name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&Tree, &Value) -> Tree + Send + Sync + 'static,
    {
        self.cases.insert(name.into(), Arc::new(reducer));
        self
    }

    pub fn selector<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Tree) -> Option<Value> + Send + Sync + 'static,
    {
        self.selectors.insert(name.into(), Selector::new(f));
        self
    }

    pub fn selector_with_args<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Tree, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.selectors.insert(name.into(), Selector::with_args(f));
        self
    }

    /// Choose what the primary channel persists from a diff of this slice.
    ///
    /// Without it, neither this slice nor anything mounted into it is
    /// persisted, unless the mount supplies its own hook.
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

    /// Customize restoration. Defaults to deep-merging the persisted data.
    pub fn restore_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Tree) -> Tree + Send + Sync + 'static,
    {
        self.restore_state = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Slice {
        let prefix = format!("{}/", self.name);

        let mut actions = ActionCreators::default();
        for case in self.cases.keys() {
            actions.insert(case.clone(), ActionCreator::new(format!("{}{}", prefix, case)));
        }

        let cases = self.cases;
        let reducer: Reducer = Arc::new(move |state: &Tree, action: &Action| -> Result<Tree, SliceError> {
            let case = action
                .kind
                .strip_prefix(prefix.as_str())
                .and_then(|case| cases.get(case));
            Ok(match case {
                Some(reduce) => reduce(state, &action.payload),
                None => state.clone(),
            })
        });

        Slice {
            name: self.name,
            reducer,
            initial_state: self.initial_state,
            actions,
            selectors: self.selectors,
            sub_actions: BTreeMap::new(),
            sub_selectors: BTreeMap::new(),
            persist_state: self.persist_state,
            persist_sensitive_state: self.persist_sensitive_state,
            restore_state: self.restore_state,
        }
    }
}
