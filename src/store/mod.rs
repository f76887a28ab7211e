//! Store
//!
//! Wraps a composed root slice with live state and debounced, dual-channel,
//! restore-gated persistence. Dispatches reduce synchronously; sinks and
//! loaders run on the tokio runtime the store was created in.

pub mod channel;
mod orchestrator;
pub mod persistor;
pub mod storage;

pub use channel::{ChannelKind, PersistSink, PersistedDataLoader};
pub use persistor::{Persistor, Subscription};
pub use storage::JsonFileStorage;

use crate::config::PersistConfig;
use crate::error::{SliceError, StoreError};
use crate::slice::{Action, ActionCreators, Slice};
use crate::tree::{Tree, Value};
use channel::Channel;
use orchestrator::{Loaders, StoreInner};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Action type reserved for replacing the live state with restored state.
pub const RESTORE_ACTION: &str = "_persist/RESTORE";

/// Default debounce window for coalescing dispatches into one flush.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Where the store is in its persistence life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Loaders are configured but the first restore has not started.
    Uninitialized,
    Restoring,
    Idle,
    /// A burst of dispatches is waiting for its debounced flush.
    Flushing,
}

/// Persistence configuration for a [`Store`].
#[derive(Clone)]
pub struct PersistOptions {
    pub persist: Option<Arc<dyn PersistSink>>,
    pub persist_sensitive: Option<Arc<dyn PersistSink>>,
    pub get_persisted_data: Option<Arc<dyn PersistedDataLoader>>,
    pub get_persisted_sensitive_data: Option<Arc<dyn PersistedDataLoader>>,
    pub persist_debounce: Duration,
    /// Trace every flush and restore at debug level.
    pub debug: bool,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            persist: None,
            persist_sensitive: None,
            get_persisted_data: None,
            get_persisted_sensitive_data: None,
            persist_debounce: DEFAULT_PERSIST_DEBOUNCE,
            debug: false,
        }
    }
}

impl PersistOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed debounce and tracing from loaded configuration.
    pub fn from_config(config: &PersistConfig) -> Self {
        Self {
            persist_debounce: Duration::from_millis(config.debounce_ms),
            debug: config.debug,
            ..Self::default()
        }
    }

    pub fn persist(mut self, sink: impl PersistSink + 'static) -> Self {
        self.persist = Some(Arc::new(sink));
        self
    }

    pub fn persist_sensitive(mut self, sink: impl PersistSink + 'static) -> Self {
        self.persist_sensitive = Some(Arc::new(sink));
        self
    }

    pub fn persisted_data(mut self, loader: impl PersistedDataLoader + 'static) -> Self {
        self.get_persisted_data = Some(Arc::new(loader));
        self
    }

    pub fn persisted_sensitive_data(mut self, loader: impl PersistedDataLoader + 'static) -> Self {
        self.get_persisted_sensitive_data = Some(Arc::new(loader));
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.persist_debounce = debounce;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn needs_runtime(&self) -> bool {
        self.persist.is_some()
            || self.persist_sensitive.is_some()
            || self.get_persisted_data.is_some()
            || self.get_persisted_sensitive_data.is_some()
    }
}

impl fmt::Debug for PersistOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistOptions")
            .field("persist", &self.persist.is_some())
            .field("persist_sensitive", &self.persist_sensitive.is_some())
            .field("get_persisted_data", &self.get_persisted_data.is_some())
            .field(
                "get_persisted_sensitive_data",
                &self.get_persisted_sensitive_data.is_some(),
            )
            .field("persist_debounce", &self.persist_debounce)
            .field("debug", &self.debug)
            .finish()
    }
}

/// Live state of a composed root slice.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store over `root`.
    ///
    /// When a loader is configured the first restore starts immediately in
    /// the background. Sinks and loaders need a tokio runtime.
    pub fn new(root: Slice, options: PersistOptions) -> Result<Self, StoreError> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle),
            Err(_) if options.needs_runtime() => return Err(StoreError::NoRuntime),
            Err(_) => None,
        };

        let channels: Vec<Channel> = [
            (ChannelKind::Primary, options.persist),
            (ChannelKind::Sensitive, options.persist_sensitive),
        ]
        .into_iter()
        .filter_map(|(kind, sink)| sink.map(|sink| Channel::new(kind, sink)))
        .collect();
        let loaders = Loaders {
            primary: options.get_persisted_data,
            sensitive: options.get_persisted_sensitive_data,
        };
        let should_restore = !loaders.is_empty();

        let inner = Arc::new(StoreInner::new(
            root,
            loaders,
            channels,
            options.persist_debounce,
            options.debug,
            runtime,
        ));
        if should_restore {
            inner.start_restore();
        }
        Ok(Self { inner })
    }

    /// Reduce `action` into the live state.
    ///
    /// Persistence happens later, after the debounce window.
    pub fn dispatch(&self, action: Action) -> Result<(), StoreError> {
        self.inner.dispatch(action)
    }

    pub fn state(&self) -> Tree {
        self.inner.state()
    }

    pub fn root(&self) -> &Slice {
        self.inner.root()
    }

    /// Routed action creators of every branch, keyed by effective name.
    pub fn actions(&self) -> &BTreeMap<String, ActionCreators> {
        self.inner.root().sub_actions()
    }

    /// Create the `case` action of `branch`.
    pub fn action(&self, branch: &str, case: &str) -> Result<Action, SliceError> {
        self.inner
            .root()
            .branch_actions(branch)?
            .action(case)
            .ok_or_else(|| SliceError::UnknownAction {
                branch: branch.to_string(),
                action: case.to_string(),
            })
    }

    pub fn action_with(
        &self,
        branch: &str,
        case: &str,
        payload: impl Into<Value>,
    ) -> Result<Action, SliceError> {
        self.inner
            .root()
            .branch_actions(branch)?
            .action_with(case, payload)
            .ok_or_else(|| SliceError::UnknownAction {
                branch: branch.to_string(),
                action: case.to_string(),
            })
    }

    /// Run selector `name` of `branch` against the live state.
    pub fn select(&self, branch: &str, name: &str) -> Result<Option<Value>, SliceError> {
        let selector = self.inner.root().branch_selector(branch, name)?;
        Ok(selector.select(&self.state()))
    }

    pub fn select_with(
        &self,
        branch: &str,
        name: &str,
        args: &Value,
    ) -> Result<Option<Value>, SliceError> {
        let selector = self.inner.root().branch_selector(branch, name)?;
        Ok(selector.select_with(&self.state(), args))
    }

    pub fn persistor(&self) -> Persistor {
        Persistor::new(self.inner.clone())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.inner.root().name())
            .field("phase", &self.inner.phase())
            .finish()
    }
}
