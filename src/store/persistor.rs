//! Persistor
//!
//! Life cycle handle of a store's persistence: restore status and
//! subscriptions, manual flushes and re-restoration.

use crate::error::StoreError;
use crate::store::orchestrator::StoreInner;
use crate::store::{ChannelKind, Phase};
use crate::tree::Tree;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Handle to a store's persistence life cycle.
#[derive(Clone)]
pub struct Persistor {
    inner: Arc<StoreInner>,
}

impl Persistor {
    pub(crate) fn new(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    /// Whether persisted data has been restored. Always true without loaders.
    pub fn restored(&self) -> bool {
        self.inner.restored()
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase()
    }

    /// Call `callback` whenever a restore completes.
    ///
    /// If the store is already restored, `callback` runs immediately and the
    /// returned subscription is inert.
    pub fn subscribe_restored<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.subscribe_restored(Arc::new(callback));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Resolve once the store is restored.
    pub async fn wait_restored(&self) {
        self.inner.wait_restored().await
    }

    /// Run a pending flush now instead of waiting for the debounce window.
    ///
    /// Does nothing when no dispatch is waiting to be persisted. Called while
    /// another flush is running (from inside a sink, say), the pending burst
    /// is left to its timer.
    pub fn flush(&self) {
        if self.inner.flush_pending() {
            self.inner.try_flush_now();
        }
    }

    /// Reload persisted data after half the debounce window.
    ///
    /// Repeated calls within that window collapse into one restore. Loader
    /// failures are logged; use [`Persistor::restore_now`] to observe them.
    pub fn restore_persisted_state(&self) {
        self.inner.schedule_restore(self.inner.debounce() / 2);
    }

    /// Flush anything pending, then reload persisted data immediately.
    ///
    /// Returns once the load has been applied; a dispatch racing the flush
    /// is flushed too before loading.
    pub async fn restore_now(&self) -> Result<(), StoreError> {
        self.inner.clone().flush_and_restore().await
    }

    /// Last snapshot committed per configured sink.
    pub fn snapshots(&self) -> BTreeMap<ChannelKind, Tree> {
        self.inner.snapshots()
    }
}

impl std::fmt::Debug for Persistor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistor")
            .field("restored", &self.restored())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Registration returned by [`Persistor::subscribe_restored`].
///
/// Dropping it keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<StoreInner>,
    id: Option<u64>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.id.is_some() && self.inner.strong_count() > 0
    }

    pub fn unsubscribe(self) {
        if let (Some(inner), Some(id)) = (self.inner.upgrade(), self.id) {
            inner.unsubscribe_restored(id);
        }
    }
}
