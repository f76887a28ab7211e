//! Persistence channels
//!
//! A channel pairs a sink with the last snapshot handed to it. The primary
//! and sensitive channels project the same diff through different persist
//! hooks and never influence each other.

use crate::error::PersistError;
use crate::patch::{clean, merge, Patch};
use crate::slice::Slice;
use crate::tree::{Tree, Value};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// Receives the cumulative snapshot of a channel after every flush.
///
/// `previous` is the snapshot handed to the last successful call.
pub trait PersistSink: Send + Sync {
    fn persist(&self, snapshot: &Tree, previous: &Tree) -> Result<(), PersistError>;
}

impl<F> PersistSink for F
where
    F: Fn(&Tree, &Tree) -> Result<(), PersistError> + Send + Sync,
{
    fn persist(&self, snapshot: &Tree, previous: &Tree) -> Result<(), PersistError> {
        self(snapshot, previous)
    }
}

/// Loads previously persisted data for restoration.
///
/// `Ok(None)` and non-map values both count as "nothing persisted".
#[async_trait]
pub trait PersistedDataLoader: Send + Sync {
    async fn load(&self) -> Result<Option<Value>, PersistError>;
}

#[async_trait]
impl<F, Fut> PersistedDataLoader for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, PersistError>> + Send + 'static,
{
    async fn load(&self) -> Result<Option<Value>, PersistError> {
        self().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelKind {
    Primary,
    Sensitive,
}

impl ChannelKind {
    /// Run the root slice's persist hook for this channel.
    fn project(self, root: &Slice, diff: &Patch) -> Option<Patch> {
        match self {
            ChannelKind::Primary => root.persist_state(diff),
            ChannelKind::Sensitive => root.persist_sensitive_state(diff),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Primary => f.write_str("primary"),
            ChannelKind::Sensitive => f.write_str("sensitive"),
        }
    }
}

/// A snapshot ready to be handed to a sink, computed under the channels lock
/// and written outside it.
pub(crate) struct PendingWrite {
    kind: ChannelKind,
    sink: Arc<dyn PersistSink>,
    next: Tree,
    previous: Tree,
}

impl PendingWrite {
    pub(crate) fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Call the sink. The snapshot only advances when this succeeds, so a
    /// failed write is retried as part of the next one.
    pub(crate) fn write(&self) -> bool {
        match self.sink.persist(&self.next, &self.previous) {
            Ok(()) => true,
            Err(err) => {
                error!(channel = %self.kind, error = %err, "Persist sink failed");
                false
            }
        }
    }
}

pub(crate) struct Channel {
    kind: ChannelKind,
    sink: Arc<dyn PersistSink>,
    snapshot: Tree,
}

impl Channel {
    pub(crate) fn new(kind: ChannelKind, sink: Arc<dyn PersistSink>) -> Self {
        Self {
            kind,
            sink,
            snapshot: Tree::new(),
        }
    }

    pub(crate) fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub(crate) fn snapshot(&self) -> &Tree {
        &self.snapshot
    }

    /// Project `diff` and fold it into the snapshot without calling the sink.
    ///
    /// `None` when the diff selects nothing for this channel.
    pub(crate) fn prepare(&self, root: &Slice, diff: &Patch, trace: bool) -> Option<PendingWrite> {
        let changes = self.kind.project(root, diff).as_ref().and_then(clean)?;
        let next = merge(&self.snapshot, &changes);
        if trace {
            debug!(
                channel = %self.kind,
                changes = ?changes,
                snapshot = ?next,
                "Persist: selected state changes"
            );
        }
        Some(PendingWrite {
            kind: self.kind,
            sink: self.sink.clone(),
            next,
            previous: self.snapshot.clone(),
        })
    }

    /// Advance the snapshot after a successful write.
    ///
    /// Skipped when the snapshot moved since `write` was prepared (a restore
    /// reset it in the meantime).
    pub(crate) fn commit(&mut self, write: PendingWrite) {
        if self.snapshot.ptr_eq(&write.previous) {
            self.snapshot = write.next;
        }
    }

    /// Prepare, write and commit in one step. Returns whether the sink was called.
    #[cfg(test)]
    pub(crate) fn persist(&mut self, root: &Slice, diff: &Patch, trace: bool) -> bool {
        let Some(write) = self.prepare(root, diff, trace) else {
            return false;
        };
        if write.write() {
            self.commit(write);
        }
        true
    }

    /// Reset the snapshot to what `diff` (initial state to restored state) persists.
    pub(crate) fn reset(&mut self, root: &Slice, diff: Option<&Patch>) {
        self.snapshot = diff
            .and_then(|diff| self.kind.project(root, diff))
            .as_ref()
            .and_then(clean)
            .map(|changes| changes.to_tree())
            .unwrap_or_default();
    }
}
