//! Persistence orchestrator
//!
//! Owns the live state of a composed root slice and drives the
//! restore/flush life cycle around it. Lock order is
//! `flush_gate -> state -> restore -> channels -> burst`. Sinks run with only
//! `flush_gate` held, so a sink may read the persistor; dispatch never
//! touches `channels`.

use crate::error::{PersistError, StoreError};
use crate::patch::{diff, merge_trees, Diff};
use crate::slice::{default_restore, Action, Slice};
use crate::store::channel::{Channel, ChannelKind, PendingWrite, PersistedDataLoader};
use crate::store::{Phase, RESTORE_ACTION};
use crate::tree::{Tree, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Extra delay for a restore that had to wait for a pending flush.
const RESTORE_AFTER_FLUSH_MARGIN: Duration = Duration::from_millis(10);

/// Queued dispatches are reported every time the queue grows by this much.
pub(crate) const QUEUED_WARN_INTERVAL: usize = 1000;

pub(crate) type RestoredCallback = Arc<dyn Fn() + Send + Sync>;

/// States observed between the first dispatch of a burst and the last one.
#[derive(Default)]
struct Burst {
    start: Option<Tree>,
    end: Option<Tree>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RestoreState {
    in_progress: bool,
    /// Dispatches made before the first restore completed. Unbounded: a
    /// failed first restore keeps queueing until a later one succeeds.
    queued: Vec<Action>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, RestoredCallback>,
}

pub(crate) struct Loaders {
    pub(crate) primary: Option<Arc<dyn PersistedDataLoader>>,
    pub(crate) sensitive: Option<Arc<dyn PersistedDataLoader>>,
}

impl Loaders {
    pub(crate) fn is_empty(&self) -> bool {
        self.primary.is_none() && self.sensitive.is_none()
    }
}

pub(crate) struct StoreInner {
    root: Slice,
    loaders: Loaders,
    debounce: Duration,
    trace: bool,
    has_sinks: bool,
    runtime: Option<Handle>,
    state: RwLock<Tree>,
    restore: Mutex<RestoreState>,
    burst: Mutex<Burst>,
    channels: Mutex<Vec<Channel>>,
    flush_gate: Mutex<()>,
    restored: watch::Sender<bool>,
    subscribers: Mutex<Subscribers>,
}

impl StoreInner {
    pub(crate) fn new(
        root: Slice,
        loaders: Loaders,
        channels: Vec<Channel>,
        debounce: Duration,
        trace: bool,
        runtime: Option<Handle>,
    ) -> Self {
        let (restored, _) = watch::channel(loaders.is_empty());
        Self {
            state: RwLock::new(root.initial_state().clone()),
            root,
            loaders,
            debounce,
            trace,
            has_sinks: !channels.is_empty(),
            runtime,
            restore: Mutex::new(RestoreState::default()),
            burst: Mutex::new(Burst::default()),
            channels: Mutex::new(channels),
            flush_gate: Mutex::new(()),
            restored,
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    pub(crate) fn root(&self) -> &Slice {
        &self.root
    }

    pub(crate) fn debounce(&self) -> Duration {
        self.debounce
    }

    pub(crate) fn state(&self) -> Tree {
        self.state.read().clone()
    }

    pub(crate) fn restored(&self) -> bool {
        *self.restored.borrow()
    }

    pub(crate) fn phase(&self) -> Phase {
        if self.restore.lock().in_progress {
            Phase::Restoring
        } else if !self.restored() {
            Phase::Uninitialized
        } else if self.burst.lock().start.is_some() {
            Phase::Flushing
        } else {
            Phase::Idle
        }
    }

    pub(crate) fn snapshots(&self) -> BTreeMap<ChannelKind, Tree> {
        self.channels
            .lock()
            .iter()
            .map(|channel| (channel.kind(), channel.snapshot().clone()))
            .collect()
    }

    /// Reduce `action` into the live state and record it for persistence.
    pub(crate) fn dispatch(self: &Arc<Self>, action: Action) -> Result<(), StoreError> {
        if action.kind == RESTORE_ACTION {
            return Err(StoreError::ReservedAction(action.kind));
        }

        let mut state = self.state.write();
        let previous = state.clone();
        let next = self.root.reduce(&previous, &action)?;
        *state = next.clone();

        if !self.restored() {
            // Bookkeeping waits until the persisted data has been merged in.
            let mut restore = self.restore.lock();
            restore.queued.push(action);
            if restore.queued.len() % QUEUED_WARN_INTERVAL == 0 {
                warn!(
                    queued = restore.queued.len(),
                    "Dispatches are queued until persisted state is restored"
                );
            }
            return Ok(());
        }
        if !self.has_sinks {
            return Ok(());
        }

        let mut burst = self.burst.lock();
        burst.start.get_or_insert(previous);
        burst.end = Some(next);
        self.arm_flush(&mut burst);
        Ok(())
    }

    fn arm_flush(self: &Arc<Self>, burst: &mut Burst) {
        if let Some(timer) = burst.timer.take() {
            timer.abort();
        }
        let Some(runtime) = &self.runtime else {
            return;
        };
        let inner = Arc::downgrade(self);
        let delay = self.debounce;
        burst.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.flush_now();
            }
        }));
    }

    pub(crate) fn flush_pending(&self) -> bool {
        self.burst.lock().start.is_some()
    }

    /// Persist the current burst immediately, waiting for a running flush.
    pub(crate) fn flush_now(&self) {
        let _gate = self.flush_gate.lock();
        self.write_burst();
    }

    /// Persist the current burst unless a flush is already running.
    ///
    /// A skipped burst keeps its timer and is written after the running one.
    pub(crate) fn try_flush_now(&self) -> bool {
        match self.flush_gate.try_lock() {
            Some(_gate) => {
                self.write_burst();
                true
            }
            None => false,
        }
    }

    fn write_burst(&self) {
        let (start, end) = {
            let mut burst = self.burst.lock();
            if let Some(timer) = burst.timer.take() {
                timer.abort();
            }
            match (burst.start.take(), burst.end.take()) {
                (Some(start), Some(end)) => (start, end),
                _ => return,
            }
        };

        let Diff::Changed(view) = diff(&start, &end) else {
            return;
        };
        if self.trace {
            debug!(from = ?start, to = ?end, diff = ?view.patch(), "Persist: state change");
        }
        let writes: Vec<PendingWrite> = self
            .channels
            .lock()
            .iter()
            .filter_map(|channel| {
                let write = channel.prepare(&self.root, view.patch(), self.trace);
                if self.trace && write.is_none() {
                    debug!(channel = %channel.kind(), "Persist: nothing selected for channel");
                }
                write
            })
            .collect();

        let written: Vec<PendingWrite> = writes.into_iter().filter(PendingWrite::write).collect();
        if written.is_empty() {
            return;
        }
        let mut channels = self.channels.lock();
        for write in written {
            if let Some(channel) = channels.iter_mut().find(|c| c.kind() == write.kind()) {
                channel.commit(write);
            }
        }
    }

    /// Schedule a restore after `delay`, replacing any scheduled one.
    pub(crate) fn schedule_restore(self: &Arc<Self>, delay: Duration) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let mut restore = self.restore.lock();
        if let Some(timer) = restore.timer.take() {
            timer.abort();
        }
        let inner = Arc::downgrade(self);
        restore.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            run_restore(inner).await;
        }));
    }

    /// Start the first restore in the background.
    pub(crate) fn start_restore(self: &Arc<Self>) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        self.restore.lock().in_progress = true;
        let inner = Arc::downgrade(self);
        runtime.spawn(run_restore(inner));
    }

    pub(crate) fn cancel_scheduled_restore(&self) {
        if let Some(timer) = self.restore.lock().timer.take() {
            timer.abort();
        }
    }

    /// Restore on a timer: deferred (rescheduled) while a flush is pending.
    pub(crate) async fn restore(self: Arc<Self>) -> Result<(), StoreError> {
        if !self.try_restore().await? {
            self.schedule_restore(self.debounce + RESTORE_AFTER_FLUSH_MARGIN);
        }
        Ok(())
    }

    /// Flush, then restore. A dispatch landing between the two is flushed
    /// again before the load.
    pub(crate) async fn flush_and_restore(self: Arc<Self>) -> Result<(), StoreError> {
        self.cancel_scheduled_restore();
        loop {
            self.flush_now();
            if self.try_restore().await? {
                return Ok(());
            }
        }
    }

    /// Load persisted data and restore it into the live state.
    ///
    /// Returns `Ok(false)` without loading while a flush is pending or
    /// running, so a read never races ahead of an unflushed write.
    async fn try_restore(self: &Arc<Self>) -> Result<bool, StoreError> {
        if self.loaders.is_empty() {
            return Ok(true);
        }
        if self.flush_pending() || self.flush_gate.is_locked() {
            return Ok(false);
        }

        self.restore.lock().in_progress = true;
        let (primary, sensitive) = tokio::join!(
            load(self.loaders.primary.as_deref()),
            load(self.loaders.sensitive.as_deref())
        );
        let (primary, sensitive) = match (primary, sensitive) {
            (Ok(primary), Ok(sensitive)) => (primary, sensitive),
            (Err(err), _) | (_, Err(err)) => {
                self.restore.lock().in_progress = false;
                return Err(err.into());
            }
        };

        // Sensitive values win on overlap.
        let persisted = merge_trees(&primary, &sensitive);
        self.apply_restored(persisted);
        self.notify_restored();
        Ok(true)
    }

    fn apply_restored(self: &Arc<Self>, persisted: Tree) {
        let mut state = self.state.write();
        let mut restore = self.restore.lock();

        let initial = self.root.initial_state();
        let original = if self.restored() { state.clone() } else { initial.clone() };
        let persisted = Value::Map(persisted);
        let restored = self
            .root
            .restore_state(&persisted, &original)
            .unwrap_or_else(|| default_restore(&persisted, &original));

        let restored_diff = diff(initial, &restored);
        if self.trace {
            debug!(
                persisted = ?persisted,
                diff = ?restored_diff.patch(),
                "Persist: restoring state from persisted data"
            );
        }
        for channel in self.channels.lock().iter_mut() {
            channel.reset(&self.root, restored_diff.patch());
        }

        let replace = Action::new(RESTORE_ACTION, restored.clone());
        *state = replace_state(&state, &replace);

        let queued = std::mem::take(&mut restore.queued);
        let replayed = queued.len();
        let mut current = state.clone();
        for action in &queued {
            match self.root.reduce(&current, action) {
                Ok(next) => current = next,
                Err(err) => error!(action = %action.kind, error = %err, "Replaying queued action failed"),
            }
        }
        *state = current.clone();
        restore.in_progress = false;
        // Published while the state lock is held so no dispatch slips between
        // the replay and the first recorded burst.
        self.restored.send_replace(true);

        if self.has_sinks && !current.ptr_eq(&restored) {
            let mut burst = self.burst.lock();
            burst.start.get_or_insert(restored);
            burst.end = Some(current);
            self.arm_flush(&mut burst);
        }

        info!(slice = %self.root.name(), replayed, "Restored persisted state");
    }

    fn notify_restored(&self) {
        let callbacks: Vec<RestoredCallback> =
            self.subscribers.lock().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Register `callback` for restore completion; `None` when already
    /// restored, in which case it has been called immediately.
    pub(crate) fn subscribe_restored(&self, callback: RestoredCallback) -> Option<u64> {
        let mut subscribers = self.subscribers.lock();
        if self.restored() {
            drop(subscribers);
            callback();
            return None;
        }
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.insert(id, callback);
        Some(id)
    }

    pub(crate) fn unsubscribe_restored(&self, id: u64) {
        self.subscribers.lock().callbacks.remove(&id);
    }

    pub(crate) async fn wait_restored(&self) {
        let mut restored = self.restored.subscribe();
        // The sender lives as long as `self`.
        let _ = restored.wait_for(|restored| *restored).await;
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(timer) = self.burst.get_mut().timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.restore.get_mut().timer.take() {
            timer.abort();
        }
    }
}

/// Root reduction for the reserved restore action: replace the live state.
fn replace_state(state: &Tree, action: &Action) -> Tree {
    match action.payload.as_map() {
        Some(restored) => restored.clone(),
        None => state.clone(),
    }
}

async fn run_restore(inner: Weak<StoreInner>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if let Err(err) = inner.restore().await {
        error!(error = %err, "Restoring persisted state failed");
    }
}

async fn load(loader: Option<&dyn PersistedDataLoader>) -> Result<Tree, PersistError> {
    let Some(loader) = loader else {
        return Ok(Tree::new());
    };
    Ok(match loader.load().await? {
        Some(Value::Map(data)) => data,
        Some(other) => {
            warn!(value = ?other, "Ignoring persisted data that is not a map");
            Tree::new()
        }
        None => Tree::new(),
    })
}
