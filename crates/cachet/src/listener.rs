//! Listener bindings and synchronous event dispatch

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ListenerError;
use crate::event::{EntryEvent, EventKind, EventKinds};

/// Receives batches of committed entry events.
///
/// Every call carries events of a single kind, in the order the mutations
/// were applied. Listeners run on the mutating thread. A synchronous listener
/// runs while that thread still holds the key's lock; the lock is reentrant,
/// so the listener may read or write the key through the cache. It must not
/// call `Cache::close`, which waits for the mutation to finish.
pub trait EntryListener<K>: Send + Sync {
    /// Handle a batch of events of one kind
    fn on_events(&self, kind: EventKind, events: &[EntryEvent<K>]) -> Result<(), ListenerError>;
}

impl<K, F> EntryListener<K> for F
where
    F: Fn(EventKind, &[EntryEvent<K>]) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_events(&self, kind: EventKind, events: &[EntryEvent<K>]) -> Result<(), ListenerError> {
        self(kind, events)
    }
}

/// Predicate narrowing the events a binding receives
pub type EventFilter<K> = Arc<dyn Fn(&EntryEvent<K>) -> bool + Send + Sync>;

/// A listener together with the capabilities it registered for
pub struct ListenerBinding<K> {
    listener: Arc<dyn EntryListener<K>>,
    kinds: EventKinds,
    old_value_required: bool,
    synchronous: bool,
    filter: Option<EventFilter<K>>,
}

impl<K> Clone for ListenerBinding<K> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
            kinds: self.kinds,
            old_value_required: self.old_value_required,
            synchronous: self.synchronous,
            filter: self.filter.clone(),
        }
    }
}

impl<K> fmt::Debug for ListenerBinding<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBinding")
            .field("kinds", &self.kinds)
            .field("old_value_required", &self.old_value_required)
            .field("synchronous", &self.synchronous)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl<K: Clone> ListenerBinding<K> {
    /// Bind `listener` to the given event kinds.
    ///
    /// Defaults: synchronous delivery, old values included.
    pub fn new<L>(listener: L, kinds: impl Into<EventKinds>) -> Self
    where
        L: EntryListener<K> + 'static,
    {
        Self::from_arc(Arc::new(listener), kinds)
    }

    /// Bind a shared listener
    pub fn from_arc(listener: Arc<dyn EntryListener<K>>, kinds: impl Into<EventKinds>) -> Self {
        Self {
            listener,
            kinds: kinds.into(),
            old_value_required: true,
            synchronous: true,
            filter: None,
        }
    }

    /// Whether Updated events carry the replaced value
    pub fn old_value_required(mut self, required: bool) -> Self {
        self.old_value_required = required;
        self
    }

    /// Synchronous bindings run while the key is still locked; others run
    /// right after it is released, before the call returns
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Only deliver events matching `filter`
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&EntryEvent<K>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Event kinds this binding receives
    pub fn kinds(&self) -> EventKinds {
        self.kinds
    }

    /// Whether the binding is delivered under the key lock
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Events from `batch` as this binding should see them
    fn select<'a>(&self, batch: &'a [EntryEvent<K>]) -> Cow<'a, [EntryEvent<K>]> {
        if self.filter.is_none() && self.old_value_required {
            return Cow::Borrowed(batch);
        }

        let selected = batch
            .iter()
            .filter(|event| self.filter.as_ref().is_none_or(|filter| filter(*event)))
            .map(|event| {
                let mut event = event.clone();
                if !self.old_value_required && event.kind == EventKind::Updated {
                    event.old_value = None;
                }
                event
            })
            .collect();
        Cow::Owned(selected)
    }
}

/// Handle returned by listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// A listener error, attributed to the binding that raised it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{listener} failed on {kind} events: {error}")]
pub struct ListenerFailure {
    /// Failing binding
    pub listener: ListenerId,
    /// Kind of the batch being delivered
    pub kind: EventKind,
    /// What the listener reported
    pub error: ListenerError,
}

/// Which bindings a dispatch pass delivers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Bindings delivered while the key lock is held
    Locked,
    /// Bindings delivered after the key lock is released
    Unlocked,
}

/// Registry of bindings for one cache
pub(crate) struct Dispatcher<K> {
    bindings: RwLock<Vec<(ListenerId, ListenerBinding<K>)>>,
    next_id: AtomicU64,
}

impl<K: Clone> Dispatcher<K> {
    pub(crate) fn new() -> Self {
        Self {
            bindings: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(&self, binding: ListenerBinding<K>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.bindings.write().push((id, binding));
        id
    }

    pub(crate) fn deregister(&self, id: ListenerId) -> bool {
        let mut bindings = self.bindings.write();
        let before = bindings.len();
        bindings.retain(|(bound, _)| *bound != id);
        bindings.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Deliver `events` to the bindings of `phase`, in registration order.
    ///
    /// Runs of consecutive events of one kind go out as a single batch.
    pub(crate) fn dispatch(&self, events: &[EntryEvent<K>], phase: Phase) -> Vec<ListenerFailure> {
        let mut failures = Vec::new();
        if events.is_empty() {
            return failures;
        }

        // Snapshot so listeners may (de)register without deadlocking
        let bindings: Vec<_> = self
            .bindings
            .read()
            .iter()
            .filter(|(_, binding)| binding.synchronous == (phase == Phase::Locked))
            .cloned()
            .collect();

        for batch in events.chunk_by(|a, b| a.kind == b.kind) {
            let kind = batch[0].kind;
            for (id, binding) in &bindings {
                if !binding.kinds.contains(kind) {
                    continue;
                }
                let selected = binding.select(batch);
                if selected.is_empty() {
                    continue;
                }
                if let Err(error) = binding.listener.on_events(kind, &selected) {
                    failures.push(ListenerFailure {
                        listener: *id,
                        kind,
                        error,
                    });
                }
            }
        }

        failures
    }
}
