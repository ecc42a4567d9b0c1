//! State Handlers
//!
//! A handler is the materialized reader/writer for one token inside one
//! registry. It holds the current value, the subscriptions of everything that
//! read it, and the publish logic.
//!
//! # Sources and derivations
//!
//! Source handlers (containers, values, meta states, scoped item state) only
//! change through [`StateHandler::publish`].
//!
//! Derived handlers compute their value from other handlers:
//!
//! 1. On first read, the derivation runs and caches its result, subscribing
//!    itself to whatever it read.
//! 2. When a dependency publishes, the handler is marked dirty and queued; it
//!    does not recompute yet. Marking is transitive: every derivation that
//!    reads a dirty derivation is marked dirty and queued too, so no cached
//!    value downstream of a write survives until the flush reaches it.
//! 3. A read of a dirty handler recomputes on the spot, pulling its dirty
//!    dependencies first.
//! 4. When the scheduler refreshes it, it recomputes only if something still
//!    listens. If the value changed since its effects last ran, they are
//!    queued. Dependent derivations are already dirty and need no notice.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::get::Get;
use super::listener::{Listener, ListenerId, Subscription};
use super::registry::WeakRegistry;
use super::scheduler::Scheduler;
use super::snapshot::{EntryKind, Persist, SnapshotEntry};
use super::token::{StateValue, TokenInfo};

/// Unique identifier for a handler.
///
/// The same token has different handlers in a root registry and in an
/// overlay, so dependency tracking is keyed by handler rather than token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

type Derive<T> = Rc<dyn Fn(&mut Get<'_>) -> T>;

struct Derivation<T> {
    derive: Derive<T>,
    registry: WeakRegistry,
    version: Cell<u64>,
    dirty: Cell<bool>,
    /// Value changed while listeners were attached and they were not told yet.
    changed: Cell<bool>,
    rank: Cell<u32>,
}

/// Reader/writer for one token in one registry.
pub struct StateHandler<T: StateValue> {
    id: HandlerId,
    listener_id: ListenerId,
    info: Rc<TokenInfo>,
    value: RefCell<Option<T>>,
    subscriptions: RefCell<IndexMap<ListenerId, Subscription>>,
    scheduler: Rc<Scheduler>,
    persist: Option<Persist<T>>,
    derivation: Option<Derivation<T>>,
    this: Weak<StateHandler<T>>,
}

impl<T: StateValue> StateHandler<T> {
    /// Create a source handler holding `value`.
    pub(crate) fn source(
        info: Rc<TokenInfo>,
        value: T,
        scheduler: Rc<Scheduler>,
        persist: Option<Persist<T>>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: HandlerId::new(),
            listener_id: ListenerId::new(),
            info,
            value: RefCell::new(Some(value)),
            subscriptions: RefCell::new(IndexMap::new()),
            scheduler,
            persist,
            derivation: None,
            this: this.clone(),
        })
    }

    /// Create a derived handler. Nothing is computed until the first read.
    pub(crate) fn derived(
        info: Rc<TokenInfo>,
        derive: Derive<T>,
        registry: WeakRegistry,
        scheduler: Rc<Scheduler>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: HandlerId::new(),
            listener_id: ListenerId::new(),
            info,
            value: RefCell::new(None),
            subscriptions: RefCell::new(IndexMap::new()),
            scheduler,
            persist: None,
            derivation: Some(Derivation {
                derive,
                registry,
                version: Cell::new(0),
                dirty: Cell::new(true),
                changed: Cell::new(false),
                rank: Cell::new(0),
            }),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn info(&self) -> &TokenInfo {
        &self.info
    }

    pub fn is_derived(&self) -> bool {
        self.derivation.is_some()
    }

    /// Current value, recomputing a dirty derivation first.
    ///
    /// # Panics
    ///
    /// Panics if a derivation is read for the first time after the registry
    /// that created it was dropped.
    pub fn value(&self) -> T {
        if let Some(derivation) = &self.derivation {
            if derivation.dirty.get() || self.value.borrow().is_none() {
                self.recompute(derivation);
            }
        }
        match self.value.borrow().as_ref() {
            Some(value) => value.clone(),
            None => panic!(
                "derived state {} read after its registry was dropped",
                self.info
            ),
        }
    }

    /// Replace the value and notify listeners.
    ///
    /// Returns `false` (and does nothing) when the new value equals the
    /// current one. Derived handlers cannot be published to.
    pub fn publish(&self, value: T) -> bool {
        if self.derivation.is_some() {
            tracing::warn!(token = %self.info, "ignoring publish to derived state");
            return false;
        }
        {
            let mut current = self.value.borrow_mut();
            if current.as_ref() == Some(&value) {
                return false;
            }
            *current = Some(value);
        }
        tracing::trace!(token = %self.info, "publish");
        self.notify(|_| true);
        true
    }

    /// Subscribe `listener` at `version`, replacing any older entry of the
    /// same listener.
    pub fn subscribe(&self, listener: Rc<dyn Listener>, version: u64) {
        self.subscriptions
            .borrow_mut()
            .insert(listener.listener_id(), Subscription::new(listener, version));
    }

    /// Number of subscriptions that would still be notified.
    pub fn listener_count(&self) -> usize {
        self.subscriptions
            .borrow()
            .values()
            .filter(|sub| sub.is_live())
            .count()
    }

    pub(crate) fn has_live_listeners(&self) -> bool {
        self.subscriptions.borrow().values().any(Subscription::is_live)
    }

    /// Depth in the derivation graph; sources are rank 0.
    pub(crate) fn depth(&self) -> u32 {
        self.derivation
            .as_ref()
            .map(|derivation| derivation.rank.get())
            .unwrap_or(0)
    }

    /// Live listeners matching `select`, pruning stale subscriptions.
    fn live_listeners(
        &self,
        select: impl Fn(&dyn Listener) -> bool,
    ) -> SmallVec<[Rc<dyn Listener>; 4]> {
        let mut subscriptions = self.subscriptions.borrow_mut();
        subscriptions.retain(|_, sub| sub.is_live());
        subscriptions
            .values()
            .filter(|sub| select(&*sub.listener))
            .map(|sub| sub.listener.clone())
            .collect()
    }

    /// Queue every live listener matching `select`.
    fn notify(&self, select: impl Fn(&dyn Listener) -> bool) {
        let live = self.live_listeners(select);
        if live.is_empty() {
            return;
        }
        self.scheduler.batch(|| {
            for listener in live {
                self.scheduler.enqueue(listener);
            }
        });
    }

    fn recompute(&self, derivation: &Derivation<T>) {
        let Some(registry) = derivation.registry.upgrade() else {
            return;
        };
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let version = derivation.version.get() + 1;
        derivation.version.set(version);

        let this: Rc<dyn Listener> = this;
        let mut get = Get::tracked(&registry, this, version);
        let next = (derivation.derive)(&mut get);
        derivation.rank.set(get.max_rank() + 1);
        derivation.dirty.set(false);

        let mut current = self.value.borrow_mut();
        let changed = current.as_ref() != Some(&next);
        if changed {
            if current.is_some() && self.has_live_listeners() {
                derivation.changed.set(true);
            }
            *current = Some(next);
        }
        tracing::trace!(token = %self.info, changed, "recompute");
    }

    /// Scheduler entry point for a queued derivation.
    fn refresh(&self) {
        let Some(derivation) = &self.derivation else {
            return;
        };
        if derivation.dirty.get() && self.has_live_listeners() {
            self.recompute(derivation);
        }
        if derivation.changed.replace(false) {
            self.notify(|listener| listener.is_eager());
        }
    }

    /// Replace the value from a snapshot entry of the matching kind.
    fn restore_from(&self, entry: &SnapshotEntry) -> bool {
        let Some(persist) = &self.persist else {
            return false;
        };
        if persist.kind != entry.kind {
            return false;
        }
        match (persist.codec.decode)(entry.value.clone()) {
            Ok(value) => self.publish(value),
            Err(err) => {
                tracing::warn!(token = %self.info, %err, "snapshot entry does not decode");
                false
            }
        }
    }
}

impl<T: StateValue> Listener for StateHandler<T> {
    fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    fn version(&self) -> u64 {
        self.derivation
            .as_ref()
            .map(|derivation| derivation.version.get())
            .unwrap_or(0)
    }

    fn is_eager(&self) -> bool {
        false
    }

    fn rank(&self) -> u32 {
        self.depth()
    }

    fn mark_dirty(&self) {
        let Some(derivation) = &self.derivation else {
            return;
        };
        // Already dirty means the dependents were marked then.
        if derivation.dirty.replace(true) {
            return;
        }
        for listener in self.live_listeners(|listener| !listener.is_eager()) {
            self.scheduler.enqueue(listener);
        }
    }

    fn is_retired(&self) -> bool {
        match &self.derivation {
            Some(derivation) => derivation.registry.upgrade().is_none(),
            None => true,
        }
    }

    fn run(self: Rc<Self>) {
        self.refresh();
    }
}

impl<T: StateValue + Debug> Debug for StateHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandler")
            .field("token", &self.info.to_string())
            .field("value", &self.value.borrow())
            .field("derived", &self.is_derived())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

/// Type-erased view of a handler, used by the registry for snapshots.
pub(crate) trait AnyHandler {
    fn info(&self) -> &TokenInfo;

    /// The snapshot entry for this handler, if it is persisted.
    fn persisted(&self, include_meta: bool) -> Option<(String, SnapshotEntry)>;

    /// Publish a value restored from a snapshot entry.
    fn restore(&self, entry: &SnapshotEntry) -> bool;

    fn as_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: StateValue> AnyHandler for StateHandler<T> {
    fn info(&self) -> &TokenInfo {
        &self.info
    }

    fn persisted(&self, include_meta: bool) -> Option<(String, SnapshotEntry)> {
        let persist = self.persist.as_ref()?;
        let id = self.info.id()?;
        if persist.kind == EntryKind::Meta && !include_meta {
            return None;
        }
        let value = self.value.borrow();
        let value = value.as_ref()?;
        if persist.skip.is_some_and(|skip| skip(value)) {
            return None;
        }
        match (persist.codec.encode)(value) {
            Ok(json) => Some((id.to_string(), SnapshotEntry::new(persist.kind, json))),
            Err(err) => {
                tracing::warn!(token = %self.info, %err, "state does not serialize");
                None
            }
        }
    }

    fn restore(&self, entry: &SnapshotEntry) -> bool {
        self.restore_from(entry)
    }

    fn as_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
