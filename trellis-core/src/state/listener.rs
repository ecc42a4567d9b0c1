//! Listener types for the state graph.
//!
//! A Listener is anything that re-runs when a handler it read from publishes:
//! derivations and effects. Handlers do not remove listeners eagerly. Each
//! subscription remembers the listener's version at subscribe time, and a
//! listener invalidates all of its old subscriptions at once by bumping its
//! version. Stale entries are dropped the next time the handler publishes.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a listener.
///
/// Used by the scheduler to queue a listener at most once per flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can be notified when a handler it depends on publishes.
pub trait Listener {
    /// Identity used for de-duplication in the scheduler queue.
    fn listener_id(&self) -> ListenerId;

    /// Current version. Subscriptions recorded under an older version are stale.
    fn version(&self) -> u64;

    /// Effects are eager (they run in the flush); derivations are lazy.
    fn is_eager(&self) -> bool;

    /// Depth in the derivation graph. Lower ranks are refreshed first.
    fn rank(&self) -> u32 {
        0
    }

    /// Called synchronously when a dependency publishes, before queueing.
    fn mark_dirty(&self) {}

    /// A retired listener is never run again.
    fn is_retired(&self) -> bool {
        false
    }

    /// Run the listener. Called by the scheduler during a flush.
    fn run(self: Rc<Self>);
}

/// A `(listener, version_at_subscribe)` pair stored by a handler.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub(crate) listener: Rc<dyn Listener>,
    pub(crate) version: u64,
}

impl Subscription {
    pub(crate) fn new(listener: Rc<dyn Listener>, version: u64) -> Self {
        Self { listener, version }
    }

    /// Whether this subscription should still be honored.
    pub(crate) fn is_live(&self) -> bool {
        !self.listener.is_retired() && self.listener.version() == self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Watcher {
        id: ListenerId,
        version: Cell<u64>,
        retired: Cell<bool>,
    }

    impl Listener for Watcher {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        fn version(&self) -> u64 {
            self.version.get()
        }

        fn is_eager(&self) -> bool {
            true
        }

        fn is_retired(&self) -> bool {
            self.retired.get()
        }

        fn run(self: Rc<Self>) {}
    }

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        let id3 = ListenerId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscription_goes_stale_when_version_moves() {
        let watcher = Rc::new(Watcher {
            id: ListenerId::new(),
            version: Cell::new(3),
            retired: Cell::new(false),
        });
        let sub = Subscription::new(watcher.clone(), 3);
        assert!(sub.is_live());

        watcher.version.set(4);
        assert!(!sub.is_live());
    }

    #[test]
    fn retired_listener_is_not_live() {
        let watcher = Rc::new(Watcher {
            id: ListenerId::new(),
            version: Cell::new(0),
            retired: Cell::new(false),
        });
        let sub = Subscription::new(watcher.clone(), 0);
        watcher.retired.set(true);
        assert!(!sub.is_live());
    }
}
