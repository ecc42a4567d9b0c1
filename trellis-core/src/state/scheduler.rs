//! Update Scheduler
//!
//! The scheduler decides when queued listeners run and in which order.
//!
//! # Algorithm
//!
//! 1. Every publish happens inside a batch scope. Nested scopes only bump a
//!    depth counter.
//! 2. A publish marks lazy listeners (derivations) dirty right away, along
//!    with every derivation downstream of them, and queues each listener once.
//! 3. When the outermost scope closes, the queue is flushed:
//!    - queued derivations are refreshed first, lowest rank (as of queueing)
//!      first, ties in queueing order. A derivation refreshed early pulls its
//!      dirty dependencies itself, so rank only saves work;
//!    - effects run after no derivation is left in the queue.
//! 4. A publish that happens while flushing (an effect writing state) queues
//!    into the running flush instead of starting a nested one.
//!
//! Together this makes a batch of writes visible to each derivation and
//! effect exactly once, with the final values.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::rc::Rc;

use super::listener::{Listener, ListenerId};

/// Upper bound on listener runs in one flush before assuming a write cycle.
const MAX_FLUSH_RUNS: usize = 1_000_000;

/// A queued derivation, ordered by rank and then by queueing sequence.
struct Pending {
    rank: u32,
    seq: u64,
    listener: Rc<dyn Listener>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        (self.rank, self.seq) == (other.rank, other.seq)
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank, self.seq).cmp(&(other.rank, other.seq))
    }
}

/// Batching and flush coordination shared by a root registry and its overlays.
#[derive(Default)]
pub struct Scheduler {
    depth: Cell<usize>,
    flushing: Cell<bool>,
    seq: Cell<u64>,
    derived: RefCell<BinaryHeap<Reverse<Pending>>>,
    effects: RefCell<VecDeque<Rc<dyn Listener>>>,
    queued: RefCell<HashSet<ListenerId>>,
}

/// Restores the batch depth even if the batched closure panics.
struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` inside a batch scope; flush when the outermost scope closes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            self.depth.set(self.depth.get() + 1);
            let _guard = DepthGuard(&self.depth);
            f()
        };
        if self.depth.get() == 0 && !self.flushing.get() {
            self.flush();
        }
        result
    }

    /// Queue a listener for the next flush.
    pub fn enqueue(&self, listener: Rc<dyn Listener>) {
        if !listener.is_eager() {
            listener.mark_dirty();
        }
        if !self.queued.borrow_mut().insert(listener.listener_id()) {
            return;
        }
        if listener.is_eager() {
            self.effects.borrow_mut().push_back(listener);
        } else {
            let seq = self.seq.get();
            self.seq.set(seq + 1);
            self.derived.borrow_mut().push(Reverse(Pending {
                rank: listener.rank(),
                seq,
                listener,
            }));
        }
    }

    /// Whether a batch scope is currently open.
    pub fn is_batching(&self) -> bool {
        self.depth.get() > 0
    }

    /// Whether a flush is currently running.
    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Number of listeners waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queued.borrow().len()
    }

    fn flush(&self) {
        self.flushing.set(true);
        let _guard = FlushGuard(&self.flushing);
        let mut runs = 0usize;

        while let Some(listener) = self.next() {
            self.queued.borrow_mut().remove(&listener.listener_id());
            if listener.is_retired() {
                continue;
            }
            runs += 1;
            if runs > MAX_FLUSH_RUNS {
                tracing::error!(runs, "flush did not settle; dropping remaining listeners");
                self.derived.borrow_mut().clear();
                self.effects.borrow_mut().clear();
                self.queued.borrow_mut().clear();
                break;
            }
            listener.run();
        }

        tracing::trace!(runs, "flush complete");
    }

    /// Lowest-rank derivation first, then effects in queue order.
    fn next(&self) -> Option<Rc<dyn Listener>> {
        let derived = self.derived.borrow_mut().pop();
        match derived {
            Some(Reverse(pending)) => Some(pending.listener),
            None => self.effects.borrow_mut().pop_front(),
        }
    }
}
